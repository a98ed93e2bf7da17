use async_trait::async_trait;

use bssh_copy_core::capability::{AnalysisOutputSource, AnalysisOutputs};
use bssh_copy_core::error::{CopyError, Result};

use super::ServiceClient;

/// Analysis service over HTTP.
pub struct HttpAnalyses {
    client: ServiceClient,
}

impl HttpAnalyses {
    pub fn new(client: ServiceClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AnalysisOutputSource for HttpAnalyses {
    async fn fetch_outputs(&self, project_id: &str, analysis_id: &str) -> Result<AnalysisOutputs> {
        self.client
            .get_json(
                &["api", "v1", "analyses", project_id, analysis_id, "outputs"],
                "analysis outputs",
            )
            .await
            .map_err(|e| match e {
                // Outputs are listed only after the analysis has been indexed.
                CopyError::NotFound(message) => CopyError::ManifestUnavailable(message),
                other => other,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outputs_wire_format() {
        let outputs: AnalysisOutputs = serde_json::from_value(serde_json::json!({
            "outputUri": "icav2://project/ilmn_primary/R1/output/",
            "interopUris": ["icav2://project/runs/R1/InterOp/IndexMetricsOut.bin"]
        }))
        .unwrap();
        assert_eq!(outputs.output_uri, "icav2://project/ilmn_primary/R1/output/");
        assert_eq!(outputs.interop_uris.len(), 1);
    }
}
