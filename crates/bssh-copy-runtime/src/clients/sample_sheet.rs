use async_trait::async_trait;
use serde_json::Value;

use bssh_copy_core::capability::SampleSheetSource;
use bssh_copy_core::error::Result;

use super::ServiceClient;

/// Sequence run manager over HTTP.
pub struct HttpSampleSheets {
    client: ServiceClient,
}

impl HttpSampleSheets {
    pub fn new(client: ServiceClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SampleSheetSource for HttpSampleSheets {
    async fn fetch_sample_sheet(&self, instrument_run_id: &str) -> Result<Option<String>> {
        let body = self
            .client
            .get_text_optional(
                &["api", "v1", "sequence", instrument_run_id, "sample_sheet"],
                "sample sheet",
            )
            .await?;
        Ok(body.and_then(|text| sheet_content(&text)))
    }
}

/// The service answers either with the raw sheet or a JSON wrapper.
fn sheet_content(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with('{') {
        let value: Value = serde_json::from_str(trimmed).ok()?;
        return value
            .get("sampleSheetContent")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string);
    }
    Some(body.to_string())
}
