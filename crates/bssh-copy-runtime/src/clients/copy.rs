use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};

use bssh_copy_core::capability::CopyService;
use bssh_copy_core::error::Result;
use bssh_copy_core::run::CopyJobSpec;

use super::ServiceClient;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitRequest<'a> {
    source_uri_list: &'a [String],
    destination_uri: &'a str,
    idempotency_key: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    job_id: String,
}

/// Copy service over HTTP.
pub struct HttpCopyService {
    client: ServiceClient,
}

impl HttpCopyService {
    pub fn new(client: ServiceClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CopyService for HttpCopyService {
    async fn submit_copy_job(&self, job: &CopyJobSpec, idempotency_key: &str) -> Result<String> {
        let request = SubmitRequest {
            source_uri_list: &job.source_uri_list,
            destination_uri: &job.destination_uri,
            idempotency_key,
        };
        let response: SubmitResponse = self
            .client
            .send_json(
                Method::POST,
                &["api", "v1", "copy-jobs"],
                &request,
                "copy job submission",
            )
            .await?;
        tracing::debug!(job_id = %response.job_id, idempotency_key, "Copy job accepted");
        Ok(response.job_id)
    }
}
