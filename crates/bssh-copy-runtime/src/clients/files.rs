use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use bssh_copy_core::capability::{FileIndexService, SyncState};
use bssh_copy_core::error::Result;
use bssh_copy_core::uri::StorageUri;

use super::ServiceClient;

/// Cross-account test objects the copy service leaves behind; never indexed.
const IGNORED_SUFFIX: &str = ".iap_xaccount_test.tmp";

#[derive(Debug, Serialize)]
struct PrefixRequest<'a> {
    bucket: &'a str,
    prefix: String,
}

#[derive(Debug, Serialize)]
struct AttributesRequest<'a> {
    bucket: &'a str,
    prefix: String,
    attributes: &'a Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct SyncStarted {
    token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyncStatus {
    status: SyncState,
    #[serde(default)]
    pending_keys: Vec<String>,
}

impl SyncStatus {
    /// Done when the service says so, or when only ignored objects are left.
    fn state(&self) -> SyncState {
        match self.status {
            SyncState::Done => SyncState::Done,
            SyncState::Pending
                if !self.pending_keys.is_empty()
                    && self.pending_keys.iter().all(|k| k.ends_with(IGNORED_SUFFIX)) =>
            {
                SyncState::Done
            }
            SyncState::Pending => SyncState::Pending,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AttributesUpdated {
    #[serde(default)]
    updated: u64,
}

/// File manager over HTTP.
pub struct HttpFileManager {
    client: ServiceClient,
}

impl HttpFileManager {
    pub fn new(client: ServiceClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FileIndexService for HttpFileManager {
    async fn trigger_sync(&self, prefix_uri: &str) -> Result<String> {
        let uri = StorageUri::parse(prefix_uri)?;
        let request = PrefixRequest {
            bucket: &uri.bucket,
            prefix: uri.prefix(),
        };
        let started: SyncStarted = self
            .client
            .send_json(
                Method::POST,
                &["api", "v1", "s3", "crawl", "sync"],
                &request,
                "file manager sync",
            )
            .await?;
        Ok(started.token)
    }

    async fn check_sync(&self, token: &str) -> Result<SyncState> {
        let status: SyncStatus = self
            .client
            .get_json(
                &["api", "v1", "s3", "crawl", "sync", token],
                "file manager sync check",
            )
            .await?;
        let state = status.state();
        tracing::debug!(token, state = %state, pending = status.pending_keys.len(), "Sync checked");
        Ok(state)
    }

    async fn tag_objects(&self, prefix_uri: &str, attributes: &Map<String, Value>) -> Result<u64> {
        let uri = StorageUri::parse(prefix_uri)?;
        let request = AttributesRequest {
            bucket: &uri.bucket,
            prefix: uri.prefix(),
            attributes,
        };
        let updated: AttributesUpdated = self
            .client
            .send_json(
                Method::PATCH,
                &["api", "v1", "s3", "attributes"],
                &request,
                "file manager attributes",
            )
            .await?;
        Ok(updated.updated)
    }
}
