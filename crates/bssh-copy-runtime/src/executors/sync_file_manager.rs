use std::sync::Arc;

use bssh_copy_core::capability::FileIndexService;
use bssh_copy_core::error::Result;
use bssh_copy_core::uri::StorageUri;

/// Starts a file-manager sync of a run's output prefix.
pub struct SyncFileManager {
    files: Arc<dyn FileIndexService>,
}

impl SyncFileManager {
    pub fn new(files: Arc<dyn FileIndexService>) -> Self {
        Self { files }
    }

    /// Trigger indexing under `output_uri` and return the sync token.
    pub async fn execute(&self, portal_run_id: &str, output_uri: &str) -> Result<String> {
        let uri = StorageUri::parse(output_uri)?;
        let prefix = format!("{}://{}/{}", uri.scheme, uri.bucket, uri.prefix());
        let token = self.files.trigger_sync(&prefix).await?;
        tracing::info!(portal_run_id, prefix = %prefix, token = %token, "File manager sync triggered");
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockFileIndex;

    #[tokio::test]
    async fn test_triggers_on_directory_prefix() {
        let files = Arc::new(MockFileIndex::new());
        let executor = SyncFileManager::new(files.clone());
        let token = executor
            .execute("p1", "s3://cache/primary/R1")
            .await
            .unwrap();
        assert!(!token.is_empty());
        assert_eq!(files.triggers(), vec!["s3://cache/primary/R1/"]);
    }

    #[tokio::test]
    async fn test_rejects_non_storage_uri() {
        let executor = SyncFileManager::new(Arc::new(MockFileIndex::new()));
        assert!(executor.execute("p1", "/local/path").await.is_err());
    }
}
