use std::sync::Arc;

use bssh_copy_core::capability::{FileIndexService, SyncState};
use bssh_copy_core::error::Result;

/// One check of a file-manager sync. The caller owns the poll budget.
pub struct FilemanagerSyncCheck {
    files: Arc<dyn FileIndexService>,
}

impl FilemanagerSyncCheck {
    pub fn new(files: Arc<dyn FileIndexService>) -> Self {
        Self { files }
    }

    pub async fn execute(&self, token: &str) -> Result<SyncState> {
        let state = self.files.check_sync(token).await?;
        tracing::debug!(token, state = %state, "File manager sync checked");
        Ok(state)
    }
}
