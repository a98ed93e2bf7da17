use std::sync::Arc;

use serde_json::{json, Map};

use bssh_copy_core::capability::FileIndexService;
use bssh_copy_core::error::Result;

/// Tags copied objects with the run that produced them.
pub struct AddPortalRunIdAttributes {
    files: Arc<dyn FileIndexService>,
}

impl AddPortalRunIdAttributes {
    pub fn new(files: Arc<dyn FileIndexService>) -> Self {
        Self { files }
    }

    /// Set `portalRunId` on every object under `output_uri`.
    ///
    /// Returns how many objects changed; re-tagging changes none.
    pub async fn execute(&self, portal_run_id: &str, output_uri: &str) -> Result<u64> {
        let mut attributes = Map::new();
        attributes.insert("portalRunId".into(), json!(portal_run_id));
        let changed = self.files.tag_objects(output_uri, &attributes).await?;
        tracing::info!(portal_run_id, output_uri, changed, "Output objects tagged");
        Ok(changed)
    }
}
