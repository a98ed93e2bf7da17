use std::sync::Arc;

use serde_json::Value;

use bssh_copy_core::capability::RunRegistry;
use bssh_copy_core::error::Result;
use bssh_copy_core::run::WorkflowRun;

/// Reads a run from the registry.
pub struct GetRunObject {
    registry: Arc<dyn RunRegistry>,
}

impl GetRunObject {
    pub fn new(registry: Arc<dyn RunRegistry>) -> Self {
        Self { registry }
    }

    /// The full record, including the execution sub-state.
    ///
    /// An unknown id is `NotFound`.
    pub async fn execute(&self, portal_run_id: &str) -> Result<WorkflowRun> {
        self.registry.get(portal_run_id).await
    }

    /// The run as callers see it, without the volatile execution sub-state.
    pub async fn view(&self, portal_run_id: &str) -> Result<Value> {
        let mut run = self.execute(portal_run_id).await?;
        run.execution = None;
        Ok(serde_json::to_value(&run)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemoryRunRegistry;
    use crate::testing::draft_run;
    use bssh_copy_core::error::CopyError;
    use bssh_copy_core::run::ExecutionState;

    #[tokio::test]
    async fn test_get_and_view() {
        let registry = Arc::new(InMemoryRunRegistry::new());
        let mut run = draft_run("R1", "A1");
        run.execution = Some(ExecutionState::submitting());
        let id = run.portal_run_id.clone();
        registry.create_or_get(run).await.unwrap();

        let executor = GetRunObject::new(registry);
        let full = executor.execute(&id).await.unwrap();
        assert!(full.execution.is_some());

        let view = executor.view(&id).await.unwrap();
        assert_eq!(view["portalRunId"], id.as_str());
        assert!(view.get("execution").is_none());
    }

    #[tokio::test]
    async fn test_unknown_run_is_not_found() {
        let executor = GetRunObject::new(Arc::new(InMemoryRunRegistry::new()));
        let err = executor.execute("missing").await.unwrap_err();
        assert!(matches!(err, CopyError::RunNotFound(_)));
    }
}
