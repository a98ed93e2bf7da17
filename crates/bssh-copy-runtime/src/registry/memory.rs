use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use bssh_copy_core::capability::{Registration, RunMutation, RunRegistry};
use bssh_copy_core::error::{CopyError, Result};
use bssh_copy_core::run::{RunStatus, WorkflowRun};

#[derive(Default)]
struct Inner {
    runs: HashMap<String, WorkflowRun>,
    by_name: HashMap<String, String>,
}

/// Process-local run registry.
///
/// Every operation holds a single lock, so conditional updates are atomic
/// read-modify-writes.
#[derive(Default)]
pub struct InMemoryRunRegistry {
    inner: RwLock<Inner>,
}

impl InMemoryRunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored runs.
    pub async fn len(&self) -> usize {
        self.inner.read().await.runs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl RunRegistry for InMemoryRunRegistry {
    async fn create_or_get(&self, run: WorkflowRun) -> Result<Registration> {
        let mut inner = self.inner.write().await;
        if let Some(existing) = inner
            .by_name
            .get(&run.workflow_run_name)
            .and_then(|id| inner.runs.get(id))
        {
            return Ok(Registration::Existing(existing.clone()));
        }
        if inner.runs.contains_key(&run.portal_run_id) {
            return Err(CopyError::Internal(format!(
                "portal run id {} already in use",
                run.portal_run_id
            )));
        }
        inner
            .by_name
            .insert(run.workflow_run_name.clone(), run.portal_run_id.clone());
        inner.runs.insert(run.portal_run_id.clone(), run.clone());
        Ok(Registration::Created(run))
    }

    async fn get(&self, portal_run_id: &str) -> Result<WorkflowRun> {
        self.inner
            .read()
            .await
            .runs
            .get(portal_run_id)
            .cloned()
            .ok_or_else(|| CopyError::RunNotFound(portal_run_id.to_string()))
    }

    async fn find_by_name(&self, workflow_run_name: &str) -> Result<Option<WorkflowRun>> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_name
            .get(workflow_run_name)
            .and_then(|id| inner.runs.get(id))
            .cloned())
    }

    async fn find_awaiting_copy(
        &self,
        job_id: Option<&str>,
        destination_uri: &str,
        sources: &[String],
    ) -> Result<Option<WorkflowRun>> {
        let inner = self.inner.read().await;
        Ok(inner
            .runs
            .values()
            .filter(|run| run.status == RunStatus::Running && run.is_awaiting_copy())
            .find(|run| {
                run.execution.as_ref().is_some_and(|e| {
                    e.copy_jobs
                        .iter()
                        .any(|j| j.matches(job_id, destination_uri, sources))
                })
            })
            .cloned())
    }

    async fn list(&self, status: Option<RunStatus>) -> Result<Vec<WorkflowRun>> {
        let inner = self.inner.read().await;
        let mut runs: Vec<WorkflowRun> = inner
            .runs
            .values()
            .filter(|run| status.map_or(true, |s| run.status == s))
            .cloned()
            .collect();
        runs.sort_by(|a, b| a.portal_run_id.cmp(&b.portal_run_id));
        Ok(runs)
    }

    async fn conditional_update(
        &self,
        portal_run_id: &str,
        expected: RunStatus,
        mutation: RunMutation<'_>,
    ) -> Result<WorkflowRun> {
        let mut inner = self.inner.write().await;
        let current = inner
            .runs
            .get_mut(portal_run_id)
            .ok_or_else(|| CopyError::RunNotFound(portal_run_id.to_string()))?;

        if current.status != expected {
            return Err(CopyError::Conflict {
                portal_run_id: portal_run_id.to_string(),
                expected,
                actual: current.status,
            });
        }

        let mut updated = current.clone();
        mutation(&mut updated)?;
        if updated.portal_run_id != current.portal_run_id
            || updated.workflow_run_name != current.workflow_run_name
        {
            return Err(CopyError::Internal(
                "mutation changed run identity".to_string(),
            ));
        }
        *current = updated.clone();
        Ok(updated)
    }
}
