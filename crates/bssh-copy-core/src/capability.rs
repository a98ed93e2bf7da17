//! Narrow interfaces to the external collaborators.
//!
//! Executors receive these as `Arc<dyn ...>` at construction; nothing looks
//! them up at runtime.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::event::EventEnvelope;
use crate::run::{CopyJobSpec, RunStatus, WorkflowRun};
use crate::schema::Schema;

/// Mutation applied inside a conditional update. May be invoked more than
/// once if the store retries an optimistic write.
pub type RunMutation<'a> = &'a (dyn Fn(&mut WorkflowRun) -> Result<()> + Send + Sync);

/// Outcome of `create_or_get`.
#[derive(Debug, Clone, PartialEq)]
pub enum Registration {
    /// The run was inserted by this call.
    Created(WorkflowRun),
    /// A run with the same name already existed; it is returned unchanged.
    Existing(WorkflowRun),
}

impl Registration {
    pub fn run(&self) -> &WorkflowRun {
        match self {
            Self::Created(run) | Self::Existing(run) => run,
        }
    }

    pub fn into_run(self) -> WorkflowRun {
        match self {
            Self::Created(run) | Self::Existing(run) => run,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Durable store of workflow runs.
#[async_trait]
pub trait RunRegistry: Send + Sync {
    /// Insert `run` unless one with the same name exists.
    async fn create_or_get(&self, run: WorkflowRun) -> Result<Registration>;

    /// Fetch by portal run id. Missing runs are `NotFound`.
    async fn get(&self, portal_run_id: &str) -> Result<WorkflowRun>;

    /// Fetch by derived run name.
    async fn find_by_name(&self, workflow_run_name: &str) -> Result<Option<WorkflowRun>>;

    /// Find the run parked on a copy job matching a completion signal.
    async fn find_awaiting_copy(
        &self,
        job_id: Option<&str>,
        destination_uri: &str,
        sources: &[String],
    ) -> Result<Option<WorkflowRun>>;

    /// List runs, optionally filtered by status.
    async fn list(&self, status: Option<RunStatus>) -> Result<Vec<WorkflowRun>>;

    /// Atomically apply `mutation` if the run is still in `expected` status.
    ///
    /// Returns `Conflict` when the status has moved on. An error from the
    /// mutation aborts the update and is returned as is.
    async fn conditional_update(
        &self,
        portal_run_id: &str,
        expected: RunStatus,
        mutation: RunMutation<'_>,
    ) -> Result<WorkflowRun>;
}

/// Source of versioned validation schemas.
#[async_trait]
pub trait SchemaRegistry: Send + Sync {
    async fn fetch_schema(&self, name: &str, version: &str) -> Result<Schema>;
}

/// External bulk copy service. Completion arrives as an event.
#[async_trait]
pub trait CopyService: Send + Sync {
    /// Submit a copy job and return its id. Repeating a submission with the
    /// same idempotency key returns the original job id.
    async fn submit_copy_job(&self, job: &CopyJobSpec, idempotency_key: &str) -> Result<String>;
}

/// Indexing state reported by the file index service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncState {
    Pending,
    Done,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("PENDING"),
            Self::Done => f.write_str("DONE"),
        }
    }
}

/// File manager: indexes copied objects and stores attributes on them.
#[async_trait]
pub trait FileIndexService: Send + Sync {
    /// Start indexing everything under `prefix_uri`.
    async fn trigger_sync(&self, prefix_uri: &str) -> Result<String>;

    /// Check a sync started by `trigger_sync`.
    async fn check_sync(&self, token: &str) -> Result<SyncState>;

    /// Merge `attributes` into every object under `prefix_uri`.
    ///
    /// Returns the number of objects whose attributes changed.
    async fn tag_objects(&self, prefix_uri: &str, attributes: &Map<String, Value>) -> Result<u64>;
}

/// Source of sequencing run sample sheets.
#[async_trait]
pub trait SampleSheetSource: Send + Sync {
    /// Sample sheet text, or `None` if it is not available yet.
    async fn fetch_sample_sheet(&self, instrument_run_id: &str) -> Result<Option<String>>;
}

/// Output listing of the upstream analysis the copy reads from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisOutputs {
    /// Analysis output folder.
    pub output_uri: String,
    /// InterOp files of the sequencing run.
    #[serde(default)]
    pub interop_uris: Vec<String>,
}

/// Analysis service that knows where an analysis wrote its outputs.
#[async_trait]
pub trait AnalysisOutputSource: Send + Sync {
    /// Output listing; `ManifestUnavailable` while the analysis is not indexed.
    async fn fetch_outputs(&self, project_id: &str, analysis_id: &str) -> Result<AnalysisOutputs>;
}

/// Publishes state-change events to the bus.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: EventEnvelope) -> Result<()>;
}
