//! Mock collaborators.
//!
//! Every mock records the calls made to it so tests can assert on side
//! effects without a network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::{Map, Value};

use bssh_copy_core::capability::{
    AnalysisOutputSource, AnalysisOutputs, CopyService, EventPublisher, FileIndexService,
    SampleSheetSource, SchemaRegistry, SyncState,
};
use bssh_copy_core::error::{CopyError, Result};
use bssh_copy_core::event::EventEnvelope;
use bssh_copy_core::run::{CopyJobSpec, RunStatus};
use bssh_copy_core::schema::Schema;

/// Schema registry serving one schema, optionally failing first.
pub struct MockSchemaRegistry {
    schema: Schema,
    failures_left: AtomicU32,
    fetches: AtomicU32,
}

impl MockSchemaRegistry {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            failures_left: AtomicU32::new(0),
            fetches: AtomicU32::new(0),
        }
    }

    /// Fail the next `times` fetches with `SchemaFetchFailure`.
    pub fn failing_times(self, times: u32) -> Self {
        self.failures_left.store(times, Ordering::SeqCst);
        self
    }

    pub fn fetch_count(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SchemaRegistry for MockSchemaRegistry {
    async fn fetch_schema(&self, name: &str, version: &str) -> Result<Schema> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(CopyError::SchemaFetchFailure(format!(
                "{}/{} unavailable",
                name, version
            )));
        }
        Ok(self.schema.clone())
    }
}

/// A recorded copy job submission.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub spec: CopyJobSpec,
    pub idempotency_key: String,
    pub job_id: String,
}

/// Copy service that hands out sequential job ids.
///
/// Resubmitting with a known idempotency key returns the original id.
pub struct MockCopyService {
    submissions: RwLock<Vec<Submission>>,
    calls: AtomicUsize,
    reject: bool,
}

impl MockCopyService {
    pub fn new() -> Self {
        Self {
            submissions: RwLock::new(Vec::new()),
            calls: AtomicUsize::new(0),
            reject: false,
        }
    }

    /// Reject every submission with `PermissionDenied`.
    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::new()
        }
    }

    /// Distinct jobs submitted.
    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions.read().unwrap().clone()
    }

    /// Calls made, including idempotent repeats.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockCopyService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CopyService for MockCopyService {
    async fn submit_copy_job(&self, job: &CopyJobSpec, idempotency_key: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.reject {
            return Err(CopyError::PermissionDenied("copy service rejected the job".into()));
        }

        let mut submissions = self.submissions.write().unwrap();
        if let Some(existing) = submissions
            .iter()
            .find(|s| s.idempotency_key == idempotency_key)
        {
            return Ok(existing.job_id.clone());
        }
        let job_id = format!("copy-job-{}", submissions.len() + 1);
        submissions.push(Submission {
            spec: job.clone(),
            idempotency_key: idempotency_key.to_string(),
            job_id: job_id.clone(),
        });
        Ok(job_id)
    }
}

/// File index that reports `Done` after a configurable number of checks.
pub struct MockFileIndex {
    pending_checks: Option<u32>,
    missing_prefix: bool,
    checks: AtomicU32,
    triggers: RwLock<Vec<String>>,
    attributes: RwLock<HashMap<String, Map<String, Value>>>,
}

impl MockFileIndex {
    pub fn new() -> Self {
        Self {
            pending_checks: Some(0),
            missing_prefix: false,
            checks: AtomicU32::new(0),
            triggers: RwLock::new(Vec::new()),
            attributes: RwLock::new(HashMap::new()),
        }
    }

    /// Report `Pending` for the first `count` checks.
    pub fn with_pending_checks(mut self, count: u32) -> Self {
        self.pending_checks = Some(count);
        self
    }

    /// Never report `Done`.
    pub fn never_done(mut self) -> Self {
        self.pending_checks = None;
        self
    }

    /// Answer every sync trigger with `NotFound`.
    pub fn missing_prefix(mut self) -> Self {
        self.missing_prefix = true;
        self
    }

    /// Prefixes a sync was triggered for.
    pub fn triggers(&self) -> Vec<String> {
        self.triggers.read().unwrap().clone()
    }

    pub fn check_count(&self) -> u32 {
        self.checks.load(Ordering::SeqCst)
    }

    /// Attributes stored on objects under `prefix_uri`.
    pub fn attributes(&self, prefix_uri: &str) -> Option<Map<String, Value>> {
        self.attributes.read().unwrap().get(prefix_uri).cloned()
    }
}

impl Default for MockFileIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileIndexService for MockFileIndex {
    async fn trigger_sync(&self, prefix_uri: &str) -> Result<String> {
        if self.missing_prefix {
            return Err(CopyError::NotFound(format!("bucket for {}", prefix_uri)));
        }
        let mut triggers = self.triggers.write().unwrap();
        triggers.push(prefix_uri.to_string());
        Ok(format!("sync-{}", triggers.len()))
    }

    async fn check_sync(&self, _token: &str) -> Result<SyncState> {
        let seen = self.checks.fetch_add(1, Ordering::SeqCst);
        match self.pending_checks {
            Some(pending) if seen >= pending => Ok(SyncState::Done),
            _ => Ok(SyncState::Pending),
        }
    }

    async fn tag_objects(&self, prefix_uri: &str, attributes: &Map<String, Value>) -> Result<u64> {
        let mut stored = self.attributes.write().unwrap();
        let current = stored.entry(prefix_uri.to_string()).or_default();
        let mut changed = false;
        for (key, value) in attributes {
            if current.get(key) != Some(value) {
                current.insert(key.clone(), value.clone());
                changed = true;
            }
        }
        Ok(u64::from(changed))
    }
}

/// Sample sheets keyed by instrument run id.
pub struct MockSampleSheets {
    sheets: RwLock<HashMap<String, String>>,
    fetches: AtomicU32,
}

impl MockSampleSheets {
    pub fn new() -> Self {
        Self {
            sheets: RwLock::new(HashMap::new()),
            fetches: AtomicU32::new(0),
        }
    }

    pub fn with_sheet(self, instrument_run_id: &str, sheet: &str) -> Self {
        self.set_sheet(instrument_run_id, sheet);
        self
    }

    /// Make a sample sheet available, e.g. after a run was drafted.
    pub fn set_sheet(&self, instrument_run_id: &str, sheet: &str) {
        self.sheets
            .write()
            .unwrap()
            .insert(instrument_run_id.to_string(), sheet.to_string());
    }

    pub fn fetch_count(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl Default for MockSampleSheets {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SampleSheetSource for MockSampleSheets {
    async fn fetch_sample_sheet(&self, instrument_run_id: &str) -> Result<Option<String>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.sheets.read().unwrap().get(instrument_run_id).cloned())
    }
}

/// Analysis output listings keyed by `(project, analysis)`.
pub struct MockAnalyses {
    outputs: RwLock<HashMap<(String, String), AnalysisOutputs>>,
}

impl MockAnalyses {
    pub fn new() -> Self {
        Self {
            outputs: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_outputs(self, project_id: &str, analysis_id: &str, outputs: AnalysisOutputs) -> Self {
        self.set_outputs(project_id, analysis_id, outputs);
        self
    }

    /// Replace the listing for an analysis.
    pub fn set_outputs(&self, project_id: &str, analysis_id: &str, outputs: AnalysisOutputs) {
        self.outputs
            .write()
            .unwrap()
            .insert((project_id.to_string(), analysis_id.to_string()), outputs);
    }
}

impl Default for MockAnalyses {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AnalysisOutputSource for MockAnalyses {
    async fn fetch_outputs(&self, project_id: &str, analysis_id: &str) -> Result<AnalysisOutputs> {
        self.outputs
            .read()
            .unwrap()
            .get(&(project_id.to_string(), analysis_id.to_string()))
            .cloned()
            .ok_or_else(|| {
                CopyError::ManifestUnavailable(format!(
                    "analysis {}/{} not indexed",
                    project_id, analysis_id
                ))
            })
    }
}

/// Publisher that keeps every event.
///
/// # Example
///
/// ```ignore
/// let publisher = RecordingPublisher::new();
/// machine.handle(route).await?;
/// publisher.assert_published(RunStatus::Draft);
/// ```
pub struct RecordingPublisher {
    events: RwLock<Vec<EventEnvelope>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self {
            events: RwLock::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<EventEnvelope> {
        self.events.read().unwrap().clone()
    }

    /// Events published after the first `skip`.
    pub fn events_since(&self, skip: usize) -> Vec<EventEnvelope> {
        self.events.read().unwrap().iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Status field of every published state change, in order.
    pub fn statuses(&self) -> Vec<RunStatus> {
        self.events
            .read()
            .unwrap()
            .iter()
            .filter_map(|e| e.detail_str(&["status"]))
            .filter_map(|s| s.parse().ok())
            .collect()
    }

    /// Assert that a state change with `status` was published.
    pub fn assert_published(&self, status: RunStatus) {
        let statuses = self.statuses();
        assert!(
            statuses.contains(&status),
            "expected a {} event, published: {:?}",
            status,
            statuses
        );
    }

    /// Assert that nothing with `status` was published.
    pub fn assert_not_published(&self, status: RunStatus) {
        let statuses = self.statuses();
        assert!(
            !statuses.contains(&status),
            "unexpected {} event, published: {:?}",
            status,
            statuses
        );
    }
}

impl Default for RecordingPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: EventEnvelope) -> Result<()> {
        self.events.write().unwrap().push(event);
        Ok(())
    }
}
