//! A state machine wired to mock collaborators.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bssh_copy_core::capability::AnalysisOutputs;
use bssh_copy_core::config::CopyConfig;
use bssh_copy_core::error::Result;
use bssh_copy_core::event::EventEnvelope;
use bssh_copy_core::router::EventRouter;
use bssh_copy_core::schema::Schema;

use super::mock::{
    MockAnalyses, MockCopyService, MockFileIndex, MockSampleSheets, MockSchemaRegistry,
    RecordingPublisher,
};
use super::test_config;
use crate::registry::InMemoryRunRegistry;
use crate::workflow::{Collaborators, StageOutcome, WorkflowStateMachine};

/// Router, state machine and mocks for one test.
///
/// # Example
///
/// ```ignore
/// let harness = Harness::builder().analysis("P1", "A1", outputs).build();
/// let outcomes = harness.feed(upstream_event("R1", "A1", "P1")).await?;
/// harness.publisher.assert_published(RunStatus::Draft);
/// ```
pub struct Harness {
    pub config: Arc<CopyConfig>,
    pub router: EventRouter,
    pub registry: Arc<InMemoryRunRegistry>,
    pub schemas: Arc<MockSchemaRegistry>,
    pub copy_service: Arc<MockCopyService>,
    pub files: Arc<MockFileIndex>,
    pub sample_sheets: Arc<MockSampleSheets>,
    pub analyses: Arc<MockAnalyses>,
    pub publisher: Arc<RecordingPublisher>,
    pub machine: WorkflowStateMachine,
    looped: AtomicUsize,
}

impl Harness {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::new()
    }

    /// Route one event and run its stage.
    pub async fn deliver(&self, event: EventEnvelope) -> Result<Option<StageOutcome>> {
        match self.router.route(&event)? {
            Some(route) => self.machine.handle(route).await.map(Some),
            None => Ok(None),
        }
    }

    /// Deliver `event`, then keep looping published events back in until
    /// nothing new is published.
    pub async fn feed(&self, event: EventEnvelope) -> Result<Vec<StageOutcome>> {
        let mut outcomes = Vec::new();
        outcomes.extend(self.deliver(event).await?);
        loop {
            let cursor = self.looped.load(Ordering::SeqCst);
            let pending = self.publisher.events_since(cursor);
            if pending.is_empty() {
                return Ok(outcomes);
            }
            self.looped.store(cursor + pending.len(), Ordering::SeqCst);
            for event in pending {
                outcomes.extend(self.deliver(event).await?);
            }
        }
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`Harness`].
pub struct HarnessBuilder {
    config: CopyConfig,
    schema: Option<Schema>,
    schema_failures: u32,
    sample_sheets: MockSampleSheets,
    analyses: MockAnalyses,
    files: MockFileIndex,
    copy_service: MockCopyService,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            config: test_config(),
            schema: None,
            schema_failures: 0,
            sample_sheets: MockSampleSheets::new(),
            analyses: MockAnalyses::new(),
            files: MockFileIndex::new(),
            copy_service: MockCopyService::new(),
        }
    }

    pub fn config(mut self, config: CopyConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate drafts against `schema` instead of the built-in one.
    pub fn schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn schema_failures(mut self, times: u32) -> Self {
        self.schema_failures = times;
        self
    }

    pub fn sample_sheet(mut self, instrument_run_id: &str, sheet: &str) -> Self {
        self.sample_sheets = self.sample_sheets.with_sheet(instrument_run_id, sheet);
        self
    }

    pub fn analysis(mut self, project_id: &str, analysis_id: &str, outputs: AnalysisOutputs) -> Self {
        self.analyses = self.analyses.with_outputs(project_id, analysis_id, outputs);
        self
    }

    pub fn pending_sync_checks(mut self, count: u32) -> Self {
        self.files = self.files.with_pending_checks(count);
        self
    }

    pub fn sync_never_done(mut self) -> Self {
        self.files = self.files.never_done();
        self
    }

    pub fn missing_file_prefix(mut self) -> Self {
        self.files = self.files.missing_prefix();
        self
    }

    pub fn rejecting_copy_service(mut self) -> Self {
        self.copy_service = MockCopyService::rejecting();
        self
    }

    pub fn build(self) -> Harness {
        let config = Arc::new(self.config);
        let schema = self
            .schema
            .unwrap_or_else(|| Schema::default_draft(&config.schema.name, &config.schema.version));

        let registry = Arc::new(InMemoryRunRegistry::new());
        let schemas = Arc::new(MockSchemaRegistry::new(schema).failing_times(self.schema_failures));
        let copy_service = Arc::new(self.copy_service);
        let files = Arc::new(self.files);
        let sample_sheets = Arc::new(self.sample_sheets);
        let analyses = Arc::new(self.analyses);
        let publisher = Arc::new(RecordingPublisher::new());

        let machine = WorkflowStateMachine::new(
            config.clone(),
            Collaborators {
                registry: registry.clone(),
                schemas: schemas.clone(),
                copy_service: copy_service.clone(),
                files: files.clone(),
                sample_sheets: sample_sheets.clone(),
                analyses: analyses.clone(),
                publisher: publisher.clone(),
            },
        );

        Harness {
            router: EventRouter::from_config(&config),
            config,
            registry,
            schemas,
            copy_service,
            files,
            sample_sheets,
            analyses,
            publisher,
            machine,
            looped: AtomicUsize::new(0),
        }
    }
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self::new()
    }
}
