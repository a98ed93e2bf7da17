//! The workflow-run state machine.
//!
//! Each stage is one short invocation driven by one routed event. Stages
//! check the run's status before acting and exit quietly when the run has
//! already moved on, so duplicate and out-of-order deliveries never apply a
//! transition twice.

mod draft;
mod execution;
mod validation;

#[cfg(test)]
mod scenarios;

use std::fmt;
use std::sync::Arc;

use serde_json::json;

use bssh_copy_core::capability::{
    AnalysisOutputSource, CopyService, EventPublisher, FileIndexService, RunRegistry,
    SampleSheetSource, SchemaRegistry,
};
use bssh_copy_core::config::CopyConfig;
use bssh_copy_core::error::{CopyError, ErrorKind, Result};
use bssh_copy_core::event::WorkflowRunStateChange;
use bssh_copy_core::router::{Route, Stage};
use bssh_copy_core::run::{fields, RunStatus, WorkflowRun};

use crate::executors::{
    AddPortalRunIdAttributes, CreateRun, FilemanagerSyncCheck, GetRunObject, ListCopyJobs,
    SyncFileManager, ValidateDraft,
};

/// The external collaborators the state machine is built from.
#[derive(Clone)]
pub struct Collaborators {
    pub registry: Arc<dyn RunRegistry>,
    pub schemas: Arc<dyn SchemaRegistry>,
    pub copy_service: Arc<dyn CopyService>,
    pub files: Arc<dyn FileIndexService>,
    pub sample_sheets: Arc<dyn SampleSheetSource>,
    pub analyses: Arc<dyn AnalysisOutputSource>,
    pub publisher: Arc<dyn EventPublisher>,
}

/// How a stage invocation ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    /// The run moved to `status` and the state change was published.
    Published {
        portal_run_id: String,
        status: RunStatus,
    },
    /// Copy jobs were submitted; the run waits for their completion events.
    Suspended {
        portal_run_id: String,
        copy_jobs: usize,
    },
    /// A copy job finished but others are still outstanding.
    Waiting {
        portal_run_id: String,
        remaining: usize,
    },
    /// The draft is not complete yet; nothing was published.
    Incomplete {
        portal_run_id: String,
        reason: String,
    },
    /// The run's precondition no longer holds; nothing was done.
    Skipped { reason: String },
    /// Invalid data stopped the stage; the run keeps its status.
    Halted { reason: String },
}

impl fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Published {
                portal_run_id,
                status,
            } => write!(f, "{} published {}", portal_run_id, status),
            Self::Suspended {
                portal_run_id,
                copy_jobs,
            } => write!(f, "{} awaiting {} copy job(s)", portal_run_id, copy_jobs),
            Self::Waiting {
                portal_run_id,
                remaining,
            } => write!(f, "{} waiting on {} copy job(s)", portal_run_id, remaining),
            Self::Incomplete {
                portal_run_id,
                reason,
            } => write!(f, "{} incomplete: {}", portal_run_id, reason),
            Self::Skipped { reason } => write!(f, "skipped: {}", reason),
            Self::Halted { reason } => write!(f, "halted: {}", reason),
        }
    }
}

/// Sequences the task executors for each stage.
pub struct WorkflowStateMachine {
    config: Arc<CopyConfig>,
    registry: Arc<dyn RunRegistry>,
    publisher: Arc<dyn EventPublisher>,
    create_run: CreateRun,
    validate_draft: ValidateDraft,
    get_run: GetRunObject,
    list_copy_jobs: ListCopyJobs,
    sync_file_manager: SyncFileManager,
    sync_check: FilemanagerSyncCheck,
    tag_attributes: AddPortalRunIdAttributes,
}

impl WorkflowStateMachine {
    pub fn new(config: Arc<CopyConfig>, collaborators: Collaborators) -> Self {
        let Collaborators {
            registry,
            schemas,
            copy_service,
            files,
            sample_sheets,
            analyses,
            publisher,
        } = collaborators;

        Self {
            create_run: CreateRun::new(config.clone(), registry.clone(), sample_sheets.clone()),
            validate_draft: ValidateDraft::new(
                config.clone(),
                registry.clone(),
                schemas,
                sample_sheets,
            ),
            get_run: GetRunObject::new(registry.clone()),
            list_copy_jobs: ListCopyJobs::new(config.clone(), analyses, copy_service),
            sync_file_manager: SyncFileManager::new(files.clone()),
            sync_check: FilemanagerSyncCheck::new(files.clone()),
            tag_attributes: AddPortalRunIdAttributes::new(files),
            config,
            registry,
            publisher,
        }
    }

    pub fn config(&self) -> &CopyConfig {
        &self.config
    }

    /// Read access to runs for callers outside the stages.
    pub fn runs(&self) -> &GetRunObject {
        &self.get_run
    }

    /// Run the stage selected by the router.
    pub async fn handle(&self, route: Route) -> Result<StageOutcome> {
        let stage = route.stage();
        let outcome = match route {
            Route::DraftCreation(trigger) => self.draft_creation(trigger).await,
            Route::Validation(change) => self.validation(change).await,
            Route::Execution(change) => self.execution(change).await,
            Route::CopyCompletion(sync) => self.copy_completion(sync).await,
        };
        match &outcome {
            Ok(outcome) => tracing::info!(stage = %stage, outcome = %outcome, "Stage finished"),
            Err(e) => tracing::error!(stage = %stage, error = %e, "Stage failed"),
        }
        outcome
    }

    /// Operator override: move a non-terminal run to FAILED.
    pub async fn abandon(&self, portal_run_id: &str, reason: &str) -> Result<StageOutcome> {
        tracing::warn!(portal_run_id, reason, "Run abandoned by operator");
        self.fail_run(portal_run_id, "operator", "Abandoned", reason)
            .await
    }

    async fn publish_state(&self, run: &WorkflowRun) -> Result<()> {
        let event = WorkflowRunStateChange::from_run(run).into_envelope(
            &self.config.events.source,
            &self.config.events.state_change_detail_type,
        )?;
        self.publisher.publish(event).await?;
        tracing::info!(
            portal_run_id = %run.portal_run_id,
            status = %run.status,
            "State change published"
        );
        Ok(())
    }

    /// Publish the status a stage moved the run to.
    async fn published(&self, run: &WorkflowRun) -> Result<StageOutcome> {
        self.publish_state(run).await?;
        Ok(StageOutcome::Published {
            portal_run_id: run.portal_run_id.clone(),
            status: run.status,
        })
    }

    /// Move a run to FAILED with failure detail and publish the terminal event.
    async fn fail_run(
        &self,
        portal_run_id: &str,
        stage: &str,
        error_type: &str,
        message: &str,
    ) -> Result<StageOutcome> {
        let current = self.registry.get(portal_run_id).await?;
        if current.status.is_terminal() {
            return Ok(StageOutcome::Skipped {
                reason: format!("run {} is already {}", portal_run_id, current.status),
            });
        }

        let failure = json!({
            "errorType": error_type,
            "message": message,
            "stage": stage,
        });
        let failed = self
            .registry
            .conditional_update(portal_run_id, current.status, &|run| {
                run.payload.insert_path(fields::FAILURE, failure.clone());
                run.transition_to(RunStatus::Failed)
            })
            .await;

        match failed {
            Ok(run) => {
                tracing::error!(portal_run_id, stage, error_type, message, "Run failed");
                self.published(&run).await
            }
            Err(e) if e.kind() == ErrorKind::PreconditionStale => Ok(StageOutcome::Skipped {
                reason: format!("run {} moved on before failing: {}", portal_run_id, e),
            }),
            Err(e) => Err(e),
        }
    }

    /// Turn a stage error into an outcome according to its kind.
    ///
    /// Unknown runs and unretried transient errors propagate so the caller
    /// can redeliver the event. A collaborator's missing resource is fatal.
    async fn settle(&self, stage: Stage, portal_run_id: &str, error: CopyError) -> Result<StageOutcome> {
        match error.kind() {
            ErrorKind::PreconditionStale => {
                tracing::debug!(stage = %stage, portal_run_id, reason = %error, "Precondition no longer holds");
                Ok(StageOutcome::Skipped {
                    reason: error.to_string(),
                })
            }
            ErrorKind::DataInvalid => {
                tracing::warn!(stage = %stage, portal_run_id, error = %error, "Stage halted on invalid data");
                Ok(StageOutcome::Halted {
                    reason: format!("{}: {}", portal_run_id, error),
                })
            }
            ErrorKind::Transient => Err(error),
            ErrorKind::Fatal => match error {
                CopyError::RunNotFound(_) => Err(error),
                _ => {
                    self.fail_run(
                        portal_run_id,
                        stage.as_str(),
                        error.error_type(),
                        &error.to_string(),
                    )
                    .await
                }
            },
        }
    }

    /// Settle an error raised after the run moved to RUNNING.
    ///
    /// No event restarts a run from inside RUNNING, so anything but a lost
    /// race or a vanished run fails it.
    async fn settle_started(
        &self,
        stage: Stage,
        portal_run_id: &str,
        error: CopyError,
    ) -> Result<StageOutcome> {
        let lost_race = error.kind() == ErrorKind::PreconditionStale;
        if lost_race || matches!(error, CopyError::RunNotFound(_)) {
            return self.settle(stage, portal_run_id, error).await;
        }
        self.fail_run(
            portal_run_id,
            stage.as_str(),
            error.error_type(),
            &error.to_string(),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{draft_run, Harness};

    #[tokio::test]
    async fn test_abandon_fails_running_run() {
        let harness = Harness::new();
        let mut run = draft_run("R1", "A1");
        run.transition_to(RunStatus::Ready).unwrap();
        run.transition_to(RunStatus::Running).unwrap();
        let id = run.portal_run_id.clone();
        harness.registry.create_or_get(run).await.unwrap();

        let outcome = harness.machine.abandon(&id, "bad input").await.unwrap();
        assert_eq!(
            outcome,
            StageOutcome::Published {
                portal_run_id: id.clone(),
                status: RunStatus::Failed
            }
        );
        let run = harness.registry.get(&id).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.payload.get_str(&["failure", "errorType"]), Some("Abandoned"));
        harness.publisher.assert_published(RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_abandon_terminal_run_is_skipped() {
        let harness = Harness::new();
        let mut run = draft_run("R1", "A1");
        run.transition_to(RunStatus::Failed).unwrap();
        let id = run.portal_run_id.clone();
        harness.registry.create_or_get(run).await.unwrap();

        let outcome = harness.machine.abandon(&id, "again").await.unwrap();
        assert!(matches!(outcome, StageOutcome::Skipped { .. }));
        assert!(harness.publisher.is_empty());
    }

    #[tokio::test]
    async fn test_abandon_unknown_run() {
        let harness = Harness::new();
        let err = harness.machine.abandon("missing", "x").await.unwrap_err();
        assert!(matches!(err, CopyError::RunNotFound(_)));
    }

    #[test]
    fn test_outcome_display() {
        let outcome = StageOutcome::Waiting {
            portal_run_id: "p1".into(),
            remaining: 1,
        };
        assert_eq!(outcome.to_string(), "p1 waiting on 1 copy job(s)");
    }
}
