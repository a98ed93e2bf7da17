use serde_json::Value;

use bssh_copy_core::error::{CopyError, Result};
use bssh_copy_core::event::{DataCopySync, WorkflowRunStateChange};
use bssh_copy_core::router::Stage;
use bssh_copy_core::run::{
    fields, CopyJobStatus, ExecutionPhase, ExecutionState, RunStatus, WorkflowRun,
};

use super::{StageOutcome, WorkflowStateMachine};
use crate::retry::{poll_until_done, with_retry};

impl WorkflowStateMachine {
    /// Own READY event: start the run and submit its copy jobs.
    ///
    /// Copy jobs are planned while the run is still READY, so a listing
    /// problem halts the stage and a redelivered READY event can retry it.
    /// The stage ends once the jobs are recorded on the run as awaiting
    /// copy. Completion events from the copy service resume it.
    pub(super) async fn execution(&self, change: WorkflowRunStateChange) -> Result<StageOutcome> {
        let portal_run_id = change.portal_run_id;
        let run = self.get_run.execute(&portal_run_id).await?;
        if run.status != RunStatus::Ready {
            return Ok(StageOutcome::Skipped {
                reason: format!("run {} is {}, not READY", portal_run_id, run.status),
            });
        }

        let ready = &run;
        let planned = with_retry(&self.config.retry, "list_copy_jobs", move || {
            self.list_copy_jobs.prepare(ready)
        })
        .await;
        let specs = match planned {
            Ok(specs) => specs,
            Err(e) => return self.settle(Stage::Execution, &portal_run_id, e).await,
        };

        let started = self
            .registry
            .conditional_update(&portal_run_id, RunStatus::Ready, &|run| {
                run.transition_to(RunStatus::Running)?;
                run.execution = Some(ExecutionState::submitting());
                Ok(())
            })
            .await;
        let running = match started {
            Ok(run) => run,
            Err(e) => return self.settle(Stage::Execution, &portal_run_id, e).await,
        };
        tracing::info!(portal_run_id = %portal_run_id, "Run started");

        let running = &running;
        let specs = &specs;
        let submitted = with_retry(&self.config.retry, "submit_copy_jobs", move || {
            self.list_copy_jobs.submit(running, specs.clone())
        })
        .await;
        let jobs = match submitted {
            Ok(jobs) => jobs,
            Err(e) => return self.settle_started(Stage::Execution, &portal_run_id, e).await,
        };

        let job_ids: Vec<Value> = jobs.iter().map(|j| Value::from(j.job_id.as_str())).collect();
        let parked = self
            .registry
            .conditional_update(&portal_run_id, RunStatus::Running, &|run| {
                let execution = run.execution_mut()?;
                if execution.phase != ExecutionPhase::Submitting {
                    return Err(CopyError::StalePhase(format!(
                        "copy jobs already recorded ({:?})",
                        execution.phase
                    )));
                }
                execution.copy_jobs = jobs.clone();
                execution.phase = ExecutionPhase::AwaitingCopy;
                run.payload
                    .insert_path(fields::COPY_JOB_IDS, Value::Array(job_ids.clone()));
                Ok(())
            })
            .await;

        match parked {
            Ok(_) => {
                tracing::info!(
                    portal_run_id = %portal_run_id,
                    copy_jobs = jobs.len(),
                    "Awaiting copy completion"
                );
                Ok(StageOutcome::Suspended {
                    portal_run_id,
                    copy_jobs: jobs.len(),
                })
            }
            Err(e) => self.settle_started(Stage::Execution, &portal_run_id, e).await,
        }
    }

    /// Copy service completion: record it, and once every job of the run
    /// has succeeded finish the post-copy steps.
    pub(super) async fn copy_completion(&self, sync: DataCopySync) -> Result<StageOutcome> {
        let found = self
            .registry
            .find_awaiting_copy(
                sync.job_id.as_deref(),
                &sync.payload.destination_uri,
                &sync.payload.source_uri_list,
            )
            .await?;
        let Some(run) = found else {
            return Ok(StageOutcome::Skipped {
                reason: format!(
                    "no run awaiting copy to {}",
                    sync.payload.destination_uri
                ),
            });
        };
        let portal_run_id = run.portal_run_id.clone();

        match sync.status {
            CopyJobStatus::Succeeded => {}
            CopyJobStatus::Failed => {
                let job_id = sync
                    .job_id
                    .clone()
                    .unwrap_or_else(|| sync.payload.destination_uri.clone());
                let error = CopyError::CopyJobFailed {
                    job_id,
                    message: sync
                        .error_message
                        .clone()
                        .unwrap_or_else(|| "copy service reported failure".into()),
                };
                return self.settle(Stage::CopyCompletion, &portal_run_id, error).await;
            }
            status => {
                return Ok(StageOutcome::Skipped {
                    reason: format!("copy job for {} is {}", portal_run_id, status),
                });
            }
        }

        let recorded = self
            .registry
            .conditional_update(&portal_run_id, RunStatus::Running, &|run| {
                if !run.is_awaiting_copy() {
                    return Err(CopyError::StalePhase(format!(
                        "run {} is not awaiting copy",
                        run.portal_run_id
                    )));
                }
                let execution = run.execution_mut()?;
                let job = execution
                    .find_job_mut(
                        sync.job_id.as_deref(),
                        &sync.payload.destination_uri,
                        &sync.payload.source_uri_list,
                    )
                    .ok_or_else(|| CopyError::StalePhase("copy job no longer tracked".into()))?;
                job.job_status = CopyJobStatus::Succeeded;
                // Flipping to PostCopy claims the post-copy steps for this call.
                if execution.all_copies_succeeded() {
                    execution.phase = ExecutionPhase::PostCopy;
                }
                Ok(())
            })
            .await;
        let run = match recorded {
            Ok(run) => run,
            Err(e) => return self.settle(Stage::CopyCompletion, &portal_run_id, e).await,
        };

        if run.is_awaiting_copy() {
            let remaining = run
                .execution
                .as_ref()
                .map(|e| {
                    e.copy_jobs
                        .iter()
                        .filter(|j| j.job_status != CopyJobStatus::Succeeded)
                        .count()
                })
                .unwrap_or_default();
            return Ok(StageOutcome::Waiting {
                portal_run_id,
                remaining,
            });
        }

        match self.post_copy(&run).await {
            Ok(done) => self.published(&done).await,
            Err(e) => self.settle_started(Stage::CopyCompletion, &portal_run_id, e).await,
        }
    }

    /// File-manager sync, bounded sync poll, tagging, then SUCCEEDED.
    async fn post_copy(&self, run: &WorkflowRun) -> Result<WorkflowRun> {
        let portal_run_id = run.portal_run_id.as_str();
        let output_uri = run.output_uri().ok_or_else(|| {
            CopyError::Internal(format!("run {} has no output URI", portal_run_id))
        })?;

        let token = with_retry(&self.config.retry, "sync_file_manager", move || {
            self.sync_file_manager.execute(portal_run_id, output_uri)
        })
        .await?;
        self.registry
            .conditional_update(portal_run_id, RunStatus::Running, &|run| {
                run.execution_mut()?.sync_token = Some(token.clone());
                Ok(())
            })
            .await?;

        let token = token.as_str();
        let attempts = poll_until_done(&self.config.sync_poll, move || {
            self.sync_check.execute(token)
        })
        .await?;
        tracing::info!(portal_run_id, attempts, "File manager caught up");

        with_retry(&self.config.retry, "add_portal_run_id_attributes", move || {
            self.tag_attributes.execute(portal_run_id, output_uri)
        })
        .await?;

        self.registry
            .conditional_update(portal_run_id, RunStatus::Running, &|run| {
                run.transition_to(RunStatus::Succeeded)?;
                run.execution = None;
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{copy_sync_event, draft_run, ready_event, Harness};
    use bssh_copy_core::capability::{AnalysisOutputs, RunRegistry};

    fn ready_run() -> WorkflowRun {
        let mut run = draft_run("R1", "A1");
        run.link_libraries(["L1"]);
        run.transition_to(RunStatus::Ready).unwrap();
        run
    }

    fn single_folder() -> AnalysisOutputs {
        AnalysisOutputs {
            output_uri: "s3://src/".into(),
            interop_uris: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_ready_run_is_started_and_suspended() {
        let harness = Harness::builder()
            .analysis("P1", "A1", single_folder())
            .build();
        let run = ready_run();
        harness.registry.create_or_get(run.clone()).await.unwrap();

        let outcome = harness.deliver(ready_event(&run)).await.unwrap();
        assert_eq!(
            outcome,
            Some(StageOutcome::Suspended {
                portal_run_id: run.portal_run_id.clone(),
                copy_jobs: 1
            })
        );

        let stored = harness.registry.get(&run.portal_run_id).await.unwrap();
        assert_eq!(stored.status, RunStatus::Running);
        assert!(stored.is_awaiting_copy());
        assert_eq!(
            stored.payload.get_path(fields::COPY_JOB_IDS),
            Some(&serde_json::json!(["copy-job-1"]))
        );
        assert_eq!(harness.copy_service.submissions().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_ready_event_submits_once() {
        let harness = Harness::builder()
            .analysis("P1", "A1", single_folder())
            .build();
        let run = ready_run();
        harness.registry.create_or_get(run.clone()).await.unwrap();

        harness.deliver(ready_event(&run)).await.unwrap();
        let outcome = harness.deliver(ready_event(&run)).await.unwrap();
        assert!(matches!(outcome, Some(StageOutcome::Skipped { .. })));
        assert_eq!(harness.copy_service.call_count(), 1);
    }

    #[tokio::test]
    async fn test_malformed_listing_halts_at_ready_until_redelivered() {
        let harness = Harness::builder()
            .analysis(
                "P1",
                "A1",
                AnalysisOutputs {
                    output_uri: String::new(),
                    interop_uris: Vec::new(),
                },
            )
            .build();
        let run = ready_run();
        harness.registry.create_or_get(run.clone()).await.unwrap();

        let outcome = harness.deliver(ready_event(&run)).await.unwrap();
        assert!(matches!(outcome, Some(StageOutcome::Halted { .. })));
        let stored = harness.registry.get(&run.portal_run_id).await.unwrap();
        assert_eq!(stored.status, RunStatus::Ready);
        assert!(stored.execution.is_none());
        assert_eq!(harness.copy_service.call_count(), 0);
        assert!(harness.publisher.is_empty());

        harness.analyses.set_outputs("P1", "A1", single_folder());
        let outcome = harness.deliver(ready_event(&run)).await.unwrap();
        assert_eq!(
            outcome,
            Some(StageOutcome::Suspended {
                portal_run_id: run.portal_run_id.clone(),
                copy_jobs: 1
            })
        );

        let outcome = harness
            .deliver(copy_sync_event("s3://cache/primary/R1/", &["s3://src/"], "SUCCEEDED"))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            Some(StageOutcome::Published {
                status: RunStatus::Succeeded,
                ..
            })
        ));
        assert_eq!(
            harness.publisher.statuses(),
            vec![RunStatus::Succeeded]
        );
    }

    #[tokio::test]
    async fn test_unlisted_analysis_fails_run_before_start() {
        let harness = Harness::new();
        let run = ready_run();
        harness.registry.create_or_get(run.clone()).await.unwrap();

        let outcome = harness.deliver(ready_event(&run)).await.unwrap();
        assert!(matches!(
            outcome,
            Some(StageOutcome::Published {
                status: RunStatus::Failed,
                ..
            })
        ));
        let stored = harness.registry.get(&run.portal_run_id).await.unwrap();
        assert_eq!(
            stored.payload.get_str(&["failure", "errorType"]),
            Some("RetriesExhausted")
        );
        assert!(stored.execution.is_none());
        assert_eq!(harness.copy_service.call_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_collaborator_resource_fails_started_run() {
        let harness = Harness::builder()
            .analysis("P1", "A1", single_folder())
            .missing_file_prefix()
            .build();
        let run = suspended(&harness).await;

        let outcome = harness
            .deliver(copy_sync_event("s3://cache/primary/R1/", &["s3://src/"], "SUCCEEDED"))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            Some(StageOutcome::Published {
                status: RunStatus::Failed,
                ..
            })
        ));
        let stored = harness.registry.get(&run.portal_run_id).await.unwrap();
        assert_eq!(stored.payload.get_str(&["failure", "errorType"]), Some("NotFound"));
        assert_eq!(
            stored.payload.get_str(&["failure", "stage"]),
            Some("copy_completion")
        );
    }

    #[tokio::test]
    async fn test_rejected_submission_fails_run() {
        let harness = Harness::builder()
            .analysis("P1", "A1", single_folder())
            .rejecting_copy_service()
            .build();
        let run = ready_run();
        harness.registry.create_or_get(run.clone()).await.unwrap();

        harness.deliver(ready_event(&run)).await.unwrap();
        let stored = harness.registry.get(&run.portal_run_id).await.unwrap();
        assert_eq!(stored.status, RunStatus::Failed);
        assert_eq!(stored.payload.get_str(&["failure", "stage"]), Some("execution"));
        harness.publisher.assert_published(RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_unknown_run_is_not_found() {
        let harness = Harness::new();
        let err = harness.deliver(ready_event(&ready_run())).await.unwrap_err();
        assert!(matches!(err, CopyError::RunNotFound(_)));
    }

    async fn suspended(harness: &Harness) -> WorkflowRun {
        let run = ready_run();
        harness.registry.create_or_get(run.clone()).await.unwrap();
        harness.deliver(ready_event(&run)).await.unwrap();
        harness.registry.get(&run.portal_run_id).await.unwrap()
    }

    #[tokio::test]
    async fn test_copy_success_completes_run() {
        let harness = Harness::builder()
            .analysis("P1", "A1", single_folder())
            .pending_sync_checks(2)
            .build();
        let run = suspended(&harness).await;

        let outcome = harness
            .deliver(copy_sync_event("s3://cache/primary/R1/", &["s3://src/"], "SUCCEEDED"))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            Some(StageOutcome::Published {
                status: RunStatus::Succeeded,
                ..
            })
        ));

        let stored = harness.registry.get(&run.portal_run_id).await.unwrap();
        assert_eq!(stored.status, RunStatus::Succeeded);
        assert!(stored.execution.is_none());
        assert_eq!(harness.files.check_count(), 3);
        assert_eq!(harness.files.triggers(), vec!["s3://cache/primary/R1/"]);
        let tags = harness.files.attributes("s3://cache/primary/R1/").unwrap();
        assert_eq!(tags["portalRunId"], run.portal_run_id.as_str());
    }

    #[tokio::test]
    async fn test_sync_timeout_fails_run() {
        let harness = Harness::builder()
            .analysis("P1", "A1", single_folder())
            .sync_never_done()
            .build();
        let run = suspended(&harness).await;

        harness
            .deliver(copy_sync_event("s3://cache/primary/R1/", &["s3://src/"], "SUCCEEDED"))
            .await
            .unwrap();

        let stored = harness.registry.get(&run.portal_run_id).await.unwrap();
        assert_eq!(stored.status, RunStatus::Failed);
        assert_eq!(stored.payload.get_str(&["failure", "errorType"]), Some("SyncTimeout"));
        assert_eq!(harness.files.check_count(), harness.config.sync_poll.max_attempts);
        harness.publisher.assert_published(RunStatus::Failed);
        harness.publisher.assert_not_published(RunStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_copy_failure_fails_run() {
        let harness = Harness::builder()
            .analysis("P1", "A1", single_folder())
            .build();
        let run = suspended(&harness).await;

        harness
            .deliver(copy_sync_event("s3://cache/primary/R1/", &["s3://src/"], "FAILED"))
            .await
            .unwrap();
        let stored = harness.registry.get(&run.portal_run_id).await.unwrap();
        assert_eq!(stored.status, RunStatus::Failed);
        assert_eq!(stored.payload.get_str(&["failure", "errorType"]), Some("CopyJobFailed"));
    }

    #[tokio::test]
    async fn test_waits_for_every_copy_job() {
        let harness = Harness::builder()
            .analysis(
                "P1",
                "A1",
                AnalysisOutputs {
                    output_uri: "s3://src/".into(),
                    interop_uris: vec!["s3://run/InterOp/TileMetricsOut.bin".into()],
                },
            )
            .build();
        let run = suspended(&harness).await;

        let first = harness
            .deliver(copy_sync_event("s3://cache/primary/R1/", &["s3://src/"], "SUCCEEDED"))
            .await
            .unwrap();
        assert_eq!(
            first,
            Some(StageOutcome::Waiting {
                portal_run_id: run.portal_run_id.clone(),
                remaining: 1
            })
        );

        let interop = harness.copy_service.submissions()[1].spec.clone();
        let sources: Vec<&str> = interop.source_uri_list.iter().map(String::as_str).collect();
        let second = harness
            .deliver(copy_sync_event(&interop.destination_uri, &sources, "SUCCEEDED"))
            .await
            .unwrap();
        assert!(matches!(
            second,
            Some(StageOutcome::Published {
                status: RunStatus::Succeeded,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_duplicate_completion_is_skipped() {
        let harness = Harness::builder()
            .analysis("P1", "A1", single_folder())
            .build();
        suspended(&harness).await;

        let event = copy_sync_event("s3://cache/primary/R1/", &["s3://src/"], "SUCCEEDED");
        harness.deliver(event.clone()).await.unwrap();
        let again = harness.deliver(event).await.unwrap();
        assert!(matches!(again, Some(StageOutcome::Skipped { .. })));
        assert_eq!(
            harness.publisher.statuses(),
            vec![RunStatus::Succeeded]
        );
    }

    #[tokio::test]
    async fn test_unmatched_completion_is_skipped() {
        let harness = Harness::new();
        let outcome = harness
            .deliver(copy_sync_event("s3://elsewhere/", &["s3://src/"], "SUCCEEDED"))
            .await
            .unwrap();
        assert!(matches!(outcome, Some(StageOutcome::Skipped { .. })));
    }
}
