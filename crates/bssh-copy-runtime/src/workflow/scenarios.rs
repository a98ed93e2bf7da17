//! Whole-lifecycle scenarios driven through the router with published
//! events looped back in.

use bssh_copy_core::capability::{AnalysisOutputs, RunRegistry};
use bssh_copy_core::run::{fields, RunStatus};

use serde_json::json;

use super::StageOutcome;
use crate::testing::{copy_sync_event, ready_event, upstream_event, Harness, SAMPLE_SHEET};

fn harness() -> Harness {
    Harness::builder()
        .analysis(
            "P1",
            "A1",
            AnalysisOutputs {
                output_uri: "s3://src/".into(),
                interop_uris: Vec::new(),
            },
        )
        .pending_sync_checks(1)
        .build()
}

fn status_rank(status: RunStatus) -> u8 {
    match status {
        RunStatus::Draft => 0,
        RunStatus::Ready => 1,
        RunStatus::Running => 2,
        RunStatus::Succeeded | RunStatus::Failed => 3,
    }
}

#[tokio::test]
async fn test_late_sample_sheet_then_copy_to_success() {
    let harness = harness();
    let trigger = upstream_event("R1", "A1", "P1");
    assert_eq!(trigger.detail_str(&["workflow", "name"]), Some("BclConvert"));
    assert_eq!(trigger.detail_str(&["projectId"]), Some("P1"));

    // The sheet is not there yet: a DRAFT is created but cannot be validated.
    let outcomes = harness.feed(trigger.clone()).await.unwrap();
    assert_eq!(outcomes.len(), 2);
    assert!(matches!(
        outcomes[0],
        StageOutcome::Published {
            status: RunStatus::Draft,
            ..
        }
    ));
    assert!(matches!(outcomes[1], StageOutcome::Incomplete { .. }));

    let runs = harness.registry.list(None).await.unwrap();
    assert_eq!(runs.len(), 1);
    let portal_run_id = runs[0].portal_run_id.clone();

    // Upstream redelivers once the sheet has landed.
    harness.sample_sheets.set_sheet("R1", SAMPLE_SHEET);
    let outcomes = harness.feed(trigger).await.unwrap();
    assert_eq!(
        outcomes.last(),
        Some(&StageOutcome::Suspended {
            portal_run_id: portal_run_id.clone(),
            copy_jobs: 1,
        })
    );

    let run = harness.registry.get(&portal_run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Running);
    assert_eq!(run.linked_libraries.iter().collect::<Vec<_>>(), vec!["L1"]);
    assert_eq!(harness.copy_service.call_count(), 1);
    let submissions = harness.copy_service.submissions();
    assert_eq!(submissions[0].spec.destination_uri, "s3://cache/primary/R1/");
    assert_eq!(submissions[0].spec.source_uri_list, vec!["s3://src/"]);

    let ready = harness
        .publisher
        .events()
        .into_iter()
        .find(|e| e.detail_str(&["status"]) == Some("READY"))
        .unwrap();
    assert_eq!(ready.detail["linkedLibraries"], json!(["L1"]));
    assert_eq!(ready.detail_str(&["portalRunId"]), Some(portal_run_id.as_str()));
    assert_eq!(
        ready.detail_str(&["payload", "data", "inputs", "bsshProjectId"]),
        Some("P1")
    );
    assert_eq!(
        ready.detail_str(&["payload", "data", "engineParameters", "outputUri"]),
        Some("s3://cache/primary/R1/")
    );

    let outcomes = harness
        .feed(copy_sync_event("s3://cache/primary/R1/", &["s3://src/"], "SUCCEEDED"))
        .await
        .unwrap();
    assert_eq!(
        outcomes,
        vec![StageOutcome::Published {
            portal_run_id: portal_run_id.clone(),
            status: RunStatus::Succeeded,
        }]
    );

    let run = harness.registry.get(&portal_run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Succeeded);
    assert!(run.execution.is_none());
    assert!(run.payload.get_path(fields::COPY_JOB_IDS).is_some());
    assert_eq!(harness.files.triggers(), vec!["s3://cache/primary/R1/"]);
    assert_eq!(
        harness
            .files
            .attributes("s3://cache/primary/R1/")
            .and_then(|a| a.get("portalRunId").cloned()),
        Some(serde_json::Value::from(portal_run_id.as_str()))
    );

    assert_eq!(
        harness.publisher.statuses(),
        vec![
            RunStatus::Draft,
            RunStatus::Draft,
            RunStatus::Ready,
            RunStatus::Succeeded
        ]
    );
    harness.publisher.assert_not_published(RunStatus::Failed);
}

#[tokio::test]
async fn test_replayed_events_never_regress_status() {
    let harness = harness();
    harness.sample_sheets.set_sheet("R1", SAMPLE_SHEET);

    let upstream = upstream_event("R1", "A1", "P1");
    let completion = copy_sync_event("s3://cache/primary/R1/", &["s3://src/"], "SUCCEEDED");
    harness.feed(upstream.clone()).await.unwrap();
    harness.feed(completion.clone()).await.unwrap();

    let runs = harness.registry.list(None).await.unwrap();
    assert_eq!(runs.len(), 1);
    let portal_run_id = runs[0].portal_run_id.clone();
    assert_eq!(runs[0].status, RunStatus::Succeeded);

    let published = harness.publisher.events();
    let published_count = published.len();
    let mut replay = vec![upstream, completion];
    replay.extend(published.iter().cloned());
    replay.extend(published.into_iter().rev());

    let mut last_rank = status_rank(RunStatus::Succeeded);
    for event in replay {
        let outcome = harness.deliver(event).await.unwrap();
        assert!(
            matches!(outcome, None | Some(StageOutcome::Skipped { .. })),
            "replay did work: {:?}",
            outcome
        );
        let status = harness.registry.get(&portal_run_id).await.unwrap().status;
        assert!(status_rank(status) >= last_rank);
        last_rank = status_rank(status);
    }

    assert_eq!(harness.publisher.len(), published_count);
    assert_eq!(harness.copy_service.call_count(), 1);
    assert_eq!(harness.registry.list(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_ready_event_before_validation_is_ignored() {
    let harness = harness();
    harness.feed(upstream_event("R1", "A1", "P1")).await.unwrap();
    let run = harness.registry.list(None).await.unwrap().remove(0);
    assert_eq!(run.status, RunStatus::Draft);

    // A READY event for a run that is still DRAFT must not start it.
    let outcome = harness.deliver(ready_event(&run)).await.unwrap();
    assert!(matches!(outcome, Some(StageOutcome::Skipped { .. })));
    assert_eq!(
        harness.registry.get(&run.portal_run_id).await.unwrap().status,
        RunStatus::Draft
    );
    assert_eq!(harness.copy_service.call_count(), 0);
}

#[tokio::test]
async fn test_copy_failure_ends_lifecycle_in_failed() {
    let harness = harness();
    harness.sample_sheets.set_sheet("R1", SAMPLE_SHEET);
    harness.feed(upstream_event("R1", "A1", "P1")).await.unwrap();

    let outcomes = harness
        .feed(copy_sync_event("s3://cache/primary/R1/", &["s3://src/"], "FAILED"))
        .await
        .unwrap();
    assert!(matches!(
        outcomes.as_slice(),
        [StageOutcome::Published {
            status: RunStatus::Failed,
            ..
        }]
    ));

    let run = harness.registry.list(None).await.unwrap().remove(0);
    assert_eq!(run.payload.get_str(&["failure", "errorType"]), Some("CopyJobFailed"));
    assert_eq!(run.payload.get_str(&["failure", "stage"]), Some("copy_completion"));
    harness.publisher.assert_not_published(RunStatus::Succeeded);
    assert!(harness.files.triggers().is_empty());
}
