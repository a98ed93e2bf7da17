//! Testing utilities.
//!
//! Mock collaborators that record their calls, a [`Harness`] that wires them
//! into a state machine over an in-memory registry, and builders for the
//! events the router understands.

mod context;
mod mock;

pub use context::{Harness, HarnessBuilder};
pub use mock::{
    MockAnalyses, MockCopyService, MockFileIndex, MockSampleSheets, MockSchemaRegistry,
    RecordingPublisher, Submission,
};

use chrono::Utc;
use serde_json::{json, Value};

use bssh_copy_core::config::{CopyConfig, EventsConfig, OutputConfig, RetryPolicy};
use bssh_copy_core::event::{EventEnvelope, WorkflowRunStateChange};
use bssh_copy_core::run::{derive_run_name, generate_portal_run_id, RunStatus, WorkflowRef, WorkflowRun};

/// A v2 sample sheet with a single library, `L1`.
pub const SAMPLE_SHEET: &str = "\
[Header]
FileFormatVersion,2
RunName,R1

[BCLConvert_Settings]
AdapterRead1,CTGTCTCTTATACACATCT

[BCLConvert_Data]
Lane,Sample_ID,index,index2
1,L1,ACGTACGT,TGCATGCA
";

/// Project id used by [`draft_run`].
pub const TEST_PROJECT_ID: &str = "P1";

/// Defaults with an `s3://cache/primary/<run>/` output prefix, the whole
/// analysis folder as copy source and zero-delay retries.
pub fn test_config() -> CopyConfig {
    let mut config = CopyConfig {
        output: OutputConfig {
            uri_template: "s3://cache/primary/{instrumentRunId}/".into(),
        },
        retry: RetryPolicy::immediate(3),
        sync_poll: RetryPolicy::immediate(5),
        ..Default::default()
    };
    config.copy.include_dirs.clear();
    config
}

/// A complete DRAFT run, as the draft stage would create it, minus libraries.
pub fn draft_run(instrument_run_id: &str, analysis_id: &str) -> WorkflowRun {
    let config = test_config();
    let mut run = WorkflowRun::new_draft(
        generate_portal_run_id(Utc::now()),
        derive_run_name(
            &config.workflow.run_name_prefix,
            instrument_run_id,
            analysis_id,
        ),
        WorkflowRef {
            name: config.workflow.name.clone(),
            version: config.workflow.version.clone(),
        },
        config.workflow.payload_version.clone(),
    );
    let identifiers = json!({
        "instrumentRunId": instrument_run_id,
        "bsshProjectId": TEST_PROJECT_ID,
        "bsshAnalysisId": analysis_id,
    });
    run.payload.insert_path(&["tags"], identifiers.clone());
    run.payload.insert_path(&["inputs"], identifiers);
    run.payload.insert_path(
        &["engineParameters", "outputUri"],
        Value::from(config.output.render(instrument_run_id, &run.portal_run_id)),
    );
    run
}

/// Upstream success event for the configured upstream workflow.
pub fn upstream_event(instrument_run_id: &str, analysis_id: &str, project_id: &str) -> EventEnvelope {
    let events = EventsConfig::default();
    EventEnvelope::new(
        events.upstream_source,
        events.state_change_detail_type,
        json!({
            "status": "SUCCEEDED",
            "timestamp": Utc::now(),
            "workflow": {"name": "BclConvert", "version": "4.2.7"},
            "workflowRunName": format!("umccr--automated--bclconvert--{}", instrument_run_id),
            "portalRunId": "20250101deadbeef",
            "instrumentRunId": instrument_run_id,
            "analysisId": analysis_id,
            "projectId": project_id,
        }),
    )
}

/// This system's own state change for `run`, with `status` overridden.
pub fn state_change_event(run: &WorkflowRun, status: RunStatus) -> EventEnvelope {
    let events = EventsConfig::default();
    let mut change = WorkflowRunStateChange::from_run(run);
    change.status = status;
    let detail = serde_json::to_value(&change).unwrap_or(Value::Null);
    EventEnvelope::new(events.source, events.state_change_detail_type, detail)
}

pub fn draft_event(run: &WorkflowRun) -> EventEnvelope {
    state_change_event(run, RunStatus::Draft)
}

pub fn ready_event(run: &WorkflowRun) -> EventEnvelope {
    state_change_event(run, RunStatus::Ready)
}

/// Copy service completion for a destination and its sources.
pub fn copy_sync_event(destination_uri: &str, sources: &[&str], status: &str) -> EventEnvelope {
    let events = EventsConfig::default();
    EventEnvelope::new(
        events.copy_service_source,
        events.copy_sync_detail_type,
        json!({
            "status": status,
            "payload": {
                "sourceUriList": sources,
                "destinationUri": destination_uri,
            }
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use bssh_copy_core::samplesheet;
    use bssh_copy_core::schema::Schema;

    #[test]
    fn test_fixtures_are_consistent() {
        let libraries = samplesheet::library_ids(SAMPLE_SHEET).unwrap();
        assert_eq!(libraries.into_iter().collect::<Vec<_>>(), vec!["L1"]);

        let run = draft_run("R1", "A1");
        assert_eq!(run.output_uri(), Some("s3://cache/primary/R1/"));
        let schema = Schema::default_draft("draft", "1");
        assert!(schema.check_data(&run.payload.data).is_ok());
        assert!(test_config().validate().is_ok());
    }
}
