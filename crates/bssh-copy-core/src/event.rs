//! Event bus wire formats.
//!
//! Inbound events arrive as bus envelopes (`source`, `detail-type`,
//! `detail`). The detail is kept as raw JSON until the router has picked a
//! stage, then narrowed to one of the typed views below.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{CopyError, Result};
use crate::run::{deserialize_libraries, CopyJobStatus, Payload, RunStatus, WorkflowRef, WorkflowRun};

/// An event as carried on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub source: String,
    #[serde(rename = "detail-type", alias = "detailType")]
    pub detail_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub detail: Value,
}

impl EventEnvelope {
    /// Build an outbound envelope with a fresh id.
    pub fn new(source: impl Into<String>, detail_type: impl Into<String>, detail: Value) -> Self {
        Self {
            id: Some(Uuid::new_v4().to_string()),
            source: source.into(),
            detail_type: detail_type.into(),
            time: Some(Utc::now()),
            detail,
        }
    }

    /// Parse one envelope from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| CopyError::InvalidEvent(e.to_string()))
    }

    /// String value at a dotted path inside `detail`.
    pub fn detail_str(&self, path: &[&str]) -> Option<&str> {
        lookup(&self.detail, path).and_then(Value::as_str)
    }

    /// Whether a (non-null) value exists at a dotted path inside `detail`.
    pub fn detail_has(&self, path: &[&str]) -> bool {
        lookup(&self.detail, path).is_some_and(|v| !v.is_null())
    }
}

fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter()
        .try_fold(value, |current, key| current.as_object()?.get(*key))
}

/// Detail of a `WorkflowRunStateChange` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRunStateChange {
    pub status: RunStatus,
    pub timestamp: DateTime<Utc>,
    pub workflow: WorkflowRef,
    pub workflow_run_name: String,
    pub portal_run_id: String,
    #[serde(default, deserialize_with = "deserialize_libraries")]
    pub linked_libraries: BTreeSet<String>,
    #[serde(default)]
    pub payload: Payload,
}

impl WorkflowRunStateChange {
    /// Snapshot a run for publication.
    pub fn from_run(run: &WorkflowRun) -> Self {
        Self {
            status: run.status,
            timestamp: run.timestamp,
            workflow: run.workflow.clone(),
            workflow_run_name: run.workflow_run_name.clone(),
            portal_run_id: run.portal_run_id.clone(),
            linked_libraries: run.linked_libraries.clone(),
            payload: run.payload.clone(),
        }
    }

    /// Wrap into a bus envelope.
    pub fn into_envelope(self, source: &str, detail_type: &str) -> Result<EventEnvelope> {
        let detail = serde_json::to_value(&self)?;
        Ok(EventEnvelope::new(source, detail_type, detail))
    }
}

/// The identifiers carried by an upstream success event.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamTrigger {
    pub instrument_run_id: String,
    pub analysis_id: String,
    pub project_id: String,
    /// Tags forwarded from the upstream payload.
    pub tags: Map<String, Value>,
    /// Libraries already linked on the upstream run.
    pub linked_libraries: BTreeSet<String>,
}

const INSTRUMENT_RUN_ID_PATHS: &[&[&str]] = &[
    &["instrumentRunId"],
    &["payload", "data", "tags", "instrumentRunId"],
    &["payload", "data", "inputs", "instrumentRunId"],
];

const ANALYSIS_ID_PATHS: &[&[&str]] = &[
    &["analysisId"],
    &["payload", "data", "engineParameters", "analysisId"],
    &["payload", "data", "inputs", "analysisId"],
    &["payload", "data", "tags", "analysisId"],
];

const PROJECT_ID_PATHS: &[&[&str]] = &[
    &["projectId"],
    &["payload", "data", "engineParameters", "projectId"],
    &["payload", "data", "inputs", "projectId"],
    &["payload", "data", "tags", "projectId"],
];

fn first_str(detail: &Value, paths: &[&[&str]]) -> Option<String> {
    paths
        .iter()
        .filter_map(|path| lookup(detail, path).and_then(Value::as_str))
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

impl UpstreamTrigger {
    /// Extract the trigger fields from an upstream event detail.
    ///
    /// Identifiers are read from the top level of the detail first, then
    /// from the upstream payload.
    pub fn from_detail(detail: &Value) -> Result<Self> {
        let required = |name: &str, paths: &[&[&str]]| {
            first_str(detail, paths).ok_or_else(|| {
                CopyError::InvalidEvent(format!("upstream event has no {}", name))
            })
        };

        let instrument_run_id = required("instrumentRunId", INSTRUMENT_RUN_ID_PATHS)?;
        let analysis_id = required("analysisId", ANALYSIS_ID_PATHS)?;
        let project_id = required("projectId", PROJECT_ID_PATHS)?;

        let tags = lookup(detail, &["payload", "data", "tags"])
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let linked_libraries = match detail.get("linkedLibraries") {
            Some(value) => deserialize_libraries(value.clone())?,
            None => BTreeSet::new(),
        };

        Ok(Self {
            instrument_run_id,
            analysis_id,
            project_id,
            tags,
            linked_libraries,
        })
    }
}

/// Source and destination reported by the copy service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataCopyPayload {
    pub source_uri_list: Vec<String>,
    pub destination_uri: String,
}

/// Detail of a `DataCopySync` completion event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataCopySync {
    #[serde(default)]
    pub job_id: Option<String>,
    /// Absent status means the copy completed.
    #[serde(default = "default_copy_status")]
    pub status: CopyJobStatus,
    #[serde(default)]
    pub error_message: Option<String>,
    pub payload: DataCopyPayload,
}

fn default_copy_status() -> CopyJobStatus {
    CopyJobStatus::Succeeded
}

impl DataCopySync {
    /// Parse from an event detail.
    pub fn from_detail(detail: &Value) -> Result<Self> {
        serde_json::from_value(detail.clone())
            .map_err(|e| CopyError::InvalidEvent(format!("bad copy sync event: {}", e)))
    }
}
