//! Pattern-match inbound events to a workflow stage.

use std::fmt;

use crate::config::CopyConfig;
use crate::error::{CopyError, Result};
use crate::event::{DataCopySync, EventEnvelope, UpstreamTrigger, WorkflowRunStateChange};
use crate::run::RunStatus;

/// The workflow stages an event can invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Upstream success creates a DRAFT run.
    DraftCreation,
    /// Own DRAFT event validates the run.
    Validation,
    /// Own READY event starts execution.
    Execution,
    /// Copy service completion resumes a suspended execution.
    CopyCompletion,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DraftCreation => "draft_creation",
            Self::Validation => "validation",
            Self::Execution => "execution",
            Self::CopyCompletion => "copy_completion",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A routed event, narrowed to the input of its stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    DraftCreation(UpstreamTrigger),
    Validation(WorkflowRunStateChange),
    Execution(WorkflowRunStateChange),
    CopyCompletion(DataCopySync),
}

impl Route {
    pub fn stage(&self) -> Stage {
        match self {
            Self::DraftCreation(_) => Stage::DraftCreation,
            Self::Validation(_) => Stage::Validation,
            Self::Execution(_) => Stage::Execution,
            Self::CopyCompletion(_) => Stage::CopyCompletion,
        }
    }
}

/// One match rule keyed by source, detail type, status and workflow name.
#[derive(Debug, Clone)]
pub struct RoutingRule {
    pub stage: Stage,
    pub source: String,
    pub detail_type: String,
    /// Compared case-insensitively against `detail.status`.
    pub status: Option<String>,
    /// Compared case-insensitively against `detail.workflow.name`.
    pub workflow_name: Option<String>,
    /// Detail paths that must be present.
    pub required_paths: Vec<&'static [&'static str]>,
}

impl RoutingRule {
    /// Check whether the event satisfies this rule.
    pub fn matches(&self, event: &EventEnvelope) -> bool {
        if event.source != self.source || event.detail_type != self.detail_type {
            return false;
        }
        if let Some(status) = &self.status {
            match event.detail_str(&["status"]) {
                Some(s) if s.eq_ignore_ascii_case(status) => {}
                _ => return false,
            }
        }
        if let Some(name) = &self.workflow_name {
            match event.detail_str(&["workflow", "name"]) {
                Some(n) if n.eq_ignore_ascii_case(name) => {}
                _ => return false,
            }
        }
        self.required_paths.iter().all(|path| event.detail_has(path))
    }
}

/// Stateless event router.
#[derive(Debug, Clone)]
pub struct EventRouter {
    rules: Vec<RoutingRule>,
}

impl EventRouter {
    /// Build the routing table from configuration.
    pub fn from_config(config: &CopyConfig) -> Self {
        let events = &config.events;
        let own_state = |stage: Stage, status: RunStatus| RoutingRule {
            stage,
            source: events.source.clone(),
            detail_type: events.state_change_detail_type.clone(),
            status: Some(status.as_str().to_string()),
            workflow_name: Some(config.workflow.name.clone()),
            required_paths: Vec::new(),
        };

        let rules = vec![
            RoutingRule {
                stage: Stage::DraftCreation,
                source: events.upstream_source.clone(),
                detail_type: events.state_change_detail_type.clone(),
                status: Some(config.upstream.status.clone()),
                workflow_name: Some(config.upstream.workflow_name.clone()),
                required_paths: Vec::new(),
            },
            own_state(Stage::Validation, RunStatus::Draft),
            own_state(Stage::Execution, RunStatus::Ready),
            RoutingRule {
                stage: Stage::CopyCompletion,
                source: events.copy_service_source.clone(),
                detail_type: events.copy_sync_detail_type.clone(),
                status: None,
                workflow_name: None,
                required_paths: vec![
                    &["payload", "destinationUri"],
                    &["payload", "sourceUriList"],
                ],
            },
        ];

        Self { rules }
    }

    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }

    /// Select the stage for an event, if any.
    ///
    /// Unmatched events yield `Ok(None)`. A matched event whose detail cannot
    /// be narrowed to the stage input is an `InvalidEvent` error.
    pub fn route(&self, event: &EventEnvelope) -> Result<Option<Route>> {
        let mut matched = self.rules.iter().filter(|r| r.matches(event));
        let Some(rule) = matched.next() else {
            tracing::trace!(source = %event.source, detail_type = %event.detail_type, "Event dropped");
            return Ok(None);
        };
        if let Some(other) = matched.next() {
            return Err(CopyError::Config(format!(
                "event matches both {} and {} rules",
                rule.stage, other.stage
            )));
        }

        let route = match rule.stage {
            Stage::DraftCreation => Route::DraftCreation(UpstreamTrigger::from_detail(&event.detail)?),
            Stage::Validation => Route::Validation(parse_state_change(event)?),
            Stage::Execution => Route::Execution(parse_state_change(event)?),
            Stage::CopyCompletion => Route::CopyCompletion(DataCopySync::from_detail(&event.detail)?),
        };

        tracing::debug!(stage = %rule.stage, source = %event.source, "Event routed");
        Ok(Some(route))
    }
}

fn parse_state_change(event: &EventEnvelope) -> Result<WorkflowRunStateChange> {
    serde_json::from_value(event.detail.clone())
        .map_err(|e| CopyError::InvalidEvent(format!("bad state change event: {}", e)))
}
