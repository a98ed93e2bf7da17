use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Map;

use bssh_copy_core::capability::{RunRegistry, SampleSheetSource, SchemaRegistry};
use bssh_copy_core::config::CopyConfig;
use bssh_copy_core::error::{CopyError, Result};
use bssh_copy_core::event::WorkflowRunStateChange;
use bssh_copy_core::run::{RunStatus, WorkflowRun};
use bssh_copy_core::schema::Schema;

use super::create_run::sample_sheet_libraries;

/// Result of checking a draft.
#[derive(Debug, Clone, PartialEq)]
pub enum DraftCheck {
    /// The draft was complete and is now READY.
    Ready(WorkflowRun),
    /// The draft stays DRAFT until an update supplies what is missing.
    Incomplete { run: WorkflowRun, reason: String },
}

/// Checks a DRAFT run against the draft schema and promotes it to READY.
///
/// Data carried by the triggering DRAFT event is merged into the stored
/// run first, add-only. A run without linked libraries is incomplete; the
/// sample sheet is re-read in case it became available since drafting.
pub struct ValidateDraft {
    config: Arc<CopyConfig>,
    registry: Arc<dyn RunRegistry>,
    schemas: Arc<dyn SchemaRegistry>,
    sample_sheets: Arc<dyn SampleSheetSource>,
}

impl ValidateDraft {
    pub fn new(
        config: Arc<CopyConfig>,
        registry: Arc<dyn RunRegistry>,
        schemas: Arc<dyn SchemaRegistry>,
        sample_sheets: Arc<dyn SampleSheetSource>,
    ) -> Self {
        Self {
            config,
            registry,
            schemas,
            sample_sheets,
        }
    }

    /// Validate `portal_run_id`, merging `update` if given.
    ///
    /// A run that is no longer DRAFT yields `Conflict` without any write.
    pub async fn execute(
        &self,
        portal_run_id: &str,
        update: Option<&WorkflowRunStateChange>,
    ) -> Result<DraftCheck> {
        let current = self.registry.get(portal_run_id).await?;
        if current.status != RunStatus::Draft {
            return Err(CopyError::Conflict {
                portal_run_id: portal_run_id.to_string(),
                expected: RunStatus::Draft,
                actual: current.status,
            });
        }

        let schema = self
            .schemas
            .fetch_schema(&self.config.schema.name, &self.config.schema.version)
            .await?;

        let incoming = update
            .map(|u| u.payload.data.clone())
            .unwrap_or_else(Map::new);
        let mut libraries: BTreeSet<String> = update
            .map(|u| u.linked_libraries.clone())
            .unwrap_or_default();
        if current.linked_libraries.is_empty() && libraries.is_empty() {
            if let Some(instrument_run_id) = current.instrument_run_id() {
                libraries =
                    sample_sheet_libraries(self.sample_sheets.as_ref(), instrument_run_id).await?;
            }
        }

        let updated = self
            .registry
            .conditional_update(portal_run_id, RunStatus::Draft, &|run| {
                let added = run.payload.accrete(&incoming);
                if !added.is_empty() {
                    tracing::debug!(portal_run_id = %run.portal_run_id, fields = ?added, "Draft data accreted");
                }
                run.link_libraries(libraries.iter().cloned());
                if completeness(&schema, run).is_ok() {
                    run.transition_to(RunStatus::Ready)?;
                }
                Ok(())
            })
            .await?;

        if updated.status == RunStatus::Ready {
            tracing::info!(portal_run_id, schema = %schema.name, "Draft validated");
            return Ok(DraftCheck::Ready(updated));
        }

        let reason = match completeness(&schema, &updated) {
            Err(e) => e.to_string(),
            Ok(()) => "draft unchanged".to_string(),
        };
        tracing::info!(portal_run_id, reason = %reason, "Draft incomplete");
        Ok(DraftCheck::Incomplete {
            run: updated,
            reason,
        })
    }
}

fn completeness(schema: &Schema, run: &WorkflowRun) -> Result<()> {
    schema.check_data(&run.payload.data)?;
    if run.linked_libraries.is_empty() {
        return Err(CopyError::IncompleteDraft("no linked libraries".into()));
    }
    Ok(())
}
