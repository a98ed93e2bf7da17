use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Map, Value};

use bssh_copy_core::capability::{Registration, RunRegistry, SampleSheetSource};
use bssh_copy_core::config::CopyConfig;
use bssh_copy_core::error::Result;
use bssh_copy_core::event::UpstreamTrigger;
use bssh_copy_core::run::{
    derive_run_name, fields, generate_portal_run_id, WorkflowRef, WorkflowRun,
};
use bssh_copy_core::samplesheet;

/// Creates the DRAFT run for an upstream trigger, or returns the one that
/// already exists under the same derived name.
pub struct CreateRun {
    config: Arc<CopyConfig>,
    registry: Arc<dyn RunRegistry>,
    sample_sheets: Arc<dyn SampleSheetSource>,
}

impl CreateRun {
    pub fn new(
        config: Arc<CopyConfig>,
        registry: Arc<dyn RunRegistry>,
        sample_sheets: Arc<dyn SampleSheetSource>,
    ) -> Self {
        Self {
            config,
            registry,
            sample_sheets,
        }
    }

    /// Deterministic run name for a trigger.
    pub fn run_name(&self, trigger: &UpstreamTrigger) -> String {
        derive_run_name(
            &self.config.workflow.run_name_prefix,
            &trigger.instrument_run_id,
            &trigger.analysis_id,
        )
    }

    pub async fn execute(&self, trigger: &UpstreamTrigger) -> Result<Registration> {
        let name = self.run_name(trigger);
        if let Some(existing) = self.registry.find_by_name(&name).await? {
            tracing::debug!(
                portal_run_id = %existing.portal_run_id,
                workflow_run_name = %name,
                "Run already exists"
            );
            return Ok(Registration::Existing(existing));
        }

        // The record is fully assembled before the single registry write.
        let draft = self.build_draft(trigger, name).await?;
        let registration = self.registry.create_or_get(draft).await?;
        if registration.was_created() {
            tracing::info!(
                portal_run_id = %registration.run().portal_run_id,
                workflow_run_name = %registration.run().workflow_run_name,
                libraries = registration.run().linked_libraries.len(),
                "Draft run created"
            );
        }
        Ok(registration)
    }

    async fn build_draft(&self, trigger: &UpstreamTrigger, name: String) -> Result<WorkflowRun> {
        let workflow = WorkflowRef {
            name: self.config.workflow.name.clone(),
            version: self.config.workflow.version.clone(),
        };
        let mut run = WorkflowRun::new_draft(
            generate_portal_run_id(Utc::now()),
            name,
            workflow,
            self.config.workflow.payload_version.clone(),
        );

        let output_uri = self
            .config
            .output
            .render(&trigger.instrument_run_id, &run.portal_run_id);
        run.payload.insert_path(fields::OUTPUT_URI, json!(output_uri));

        let libraries =
            sample_sheet_libraries(self.sample_sheets.as_ref(), &trigger.instrument_run_id).await?;
        run.link_libraries(libraries);
        run.link_libraries(trigger.linked_libraries.iter().cloned());

        let identifiers = identifiers(trigger);
        let mut tags = identifiers.clone();
        for (key, value) in &trigger.tags {
            tags.entry(key.clone()).or_insert_with(|| value.clone());
        }
        run.payload.insert_path(fields::TAGS, Value::Object(tags));
        run.payload
            .insert_path(&["inputs"], Value::Object(identifiers));

        Ok(run)
    }
}

fn identifiers(trigger: &UpstreamTrigger) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("instrumentRunId".into(), json!(trigger.instrument_run_id));
    map.insert("bsshProjectId".into(), json!(trigger.project_id));
    map.insert("bsshAnalysisId".into(), json!(trigger.analysis_id));
    map
}

/// Library ids from the run's sample sheet; empty while it is not available.
pub(crate) async fn sample_sheet_libraries(
    source: &dyn SampleSheetSource,
    instrument_run_id: &str,
) -> Result<BTreeSet<String>> {
    match source.fetch_sample_sheet(instrument_run_id).await? {
        Some(sheet) => samplesheet::library_ids(&sheet),
        None => {
            tracing::debug!(instrument_run_id, "Sample sheet not available yet");
            Ok(BTreeSet::new())
        }
    }
}
