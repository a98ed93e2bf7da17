use std::sync::Arc;

use bssh_copy_core::capability::{AnalysisOutputSource, AnalysisOutputs, CopyService};
use bssh_copy_core::config::CopyConfig;
use bssh_copy_core::error::{CopyError, Result};
use bssh_copy_core::run::{fields, CopyJob, CopyJobSpec, WorkflowRun};
use bssh_copy_core::uri::{join_dir, join_file, StorageUri};

/// Builds the copy jobs for a run from its analysis outputs and submits
/// them to the copy service.
///
/// Submissions carry the idempotency key `<portalRunId>-<index>`, so a
/// repeated call returns the jobs submitted the first time.
pub struct ListCopyJobs {
    config: Arc<CopyConfig>,
    analyses: Arc<dyn AnalysisOutputSource>,
    copy_service: Arc<dyn CopyService>,
}

impl ListCopyJobs {
    pub fn new(
        config: Arc<CopyConfig>,
        analyses: Arc<dyn AnalysisOutputSource>,
        copy_service: Arc<dyn CopyService>,
    ) -> Self {
        Self {
            config,
            analyses,
            copy_service,
        }
    }

    pub async fn execute(&self, run: &WorkflowRun) -> Result<Vec<CopyJob>> {
        let specs = self.prepare(run).await?;
        self.submit(run, specs).await
    }

    /// Fetch the run's analysis outputs and plan its copy jobs without
    /// submitting anything.
    pub async fn prepare(&self, run: &WorkflowRun) -> Result<Vec<CopyJobSpec>> {
        let project_id = required(run, fields::PROJECT_ID, "bsshProjectId")?;
        let analysis_id = required(run, fields::ANALYSIS_ID, "bsshAnalysisId")?;
        let output_uri = required(run, fields::OUTPUT_URI, "outputUri")?;

        let outputs = self.analyses.fetch_outputs(project_id, analysis_id).await?;
        self.plan(&outputs, output_uri)
    }

    /// Submit planned jobs under the run's idempotency keys.
    pub async fn submit(&self, run: &WorkflowRun, specs: Vec<CopyJobSpec>) -> Result<Vec<CopyJob>> {
        let mut jobs = Vec::with_capacity(specs.len());
        for (index, spec) in specs.into_iter().enumerate() {
            let key = format!("{}-{}", run.portal_run_id, index);
            let job_id = self.copy_service.submit_copy_job(&spec, &key).await?;
            tracing::info!(
                portal_run_id = %run.portal_run_id,
                job_id = %job_id,
                destination = %spec.destination_uri,
                sources = spec.source_uri_list.len(),
                "Copy job submitted"
            );
            jobs.push(CopyJob::submitted(spec, job_id));
        }
        Ok(jobs)
    }

    /// Source and destination pairs for an analysis output listing.
    pub fn plan(&self, outputs: &AnalysisOutputs, output_uri: &str) -> Result<Vec<CopyJobSpec>> {
        if outputs.output_uri.trim().is_empty() {
            return Err(CopyError::MalformedManifest(
                "analysis has no output folder".into(),
            ));
        }
        StorageUri::parse(&outputs.output_uri)?;
        StorageUri::parse(output_uri)?;

        let plan = &self.config.copy;
        let analysis_dir = as_dir(&outputs.output_uri);
        let primary_sources = if plan.include_dirs.is_empty() {
            vec![analysis_dir.clone()]
        } else {
            plan.include_dirs
                .iter()
                .map(|dir| join_dir(&analysis_dir, dir))
                .collect()
        };

        let mut specs = vec![CopyJobSpec {
            source_uri_list: primary_sources,
            destination_uri: as_dir(output_uri),
        }];

        if !outputs.interop_uris.is_empty() {
            let mut sources = Vec::with_capacity(outputs.interop_uris.len() + 1);
            for uri in &outputs.interop_uris {
                StorageUri::parse(uri)?;
                sources.push(uri.clone());
            }

            let index_metrics = join_file(&analysis_dir, &plan.index_metrics_file);
            let index_name = StorageUri::parse(&index_metrics)?.file_name().to_string();
            let listed = outputs.interop_uris.iter().any(|uri| {
                StorageUri::parse(uri).is_ok_and(|u| u.file_name() == index_name)
            });
            if !listed {
                sources.push(index_metrics);
            }

            specs.push(CopyJobSpec {
                source_uri_list: sources,
                destination_uri: join_dir(output_uri, &plan.interop_dir),
            });
        }

        Ok(specs)
    }
}

fn required<'a>(run: &'a WorkflowRun, path: &[&str], name: &str) -> Result<&'a str> {
    run.payload.get_str(path).ok_or_else(|| {
        CopyError::MalformedManifest(format!("run {} has no {}", run.portal_run_id, name))
    })
}

fn as_dir(uri: &str) -> String {
    if uri.ends_with('/') {
        uri.to_string()
    } else {
        format!("{}/", uri)
    }
}
