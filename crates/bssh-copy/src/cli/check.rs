use anyhow::Result;
use clap::Parser;
use console::style;

use bssh_copy_core::config::CopyConfig;

use crate::wiring;

/// Load and validate the configuration.
#[derive(Parser)]
pub struct CheckConfigCommand {}

impl CheckConfigCommand {
    pub async fn execute(self, config_path: &str) -> Result<()> {
        let config = wiring::load_config(config_path)?;
        println!("  {} {} is valid", style("✓").green(), config_path);
        for line in summary(&config) {
            println!("    {}", line);
        }
        Ok(())
    }
}

fn summary(config: &CopyConfig) -> Vec<String> {
    let services = &config.services;
    let endpoint = |url: &Option<String>| match url {
        Some(url) => url.clone(),
        None => style("not set").yellow().to_string(),
    };
    let schema = match (&config.schema.path, &services.schema_registry_url) {
        (Some(path), _) => path.display().to_string(),
        (None, Some(url)) => url.clone(),
        (None, None) => "built-in".to_string(),
    };

    vec![
        format!(
            "workflow        {}@{}",
            config.workflow.name, config.workflow.version
        ),
        format!(
            "upstream        {} {}",
            config.upstream.workflow_name, config.upstream.status
        ),
        format!("output          {}", config.output.uri_template),
        format!(
            "schema          {}@{} ({})",
            config.schema.name, config.schema.version, schema
        ),
        format!("registry        {:?}", config.registry.backend),
        format!("copy service    {}", endpoint(&services.copy_service_url)),
        format!("file manager    {}", endpoint(&services.file_manager_url)),
        format!("sequence runs   {}", endpoint(&services.sequence_run_url)),
        format!("analyses        {}", endpoint(&services.analysis_url)),
    ]
}
