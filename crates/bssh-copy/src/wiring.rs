//! Builds the state machine's collaborators from configuration.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use bssh_copy_core::capability::{EventPublisher, SchemaRegistry};
use bssh_copy_core::config::{CopyConfig, LogFormat, LoggingConfig, ServicesConfig};
use bssh_copy_runtime::registry;
use bssh_copy_runtime::{
    Collaborators, HttpAnalyses, HttpCopyService, HttpFileManager, HttpSampleSheets,
    HttpSchemaRegistry, ServiceClient, StaticSchemaRegistry, WorkflowStateMachine,
};

/// Load `.env`, then the configuration file.
pub fn load_config(path: &str) -> Result<CopyConfig> {
    dotenvy::dotenv().ok();

    if !Path::new(path).exists() {
        anyhow::bail!(
            "Configuration file not found: {}\nPass --config or create bssh-copy.toml.",
            path
        );
    }
    CopyConfig::from_file(path).with_context(|| format!("Invalid configuration in {}", path))
}

/// Install the global subscriber. Logs go to stderr; stdout carries events.
pub fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    // A second init (tests) is harmless.
    let _ = match logging.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.try_init(),
    };
}

fn service(services: &ServicesConfig, url: Option<&String>, key: &str) -> Result<ServiceClient> {
    let url = url.with_context(|| format!("services.{} is not set", key))?;
    Ok(ServiceClient::from_services(services, url)?)
}

/// The schema source: a local document, the registry, or the built-in schema.
pub fn schema_registry(config: &CopyConfig) -> Result<Arc<dyn SchemaRegistry>> {
    let schema = &config.schema;
    if let Some(path) = &schema.path {
        tracing::info!(path = %path.display(), "Using local draft schema");
        return Ok(Arc::new(StaticSchemaRegistry::from_path(
            &schema.name,
            &schema.version,
            path,
        )?));
    }
    match &config.services.schema_registry_url {
        Some(url) => Ok(Arc::new(HttpSchemaRegistry::new(
            ServiceClient::from_services(&config.services, url)?,
        ))),
        None => {
            tracing::warn!("No schema registry configured; using the built-in draft schema");
            Ok(Arc::new(StaticSchemaRegistry::builtin(
                &schema.name,
                &schema.version,
            )))
        }
    }
}

/// Connect the registry and build HTTP clients for every collaborator.
pub async fn collaborators(
    config: &CopyConfig,
    publisher: Arc<dyn EventPublisher>,
) -> Result<Collaborators> {
    let services = &config.services;
    let registry = registry::from_config(config)
        .await
        .context("Failed to open the run registry")?;

    Ok(Collaborators {
        registry,
        schemas: schema_registry(config)?,
        copy_service: Arc::new(HttpCopyService::new(service(
            services,
            services.copy_service_url.as_ref(),
            "copy_service_url",
        )?)),
        files: Arc::new(HttpFileManager::new(service(
            services,
            services.file_manager_url.as_ref(),
            "file_manager_url",
        )?)),
        sample_sheets: Arc::new(HttpSampleSheets::new(service(
            services,
            services.sequence_run_url.as_ref(),
            "sequence_run_url",
        )?)),
        analyses: Arc::new(HttpAnalyses::new(service(
            services,
            services.analysis_url.as_ref(),
            "analysis_url",
        )?)),
        publisher,
    })
}

/// A state machine over the configured collaborators.
pub async fn state_machine(
    config: Arc<CopyConfig>,
    publisher: Arc<dyn EventPublisher>,
) -> Result<WorkflowStateMachine> {
    let collaborators = collaborators(&config, publisher).await?;
    Ok(WorkflowStateMachine::new(config, collaborators))
}
