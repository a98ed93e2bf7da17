//! Run registry implementations.

mod memory;
pub mod migrations;
mod postgres;

pub use memory::InMemoryRunRegistry;
pub use postgres::PgRunRegistry;

use std::sync::Arc;

use bssh_copy_core::capability::RunRegistry;
use bssh_copy_core::config::{CopyConfig, RegistryBackend};
use bssh_copy_core::error::Result;

/// Build the registry selected by configuration.
pub async fn from_config(config: &CopyConfig) -> Result<Arc<dyn RunRegistry>> {
    match config.registry.backend {
        RegistryBackend::Memory => {
            tracing::warn!("Using in-memory run registry; runs are lost on exit");
            Ok(Arc::new(InMemoryRunRegistry::new()))
        }
        RegistryBackend::Postgres => Ok(Arc::new(PgRunRegistry::connect(&config.database).await?)),
    }
}
