//! Embedded schema migrations for the PostgreSQL run registry.
//!
//! Applied in one transaction holding a transaction-scoped advisory lock, so
//! processes starting together apply each migration once. The lock lives on
//! the transaction's connection and is released at commit or rollback.

use std::collections::HashSet;

use sqlx::{PgConnection, PgPool};
use tracing::{debug, info};

use bssh_copy_core::error::{CopyError, Result};

/// Advisory lock id ("BSSHCP" in ascii).
const MIGRATION_LOCK_ID: i64 = 0x4253_5348_4350;

/// A single migration.
#[derive(Debug, Clone)]
pub struct Migration {
    pub name: &'static str,
    pub sql: &'static str,
}

/// All migrations, in order.
pub fn builtin_migrations() -> Vec<Migration> {
    vec![Migration {
        name: "0001_workflow_runs",
        sql: include_str!("../../migrations/0001_workflow_runs.sql"),
    }]
}

/// Apply every migration not yet recorded in `bssh_migrations`.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| CopyError::Database(format!("Failed to start migration transaction: {}", e)))?;

    sqlx::query(LOCK_SQL)
        .bind(MIGRATION_LOCK_ID)
        .execute(&mut *tx)
        .await
        .map_err(|e| CopyError::Database(format!("Failed to acquire migration lock: {}", e)))?;

    apply_pending(&mut *tx).await?;

    tx.commit()
        .await
        .map_err(|e| CopyError::Database(format!("Failed to commit migrations: {}", e)))
}

/// Held until the enclosing transaction ends, on that transaction's connection.
const LOCK_SQL: &str = "SELECT pg_advisory_xact_lock($1)";

async fn apply_pending(conn: &mut PgConnection) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS bssh_migrations (
            name VARCHAR(255) PRIMARY KEY,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(&mut *conn)
    .await
    .map_err(|e| CopyError::Database(format!("Failed to create migrations table: {}", e)))?;

    let applied: HashSet<String> = sqlx::query_as::<_, (String,)>("SELECT name FROM bssh_migrations")
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| CopyError::Database(format!("Failed to read applied migrations: {}", e)))?
        .into_iter()
        .map(|(name,)| name)
        .collect();
    debug!(?applied, "Applied migrations");

    for migration in builtin_migrations() {
        if applied.contains(migration.name) {
            continue;
        }
        info!("Applying migration: {}", migration.name);
        for statement in split_statements(migration.sql) {
            sqlx::query(statement).execute(&mut *conn).await.map_err(|e| {
                CopyError::Database(format!(
                    "Failed to apply migration '{}': {}",
                    migration.name, e
                ))
            })?;
        }
        sqlx::query("INSERT INTO bssh_migrations (name) VALUES ($1)")
            .bind(migration.name)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                CopyError::Database(format!(
                    "Failed to record migration '{}': {}",
                    migration.name, e
                ))
            })?;
    }
    Ok(())
}

/// Split on `;`, dropping comment-only and empty fragments.
fn split_statements(sql: &str) -> Vec<&str> {
    sql.split(';')
        .map(str::trim)
        .filter(|stmt| {
            stmt.lines().any(|l| {
                let l = l.trim();
                !l.is_empty() && !l.starts_with("--")
            })
        })
        .collect()
}
