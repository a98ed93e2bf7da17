use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;

use bssh_copy_core::capability::{Registration, RunMutation, RunRegistry};
use bssh_copy_core::config::DatabaseConfig;
use bssh_copy_core::error::{CopyError, Result};
use bssh_copy_core::run::{ExecutionState, Payload, RunStatus, WorkflowRef, WorkflowRun};

use super::migrations;

const RUN_COLUMNS: &str = "portal_run_id, workflow_run_name, status, workflow_name, \
     workflow_version, payload, linked_libraries, execution, revision, transitioned_at";

/// PostgreSQL-backed run registry.
///
/// Conditional updates use optimistic concurrency on a `revision` column:
/// read, mutate in memory, then write only if nobody else wrote in between.
#[derive(Clone)]
pub struct PgRunRegistry {
    pool: PgPool,
    update_retries: u32,
}

impl PgRunRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            update_retries: DatabaseConfig::default().update_retries,
        }
    }

    /// Connect using the database configuration and apply migrations.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(Duration::from_secs(config.pool_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(|e| CopyError::Database(format!("Failed to connect: {}", e)))?;

        migrations::run_migrations(&pool).await?;
        tracing::info!("Connected to run registry database");

        Ok(Self {
            pool,
            update_retries: config.update_retries.max(1),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_with_revision(&self, portal_run_id: &str) -> Result<(WorkflowRun, i64)> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM bssh_workflow_runs WHERE portal_run_id = $1",
            RUN_COLUMNS
        ))
        .bind(portal_run_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CopyError::Database(e.to_string()))?
        .ok_or_else(|| CopyError::RunNotFound(portal_run_id.to_string()))?;

        let revision: i64 = row.try_get("revision")?;
        Ok((row_to_run(&row)?, revision))
    }
}

fn row_to_run(row: &PgRow) -> Result<WorkflowRun> {
    let status: String = row.try_get("status")?;
    let Json(payload): Json<Payload> = row.try_get("payload")?;
    let Json(linked_libraries): Json<BTreeSet<String>> = row.try_get("linked_libraries")?;
    let execution: Option<Json<ExecutionState>> = row.try_get("execution")?;
    let timestamp: DateTime<Utc> = row.try_get("transitioned_at")?;

    Ok(WorkflowRun {
        portal_run_id: row.try_get("portal_run_id")?,
        workflow_run_name: row.try_get("workflow_run_name")?,
        status: status.parse()?,
        workflow: WorkflowRef {
            name: row.try_get("workflow_name")?,
            version: row.try_get("workflow_version")?,
        },
        payload,
        linked_libraries,
        timestamp,
        execution: execution.map(|Json(e)| e),
    })
}

#[async_trait]
impl RunRegistry for PgRunRegistry {
    async fn create_or_get(&self, run: WorkflowRun) -> Result<Registration> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO bssh_workflow_runs (
                portal_run_id, workflow_run_name, status, workflow_name,
                workflow_version, payload, linked_libraries, execution, transitioned_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (workflow_run_name) DO NOTHING
            "#,
        )
        .bind(&run.portal_run_id)
        .bind(&run.workflow_run_name)
        .bind(run.status.as_str())
        .bind(&run.workflow.name)
        .bind(&run.workflow.version)
        .bind(Json(&run.payload))
        .bind(Json(&run.linked_libraries))
        .bind(run.execution.as_ref().map(Json))
        .bind(run.timestamp)
        .execute(&self.pool)
        .await
        .map_err(|e| CopyError::Database(e.to_string()))?;

        if inserted.rows_affected() == 1 {
            tracing::debug!(portal_run_id = %run.portal_run_id, "Run inserted");
            return Ok(Registration::Created(run));
        }

        match self.find_by_name(&run.workflow_run_name).await? {
            Some(existing) => Ok(Registration::Existing(existing)),
            None => Err(CopyError::Database(format!(
                "insert of {} conflicted but no run found",
                run.workflow_run_name
            ))),
        }
    }

    async fn get(&self, portal_run_id: &str) -> Result<WorkflowRun> {
        Ok(self.fetch_with_revision(portal_run_id).await?.0)
    }

    async fn find_by_name(&self, workflow_run_name: &str) -> Result<Option<WorkflowRun>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM bssh_workflow_runs WHERE workflow_run_name = $1",
            RUN_COLUMNS
        ))
        .bind(workflow_run_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CopyError::Database(e.to_string()))?;

        row.as_ref().map(row_to_run).transpose()
    }

    async fn find_awaiting_copy(
        &self,
        job_id: Option<&str>,
        destination_uri: &str,
        sources: &[String],
    ) -> Result<Option<WorkflowRun>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM bssh_workflow_runs
            WHERE status = 'RUNNING' AND execution->>'phase' = 'AWAITING_COPY'
            ORDER BY transitioned_at ASC
            "#,
            RUN_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CopyError::Database(e.to_string()))?;

        for row in &rows {
            let run = row_to_run(row)?;
            let matched = run.execution.as_ref().is_some_and(|e| {
                e.copy_jobs
                    .iter()
                    .any(|j| j.matches(job_id, destination_uri, sources))
            });
            if matched {
                return Ok(Some(run));
            }
        }
        Ok(None)
    }

    async fn list(&self, status: Option<RunStatus>) -> Result<Vec<WorkflowRun>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM bssh_workflow_runs
            WHERE ($1::VARCHAR IS NULL OR status = $1)
            ORDER BY portal_run_id ASC
            "#,
            RUN_COLUMNS
        ))
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CopyError::Database(e.to_string()))?;

        rows.iter().map(row_to_run).collect()
    }

    async fn conditional_update(
        &self,
        portal_run_id: &str,
        expected: RunStatus,
        mutation: RunMutation<'_>,
    ) -> Result<WorkflowRun> {
        for attempt in 1..=self.update_retries {
            let (current, revision) = self.fetch_with_revision(portal_run_id).await?;
            if current.status != expected {
                return Err(CopyError::Conflict {
                    portal_run_id: portal_run_id.to_string(),
                    expected,
                    actual: current.status,
                });
            }

            let mut updated = current.clone();
            mutation(&mut updated)?;
            if updated.portal_run_id != current.portal_run_id
                || updated.workflow_run_name != current.workflow_run_name
            {
                return Err(CopyError::Internal(
                    "mutation changed run identity".to_string(),
                ));
            }

            let result = sqlx::query(
                r#"
                UPDATE bssh_workflow_runs
                SET status = $3,
                    payload = $4,
                    linked_libraries = $5,
                    execution = $6,
                    transitioned_at = $7,
                    revision = revision + 1,
                    updated_at = NOW()
                WHERE portal_run_id = $1 AND revision = $2
                "#,
            )
            .bind(portal_run_id)
            .bind(revision)
            .bind(updated.status.as_str())
            .bind(Json(&updated.payload))
            .bind(Json(&updated.linked_libraries))
            .bind(updated.execution.as_ref().map(Json))
            .bind(updated.timestamp)
            .execute(&self.pool)
            .await
            .map_err(|e| CopyError::Database(e.to_string()))?;

            if result.rows_affected() == 1 {
                return Ok(updated);
            }
            tracing::debug!(
                portal_run_id,
                attempt,
                "Conditional update lost a race, re-reading"
            );
        }

        Err(CopyError::Database(format!(
            "conditional update of {} gave up after {} attempts",
            portal_run_id, self.update_retries
        )))
    }
}
