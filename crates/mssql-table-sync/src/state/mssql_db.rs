//! MSSQL-backed job gate and run log.
//!
//! Three tables in the control database:
//!
//! - `jobs`: one row per named job with its enabled flag
//! - `job_tables`: one row per table per execution (`run_id`)
//! - `log_details`: lifecycle events
//!
//! Every write is a single INSERT/UPDATE statement, so concurrent workers
//! append without coordinating. No explicit transactions are opened here:
//! BEGIN/COMMIT sent through parameterized `execute` runs inside
//! `sp_executesql` and trips error 266 (transaction count mismatch).

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::sync::Arc;
use tiberius::Row;
use uuid::Uuid;

use crate::core::identifier::{quote_literal, quote_mssql};
use crate::error::{SyncError, Result};
use crate::orchestrator::pools::MssqlPool;
use crate::state::backend::{i32_to_outcome_status, outcome_status_to_i32, JobGate, RunLog};
use crate::state::{Job, LogEvent, TableRunOutcome};

/// Control-database store for jobs, outcomes and events.
pub struct MssqlControlStore {
    pool: Arc<MssqlPool>,
    schema: String,
}

impl MssqlControlStore {
    /// Create a store over `pool`, with tables in `schema`.
    pub fn new(pool: Arc<MssqlPool>, schema: impl Into<String>) -> Result<Self> {
        let schema = schema.into();
        quote_mssql(&schema)?;
        Ok(Self { pool, schema })
    }

    fn table(&self, name: &str) -> String {
        format!("[{}].[{}]", self.schema, name)
    }

    /// Create `jobs`, `job_tables` and `log_details` when missing.
    ///
    /// Idempotent; safe to call before every run.
    pub async fn init_schema(&self) -> Result<()> {
        let mut conn = self.pool.get_conn().await?;
        let schema_literal = quote_literal(&self.schema);

        let sql = format!(
            "IF NOT EXISTS (SELECT * FROM sys.tables WHERE name = 'jobs' AND schema_id = SCHEMA_ID({schema}))
             BEGIN
                 CREATE TABLE {jobs} (
                     job_id BIGINT IDENTITY(1,1) NOT NULL PRIMARY KEY,
                     job_name NVARCHAR(255) NOT NULL UNIQUE,
                     isEnabled BIT NOT NULL DEFAULT 1,
                     created_at DATETIME2 NULL,
                     updated_at DATETIME2 NULL
                 )
             END",
            schema = schema_literal,
            jobs = self.table("jobs"),
        );
        conn.execute(sql, &[]).await?;

        let sql = format!(
            "IF NOT EXISTS (SELECT * FROM sys.tables WHERE name = 'job_tables' AND schema_id = SCHEMA_ID({schema}))
             BEGIN
                 CREATE TABLE {job_tables} (
                     id BIGINT IDENTITY(1,1) NOT NULL PRIMARY KEY,
                     job_id BIGINT NOT NULL
                         REFERENCES {jobs}(job_id) ON DELETE CASCADE,
                     run_id NVARCHAR(36) NOT NULL,
                     table_name NVARCHAR(255) NOT NULL,
                     status INT NOT NULL DEFAULT 0,
                     message NVARCHAR(MAX) NULL,
                     execution_time FLOAT NULL,
                     created_at DATETIME2 NULL,
                     updated_at DATETIME2 NULL
                 )
             END",
            schema = schema_literal,
            job_tables = self.table("job_tables"),
            jobs = self.table("jobs"),
        );
        conn.execute(sql, &[]).await?;

        let sql = format!(
            "IF NOT EXISTS (SELECT * FROM sys.indexes WHERE name = 'idx_job_tables_job_run' AND object_id = OBJECT_ID({qualified}))
             BEGIN
                 CREATE INDEX idx_job_tables_job_run
                 ON {job_tables}(job_id, created_at DESC, run_id)
             END",
            qualified = quote_literal(&self.table("job_tables")),
            job_tables = self.table("job_tables"),
        );
        conn.execute(sql, &[]).await?;

        let sql = format!(
            "IF NOT EXISTS (SELECT * FROM sys.tables WHERE name = 'log_details' AND schema_id = SCHEMA_ID({schema}))
             BEGIN
                 CREATE TABLE {log_details} (
                     id BIGINT IDENTITY(1,1) NOT NULL PRIMARY KEY,
                     info_type NVARCHAR(50) NOT NULL,
                     table_name NVARCHAR(255) NULL,
                     message NVARCHAR(MAX) NOT NULL,
                     created_at DATETIME2 NULL,
                     updated_at DATETIME2 NULL
                 )
             END",
            schema = schema_literal,
            log_details = self.table("log_details"),
        );
        conn.execute(sql, &[]).await?;

        Ok(())
    }

    /// Register a job (enabled) unless it already exists, and return it.
    pub async fn register_job(&self, job_name: &str) -> Result<Job> {
        let mut conn = self.pool.get_conn().await?;

        let sql = format!(
            "IF NOT EXISTS (SELECT 1 FROM {jobs} WHERE job_name = @P1)
                 INSERT INTO {jobs} (job_name, isEnabled, created_at, updated_at)
                 VALUES (@P1, 1, SYSUTCDATETIME(), SYSUTCDATETIME())",
            jobs = self.table("jobs"),
        );
        conn.execute(sql, &[&job_name]).await?;
        drop(conn);

        self.lookup(job_name)
            .await?
            .ok_or_else(|| SyncError::RunLog(format!("job {} missing after registration", job_name)))
    }

    /// Flip a job's enabled flag. Returns false when the job does not exist.
    pub async fn set_job_enabled(&self, job_name: &str, enabled: bool) -> Result<bool> {
        let mut conn = self.pool.get_conn().await?;

        let sql = format!(
            "UPDATE {} SET isEnabled = @P2, updated_at = SYSUTCDATETIME() WHERE job_name = @P1",
            self.table("jobs")
        );
        let result = conn.execute(sql, &[&job_name, &enabled]).await?;
        Ok(result.total() > 0)
    }

    /// All registered jobs, by name.
    pub async fn list_jobs(&self) -> Result<Vec<Job>> {
        let mut conn = self.pool.get_conn().await?;

        let sql = format!(
            "SELECT job_id, job_name, isEnabled, created_at, updated_at FROM {} ORDER BY job_name",
            self.table("jobs")
        );
        let rows = conn.query(sql, &[]).await?.into_first_result().await?;
        rows.iter().map(job_from_row).collect()
    }
}

fn utc(value: Option<NaiveDateTime>) -> Option<DateTime<Utc>> {
    value.map(|v| v.and_utc())
}

fn job_from_row(row: &Row) -> Result<Job> {
    let job_id: i64 = row
        .try_get(0)?
        .ok_or_else(|| SyncError::RunLog("Failed to get job_id from database".to_string()))?;
    let job_name: &str = row
        .try_get(1)?
        .ok_or_else(|| SyncError::RunLog("Failed to get job_name from database".to_string()))?;
    let is_enabled: bool = row.try_get(2)?.unwrap_or(false);

    Ok(Job {
        job_id,
        job_name: job_name.to_string(),
        is_enabled,
        created_at: utc(row.try_get(3)?),
        updated_at: utc(row.try_get(4)?),
    })
}

fn outcome_from_row(row: &Row) -> Result<TableRunOutcome> {
    let job_id: i64 = row
        .try_get(0)?
        .ok_or_else(|| SyncError::RunLog("Failed to get job_id from database".to_string()))?;
    let run_id: &str = row
        .try_get(1)?
        .ok_or_else(|| SyncError::RunLog("Failed to get run_id from database".to_string()))?;
    let run_id = Uuid::parse_str(run_id)
        .map_err(|e| SyncError::RunLog(format!("Invalid run_id {}: {}", run_id, e)))?;
    let table_name: &str = row
        .try_get(2)?
        .ok_or_else(|| SyncError::RunLog("Failed to get table_name from database".to_string()))?;
    let status: i32 = row.try_get(3)?.unwrap_or(0);
    let message: Option<&str> = row.try_get(4)?;
    let execution_time: Option<f64> = row.try_get(5)?;
    let created_at = utc(row.try_get(6)?).unwrap_or_else(Utc::now);

    Ok(TableRunOutcome {
        job_id,
        run_id,
        table_name: table_name.to_string(),
        status: i32_to_outcome_status(status)?,
        message: message.map(|s| s.to_string()),
        execution_time,
        created_at,
    })
}

#[async_trait]
impl JobGate for MssqlControlStore {
    async fn lookup(&self, job_name: &str) -> Result<Option<Job>> {
        let mut conn = self.pool.get_conn().await?;

        let sql = format!(
            "SELECT TOP 1 job_id, job_name, isEnabled, created_at, updated_at
             FROM {} WHERE job_name = @P1",
            self.table("jobs")
        );
        let row = conn
            .query(sql, &[&job_name])
            .await?
            .into_row()
            .await?;

        row.as_ref().map(job_from_row).transpose()
    }
}

#[async_trait]
impl RunLog for MssqlControlStore {
    async fn log_event(&self, event: &LogEvent) -> Result<()> {
        let mut conn = self.pool.get_conn().await?;

        let sql = format!(
            "INSERT INTO {} (info_type, table_name, message, created_at, updated_at)
             VALUES (@P1, @P2, @P3, SYSUTCDATETIME(), SYSUTCDATETIME())",
            self.table("log_details")
        );
        conn.execute(
            sql,
            &[&event.info_type.as_str(), &event.table_name.as_deref(), &event.message.as_str()],
        )
        .await
        .map_err(|e| SyncError::RunLog(format!("writing log event: {}", e)))?;
        Ok(())
    }

    async fn record_outcome(&self, outcome: &TableRunOutcome) -> Result<()> {
        let mut conn = self.pool.get_conn().await?;

        let sql = format!(
            "INSERT INTO {} (job_id, run_id, table_name, status, message, execution_time, created_at, updated_at)
             VALUES (@P1, @P2, @P3, @P4, @P5, @P6, SYSUTCDATETIME(), SYSUTCDATETIME())",
            self.table("job_tables")
        );
        let run_id = outcome.run_id.to_string();
        conn.execute(
            sql,
            &[
                &outcome.job_id,
                &run_id.as_str(),
                &outcome.table_name.as_str(),
                &outcome_status_to_i32(outcome.status),
                &outcome.message.as_deref(),
                &outcome.execution_time,
            ],
        )
        .await
        .map_err(|e| {
            SyncError::RunLog(format!(
                "writing outcome for {}: {}",
                outcome.table_name, e
            ))
        })?;
        Ok(())
    }

    async fn latest_outcomes(&self, job_id: i64) -> Result<Vec<TableRunOutcome>> {
        let mut conn = self.pool.get_conn().await?;

        let sql = format!(
            "SELECT job_id, run_id, table_name, status, message, execution_time, created_at
             FROM {job_tables}
             WHERE job_id = @P1
               AND run_id = (
                   SELECT TOP 1 run_id FROM {job_tables}
                   WHERE job_id = @P1
                   ORDER BY created_at DESC, id DESC
               )
             ORDER BY table_name",
            job_tables = self.table("job_tables"),
        );
        let rows = conn
            .query(sql, &[&job_id])
            .await?
            .into_first_result()
            .await?;

        rows.iter().map(outcome_from_row).collect()
    }
}
