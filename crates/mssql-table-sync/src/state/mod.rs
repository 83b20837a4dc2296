//! Durable run log: jobs, per-table outcomes and lifecycle events.

pub mod backend;
pub mod mssql_db;

pub use backend::{JobGate, RunLog};
pub use mssql_db::MssqlControlStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle event category for job start/completion.
pub const INFO_TYPE_JOB: &str = "Job";

/// Lifecycle event category for non-fatal setup failures.
pub const INFO_TYPE_WARNING: &str = "Warning";

/// A named, enable-gated job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: i64,
    pub job_name: String,
    pub is_enabled: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Final status of one table in one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Failed,
    Succeeded,
    /// The table was never attempted (its name cannot be staged safely).
    Skipped,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OutcomeStatus::Failed => "failed",
            OutcomeStatus::Succeeded => "succeeded",
            OutcomeStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// One table's result for one pipeline execution. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRunOutcome {
    pub job_id: i64,
    pub run_id: Uuid,
    pub table_name: String,
    pub status: OutcomeStatus,

    /// Failure detail, or a cleanup warning on an otherwise successful load.
    pub message: Option<String>,

    /// Seconds from the first attempt to the final resolution.
    pub execution_time: Option<f64>,

    pub created_at: DateTime<Utc>,
}

impl TableRunOutcome {
    fn new(
        job_id: i64,
        run_id: Uuid,
        table_name: &str,
        status: OutcomeStatus,
        message: Option<String>,
        execution_time: Option<f64>,
    ) -> Self {
        Self {
            job_id,
            run_id,
            table_name: table_name.to_string(),
            status,
            message,
            execution_time,
            created_at: Utc::now(),
        }
    }

    pub fn succeeded(
        job_id: i64,
        run_id: Uuid,
        table_name: &str,
        execution_time: f64,
        message: Option<String>,
    ) -> Self {
        Self::new(
            job_id,
            run_id,
            table_name,
            OutcomeStatus::Succeeded,
            message,
            Some(execution_time),
        )
    }

    pub fn failed(
        job_id: i64,
        run_id: Uuid,
        table_name: &str,
        execution_time: Option<f64>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            job_id,
            run_id,
            table_name,
            OutcomeStatus::Failed,
            Some(message.into()),
            execution_time,
        )
    }

    pub fn skipped(job_id: i64, run_id: Uuid, table_name: &str, reason: impl Into<String>) -> Self {
        Self::new(
            job_id,
            run_id,
            table_name,
            OutcomeStatus::Skipped,
            Some(reason.into()),
            None,
        )
    }
}

/// Coarse pipeline lifecycle record. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub info_type: String,
    pub table_name: Option<String>,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl LogEvent {
    pub fn new(info_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            info_type: info_type.into(),
            table_name: None,
            message: message.into(),
            created_at: Utc::now(),
        }
    }

    pub fn job(message: impl Into<String>) -> Self {
        Self::new(INFO_TYPE_JOB, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(INFO_TYPE_WARNING, message)
    }

    pub fn with_table(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = Some(table_name.into());
        self
    }
}
