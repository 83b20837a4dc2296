//! Run log and job gate traits.
//!
//! The orchestrator works with `Arc<dyn JobGate>` and `Arc<dyn RunLog>`
//! without knowing where the records live. [`MssqlControlStore`] implements
//! both over the control database.
//!
//! # Thread Safety
//!
//! Implementations must be `Send + Sync`: every table worker writes its own
//! outcome concurrently with its siblings. Each write is an independent
//! append; nothing is aggregated in memory.
//!
//! [`MssqlControlStore`]: super::mssql_db::MssqlControlStore

use async_trait::async_trait;

use super::{Job, LogEvent, OutcomeStatus, TableRunOutcome};
use crate::error::{SyncError, Result};

/// Answers whether a job may run.
#[async_trait]
pub trait JobGate: Send + Sync {
    /// Look up a job by name. `None` when it is not registered.
    async fn lookup(&self, job_name: &str) -> Result<Option<Job>>;
}

/// Append-only store of outcomes and lifecycle events.
#[async_trait]
pub trait RunLog: Send + Sync {
    /// Append a lifecycle event.
    async fn log_event(&self, event: &LogEvent) -> Result<()>;

    /// Append one table outcome.
    async fn record_outcome(&self, outcome: &TableRunOutcome) -> Result<()>;

    /// Outcomes of the most recent execution of a job, ordered by table name.
    async fn latest_outcomes(&self, job_id: i64) -> Result<Vec<TableRunOutcome>>;
}

/// Helper function to convert OutcomeStatus to its stored integer.
pub fn outcome_status_to_i32(status: OutcomeStatus) -> i32 {
    match status {
        OutcomeStatus::Failed => 0,
        OutcomeStatus::Succeeded => 1,
        OutcomeStatus::Skipped => 2,
    }
}

/// Helper function to parse OutcomeStatus from its stored integer.
pub fn i32_to_outcome_status(value: i32) -> Result<OutcomeStatus> {
    match value {
        0 => Ok(OutcomeStatus::Failed),
        1 => Ok(OutcomeStatus::Succeeded),
        2 => Ok(OutcomeStatus::Skipped),
        _ => Err(SyncError::RunLog(format!("Invalid outcome status: {}", value))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_status_roundtrip() {
        for status in [
            OutcomeStatus::Failed,
            OutcomeStatus::Succeeded,
            OutcomeStatus::Skipped,
        ] {
            let stored = outcome_status_to_i32(status);
            assert_eq!(i32_to_outcome_status(stored).unwrap(), status);
        }
    }

    #[test]
    fn test_failed_is_zero() {
        assert_eq!(outcome_status_to_i32(OutcomeStatus::Failed), 0);
        assert_eq!(outcome_status_to_i32(OutcomeStatus::Succeeded), 1);
    }

    #[test]
    fn test_invalid_outcome_status() {
        assert!(i32_to_outcome_status(9).is_err());
    }
}
