//! Per-table unit of work: introspect, stage, load, clean up.
//!
//! A [`TableWorker`] copies one table per call and always ends by writing
//! exactly one [`TableRunOutcome`]. Each attempt:
//!
//! 1. opens fresh source and destination sessions
//! 2. begins a transaction on the destination
//! 3. introspects, stages and loads the table
//! 4. commits (or rolls back and hands the error to the [`RetryPolicy`])
//! 5. drops the staging object on a staging session
//!
//! A staging cleanup failure after a successful commit keeps the table
//! `Succeeded` and is reported in the outcome message. Outcome writes go
//! through the same retry policy; tables whose outcome still could not be
//! written are collected in [`TableWorker::unrecorded_tables`].

mod retry;

pub use retry::RetryPolicy;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::identifier::qualify_mssql;
use crate::core::traits::{CatalogSession, SessionFactory, SqlSession};
use crate::error::{SyncError, Result};
use crate::orchestrator::scheduler::TableTask;
use crate::source::{introspect, ColumnDescriptor};
use crate::staging;
use crate::state::{RunLog, TableRunOutcome};
use crate::target;

/// Lifecycle of one table within one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Pending,
    Introspecting,
    Transferring,
    Loading,
    CleaningUp,
    Succeeded,
    Failed,
    Skipped,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerState::Pending => "pending",
            WorkerState::Introspecting => "introspecting",
            WorkerState::Transferring => "transferring",
            WorkerState::Loading => "loading",
            WorkerState::CleaningUp => "cleaning up",
            WorkerState::Succeeded => "succeeded",
            WorkerState::Failed => "failed",
            WorkerState::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Settings shared by every worker of one execution.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub job_id: i64,
    pub run_id: Uuid,
    pub source_schema: String,
    pub destination_schema: String,
    pub staging_prefix: String,
    pub retry: RetryPolicy,
}

/// Copies single tables through staging into the destination.
pub struct TableWorker {
    ctx: WorkerContext,
    sessions: Arc<dyn SessionFactory>,
    run_log: Arc<dyn RunLog>,
    unrecorded: Mutex<Vec<String>>,
}

/// Names resolved before the first attempt.
struct TablePlan<'a> {
    table: &'a str,
    staging: String,
}

impl TableWorker {
    pub fn new(
        ctx: WorkerContext,
        sessions: Arc<dyn SessionFactory>,
        run_log: Arc<dyn RunLog>,
    ) -> Self {
        Self {
            ctx,
            sessions,
            run_log,
            unrecorded: Mutex::new(Vec::new()),
        }
    }

    /// Tables whose outcome row could not be written, in completion order.
    pub async fn unrecorded_tables(&self) -> Vec<String> {
        self.unrecorded.lock().await.clone()
    }

    fn enter(table: &str, state: WorkerState) {
        debug!("{}: {}", table, state);
    }

    /// Validate names and derive the staging object for `table`.
    fn plan<'a>(&self, table: &'a str) -> Result<TablePlan<'a>> {
        qualify_mssql(&self.ctx.source_schema, table)?;
        qualify_mssql(&self.ctx.destination_schema, table)?;
        let staging = staging::staging_name(&self.ctx.staging_prefix, table)?;
        Ok(TablePlan { table, staging })
    }

    /// Copy one table and record its outcome.
    pub async fn run(&self, table: &str) -> TableRunOutcome {
        Self::enter(table, WorkerState::Pending);

        let plan = match self.plan(table) {
            Ok(plan) => plan,
            Err(e) => {
                Self::enter(table, WorkerState::Skipped);
                warn!("Skipping table {}: {}", table, e);
                let outcome =
                    TableRunOutcome::skipped(self.ctx.job_id, self.ctx.run_id, table, e.to_string());
                self.record(&outcome).await;
                return outcome;
            }
        };

        let started = Instant::now();
        let plan = &plan;
        let result = self
            .ctx
            .retry
            .run(table, move |attempt| self.attempt(plan, attempt))
            .await;
        let elapsed = started.elapsed().as_secs_f64();

        let outcome = match result {
            Ok(cleanup_warning) => {
                Self::enter(table, WorkerState::Succeeded);
                info!("Table {} copied successfully in {:.2}s", table, elapsed);
                TableRunOutcome::succeeded(
                    self.ctx.job_id,
                    self.ctx.run_id,
                    table,
                    elapsed,
                    cleanup_warning,
                )
            }
            Err(e) => {
                Self::enter(table, WorkerState::Failed);
                error!("Error copying table {}: {}", table, e);
                self.discard_staging(plan).await;
                TableRunOutcome::failed(
                    self.ctx.job_id,
                    self.ctx.run_id,
                    table,
                    Some(elapsed),
                    e.to_string(),
                )
            }
        };

        self.record(&outcome).await;
        outcome
    }

    /// Outcome for a table whose worker never reported back.
    pub async fn abandon(&self, table: &str, reason: &str) -> TableRunOutcome {
        let outcome = TableRunOutcome::failed(
            self.ctx.job_id,
            self.ctx.run_id,
            table,
            None,
            format!("worker terminated abnormally: {}", reason),
        );
        self.record(&outcome).await;
        outcome
    }

    async fn record(&self, outcome: &TableRunOutcome) {
        let label = format!("{} outcome", outcome.table_name);
        let written = self
            .ctx
            .retry
            .run_when(
                &label,
                |e| e.is_retryable() || matches!(e, SyncError::RunLog(_)),
                |_| self.run_log.record_outcome(outcome),
            )
            .await;

        if let Err(e) = written {
            error!("Failed to record outcome for {}: {}", outcome.table_name, e);
            self.unrecorded.lock().await.push(outcome.table_name.clone());
        }
    }

    /// One complete attempt. Returns the cleanup warning, if any.
    async fn attempt(&self, plan: &TablePlan<'_>, attempt: u32) -> Result<Option<String>> {
        debug!("{}: attempt {}", plan.table, attempt);

        let mut source = self.sessions.source().await?;
        let mut destination = self.sessions.destination().await?;

        destination.begin().await?;
        let staged = match self
            .copy_in_transaction(plan, source.as_mut(), destination.as_mut())
            .await
        {
            Ok(()) => destination.commit().await,
            Err(e) => Err(e),
        };

        if let Err(e) = staged {
            if let Err(rollback) = destination.rollback().await {
                warn!("{}: rollback failed: {}", plan.table, rollback);
            }
            return Err(e);
        }

        Self::enter(plan.table, WorkerState::CleaningUp);
        match self.drop_staging(&plan.staging).await {
            Ok(()) => Ok(None),
            Err(e) => {
                warn!("{}: {}", plan.table, e);
                Ok(Some(e.to_string()))
            }
        }
    }

    async fn copy_in_transaction(
        &self,
        plan: &TablePlan<'_>,
        source: &mut dyn CatalogSession,
        destination: &mut dyn SqlSession,
    ) -> Result<()> {
        Self::enter(plan.table, WorkerState::Introspecting);
        let columns: Vec<ColumnDescriptor> =
            introspect(source, &self.ctx.source_schema, plan.table).await?;
        if columns.is_empty() {
            return Err(SyncError::NoColumns(plan.table.to_string()));
        }

        Self::enter(plan.table, WorkerState::Transferring);
        staging::transfer(
            source,
            &self.ctx.source_schema,
            plan.table,
            &plan.staging,
            &columns,
        )
        .await?;

        Self::enter(plan.table, WorkerState::Loading);
        target::load(
            destination,
            &self.ctx.destination_schema,
            plan.table,
            &plan.staging,
            &columns,
        )
        .await
    }

    async fn drop_staging(&self, name: &str) -> Result<()> {
        let mut session = self
            .sessions
            .staging()
            .await
            .map_err(|e| SyncError::staging_cleanup(name, e))?;
        staging::cleanup(session.as_mut(), name).await
    }

    /// Best-effort drop after the final failed attempt.
    async fn discard_staging(&self, plan: &TablePlan<'_>) {
        if let Err(e) = self.drop_staging(&plan.staging).await {
            warn!("{}: {}", plan.table, e);
        }
    }
}

#[async_trait]
impl TableTask for TableWorker {
    async fn run(&self, table: String) -> TableRunOutcome {
        TableWorker::run(self, &table).await
    }

    async fn abandon(&self, table: String, reason: String) -> TableRunOutcome {
        TableWorker::abandon(self, &table, &reason).await
    }
}
