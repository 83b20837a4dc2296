//! Batch partitioning and dispatch.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{error, info};

use crate::config::DispatchMode;
use crate::state::TableRunOutcome;

/// Work the scheduler dispatches, one call per table.
#[async_trait]
pub trait TableTask: Send + Sync + 'static {
    /// Process one table. Must record and return exactly one outcome.
    async fn run(&self, table: String) -> TableRunOutcome;

    /// Record an outcome for a table whose `run` never returned (panic).
    async fn abandon(&self, table: String, reason: String) -> TableRunOutcome;
}

/// Split `tables` into contiguous batches of at most `batch_size`, in order.
pub fn partition(tables: &[String], batch_size: usize) -> Vec<Vec<String>> {
    tables
        .chunks(batch_size.max(1))
        .map(|chunk| chunk.to_vec())
        .collect()
}

/// Runs batches strictly one after another.
#[derive(Debug, Clone, Copy)]
pub struct BatchScheduler {
    batch_size: usize,
    mode: DispatchMode,
}

impl BatchScheduler {
    /// Create a scheduler; `Auto` is resolved against the host here.
    pub fn new(batch_size: usize, mode: DispatchMode) -> Self {
        Self {
            batch_size: batch_size.max(1),
            mode: mode.resolve(),
        }
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Run every table through `task` and return one outcome per table.
    ///
    /// A batch starts only after every worker of the previous batch has
    /// terminated. Within a parallel batch, completion order is unspecified.
    pub async fn run<T: TableTask>(&self, task: Arc<T>, tables: &[String]) -> Vec<TableRunOutcome> {
        let batches = partition(tables, self.batch_size);
        let total = batches.len();
        let mut outcomes = Vec::with_capacity(tables.len());

        for (index, batch) in batches.into_iter().enumerate() {
            info!(
                "Processing batch {}/{} ({} tables, {:?})",
                index + 1,
                total,
                batch.len(),
                self.mode
            );
            let batch_outcomes = match self.mode {
                DispatchMode::Sequential => Self::run_sequential(&task, batch).await,
                _ => self.run_parallel(&task, batch).await,
            };
            outcomes.extend(batch_outcomes);
        }

        outcomes
    }

    async fn run_parallel<T: TableTask>(&self, task: &Arc<T>, batch: Vec<String>) -> Vec<TableRunOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.batch_size));
        let mut handles = Vec::with_capacity(batch.len());

        for table in batch {
            let task = task.clone();
            let semaphore = semaphore.clone();
            let name = table.clone();
            let handle = tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                task.run(name).await
            });
            handles.push((table, handle));
        }

        let (tables, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        let results = join_all(handles).await;

        let mut outcomes = Vec::with_capacity(results.len());
        for (table, result) in tables.into_iter().zip(results) {
            outcomes.push(Self::settle(task, table, result).await);
        }
        outcomes
    }

    async fn run_sequential<T: TableTask>(task: &Arc<T>, batch: Vec<String>) -> Vec<TableRunOutcome> {
        let mut outcomes = Vec::with_capacity(batch.len());
        for table in batch {
            let worker = task.clone();
            let name = table.clone();
            // Spawned so a panic stays contained to this table
            let result = tokio::spawn(async move { worker.run(name).await }).await;
            outcomes.push(Self::settle(task, table, result).await);
        }
        outcomes
    }

    async fn settle<T: TableTask>(
        task: &Arc<T>,
        table: String,
        result: std::result::Result<TableRunOutcome, tokio::task::JoinError>,
    ) -> TableRunOutcome {
        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("{}: task panicked - {}", table, e);
                task.abandon(table, e.to_string()).await
            }
        }
    }
}
