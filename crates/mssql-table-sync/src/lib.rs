//! # mssql-table-sync
//!
//! Job-gated SQL Server table replication through tempdb staging.
//!
//! Every base table of a source schema is copied into a global temporary
//! table, then the destination table is dropped, recreated from the source
//! column metadata plus two audit columns, and filled from staging:
//!
//! - **Job gate**: nothing runs unless the named job exists and is enabled
//! - **Batches**: tables run in contiguous batches with bounded concurrency
//! - **Retries**: each table's unit of work is retried with exponential backoff
//! - **Run log**: one durable outcome row per table per execution
//!
//! ## Example
//!
//! ```rust,no_run
//! use mssql_table_sync::{Config, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::new(config).await?;
//!     let result = orchestrator.run().await?;
//!     println!("{} tables copied", result.tables_succeeded);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod orchestrator;
pub mod source;
pub mod staging;
pub mod state;
pub mod target;
pub mod transfer;
pub mod typemap;

#[cfg(test)]
pub(crate) mod test_support;

// Re-exports for convenient access
pub use config::{Config, ConnectionConfig, DispatchMode, SyncConfig};
pub use error::{Result, SyncError};
pub use orchestrator::{
    latest_report, open_control_store, HealthCheckResult, Orchestrator, RoleHealth, RunReport, SyncResult,
};
pub use source::{ChangeTracking, ChangeTrackingReport, ColumnDescriptor};
pub use state::{Job, LogEvent, MssqlControlStore, OutcomeStatus, TableRunOutcome};
pub use transfer::{RetryPolicy, TableWorker};
