//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source database the tables are read from.
    pub source: ConnectionConfig,

    /// Destination database the tables are replaced in.
    pub destination: ConnectionConfig,

    /// Staging connection (tempdb). Defaults to the source server's tempdb.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging: Option<ConnectionConfig>,

    /// Database holding jobs, job_tables and log_details.
    /// Defaults to the destination connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control: Option<ConnectionConfig>,

    /// Pipeline behavior.
    #[serde(default)]
    pub sync: SyncConfig,
}

impl Config {
    /// Effective staging connection.
    pub fn staging_config(&self) -> ConnectionConfig {
        self.staging.clone().unwrap_or_else(|| ConnectionConfig {
            database: "tempdb".to_string(),
            ..self.source.clone()
        })
    }

    /// Effective control (run log) connection.
    pub fn control_config(&self) -> ConnectionConfig {
        self.control
            .clone()
            .unwrap_or_else(|| self.destination.clone())
    }
}

/// SQL Server connection settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 1433).
    #[serde(default = "default_mssql_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Schema holding the replicated tables (default: "dbo").
    #[serde(default = "default_dbo_schema")]
    pub schema: String,

    /// Encrypt connection (default: "true").
    #[serde(default = "default_true_string")]
    pub encrypt: String,

    /// Trust server certificate (default: false).
    #[serde(default)]
    pub trust_server_cert: bool,
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("encrypt", &self.encrypt)
            .field("trust_server_cert", &self.trust_server_cert)
            .finish()
    }
}

/// How the tables of one batch are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Parallel when the host offers more than one unit of parallelism.
    #[default]
    Auto,

    /// Every table of a batch runs concurrently.
    Parallel,

    /// Tables run one at a time.
    Sequential,
}

impl DispatchMode {
    /// Resolve `Auto` against the current host.
    pub fn resolve(self) -> DispatchMode {
        match self {
            DispatchMode::Auto => {
                let units = std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1);
                if units > 1 {
                    DispatchMode::Parallel
                } else {
                    DispatchMode::Sequential
                }
            }
            other => other,
        }
    }
}

/// Pipeline behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Job name looked up in the jobs table before running.
    #[serde(default = "default_job_name")]
    pub job_name: String,

    /// Tables per batch; also the concurrency bound.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Additional attempts after the first failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Exponential base of the retry delay.
    #[serde(default = "default_backoff_base")]
    pub backoff_base: u32,

    /// Length of one backoff time unit in milliseconds.
    #[serde(default = "default_backoff_unit_ms")]
    pub backoff_unit_ms: u64,

    /// Batch dispatch mode (default: auto).
    #[serde(default)]
    pub dispatch: DispatchMode,

    /// Marker prefix of staging tables in tempdb.
    #[serde(default = "default_staging_prefix")]
    pub staging_prefix: String,

    /// Disable destination foreign-key checks before the run (default: true).
    #[serde(default = "default_true")]
    pub suspend_constraints: bool,

    /// Tables to include (exact names, case-insensitive). Empty means all.
    #[serde(default)]
    pub include_tables: Vec<String>,

    /// Tables to exclude (exact names, case-insensitive).
    #[serde(default)]
    pub exclude_tables: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            job_name: default_job_name(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            backoff_base: default_backoff_base(),
            backoff_unit_ms: default_backoff_unit_ms(),
            dispatch: DispatchMode::default(),
            staging_prefix: default_staging_prefix(),
            suspend_constraints: true,
            include_tables: Vec::new(),
            exclude_tables: Vec::new(),
        }
    }
}

impl SyncConfig {
    pub fn backoff_unit(&self) -> Duration {
        Duration::from_millis(self.backoff_unit_ms)
    }

    /// Apply include/exclude filters to an enumerated table list.
    pub fn selects_table(&self, table: &str) -> bool {
        let included = self.include_tables.is_empty()
            || self
                .include_tables
                .iter()
                .any(|t| t.eq_ignore_ascii_case(table));
        let excluded = self
            .exclude_tables
            .iter()
            .any(|t| t.eq_ignore_ascii_case(table));
        included && !excluded
    }
}

// Default value functions for serde
fn default_mssql_port() -> u16 {
    1433
}

fn default_dbo_schema() -> String {
    "dbo".to_string()
}

fn default_true_string() -> String {
    "true".to_string()
}

fn default_true() -> bool {
    true
}

fn default_job_name() -> String {
    "tables:copy".to_string()
}

fn default_batch_size() -> usize {
    5
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base() -> u32 {
    2
}

fn default_backoff_unit_ms() -> u64 {
    1000
}

fn default_staging_prefix() -> String {
    "##sync_".to_string()
}
