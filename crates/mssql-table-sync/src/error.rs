//! Error types for the replication pipeline.

use thiserror::Error;

/// Main error type for sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The job is disabled or not registered; nothing was processed.
    #[error("Job '{0}' is disabled or not found in the jobs list")]
    GateDisabled(String),

    /// Database connection or query error
    #[error("Database error: {0}")]
    Database(#[from] tiberius::error::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Identifier rejected before interpolation into SQL.
    #[error("Invalid identifier: {0}")]
    Identifier(String),

    /// Column metadata could not be read from the source catalog.
    #[error("Schema lookup failed for table {table}: {message}")]
    SchemaLookup { table: String, message: String },

    /// The source catalog returned no columns for the table.
    #[error("Table {0} has no columns in the source catalog")]
    NoColumns(String),

    /// Copying rows into the staging object failed.
    #[error("Staging transfer failed for table {table}: {message}")]
    Transfer { table: String, message: String },

    /// Recreating or populating the destination table failed.
    #[error("Destination load failed for table {table}: {message}")]
    Load { table: String, message: String },

    /// Dropping a staging object failed.
    #[error("Staging cleanup failed for {name}: {message}")]
    StagingCleanup { name: String, message: String },

    /// Reading or writing the run log failed.
    #[error("Run log error: {0}")]
    RunLog(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl std::fmt::Display, context: impl Into<String>) -> Self {
        SyncError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    pub fn schema_lookup(table: impl Into<String>, message: impl std::fmt::Display) -> Self {
        SyncError::SchemaLookup {
            table: table.into(),
            message: message.to_string(),
        }
    }

    pub fn transfer(table: impl Into<String>, message: impl std::fmt::Display) -> Self {
        SyncError::Transfer {
            table: table.into(),
            message: message.to_string(),
        }
    }

    pub fn load(table: impl Into<String>, message: impl std::fmt::Display) -> Self {
        SyncError::Load {
            table: table.into(),
            message: message.to_string(),
        }
    }

    pub fn staging_cleanup(name: impl Into<String>, message: impl std::fmt::Display) -> Self {
        SyncError::StagingCleanup {
            name: name.into(),
            message: message.to_string(),
        }
    }

    /// Whether re-running the unit of work could plausibly succeed.
    ///
    /// Identifier, configuration and empty-schema problems are deterministic
    /// and are reported immediately instead of burning retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Database(_)
                | SyncError::Pool { .. }
                | SyncError::SchemaLookup { .. }
                | SyncError::Transfer { .. }
                | SyncError::Load { .. }
        )
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            SyncError::GateDisabled(_) => 0,
            SyncError::Config(_)
            | SyncError::Identifier(_)
            | SyncError::Yaml(_)
            | SyncError::Json(_) => 1,
            SyncError::Database(_) | SyncError::Pool { .. } => 2,
            SyncError::SchemaLookup { .. }
            | SyncError::NoColumns(_)
            | SyncError::Transfer { .. }
            | SyncError::Load { .. }
            | SyncError::StagingCleanup { .. } => 3,
            SyncError::RunLog(_) => 4,
            SyncError::Io(_) => 7,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
