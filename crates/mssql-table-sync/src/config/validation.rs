//! Configuration validation.

use super::{Config, ConnectionConfig};
use crate::error::{SyncError, Result};
use crate::staging::validate_prefix;

fn validate_connection(role: &str, conn: &ConnectionConfig) -> Result<()> {
    if conn.host.is_empty() {
        return Err(SyncError::Config(format!("{}.host is required", role)));
    }
    if conn.database.is_empty() {
        return Err(SyncError::Config(format!("{}.database is required", role)));
    }
    if conn.user.is_empty() {
        return Err(SyncError::Config(format!("{}.user is required", role)));
    }
    if conn.schema.is_empty() {
        return Err(SyncError::Config(format!("{}.schema is required", role)));
    }
    Ok(())
}

fn same_instance(a: &ConnectionConfig, b: &ConnectionConfig) -> bool {
    a.host.eq_ignore_ascii_case(&b.host) && a.port == b.port
}

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    validate_connection("source", &config.source)?;
    validate_connection("destination", &config.destination)?;
    if let Some(staging) = &config.staging {
        validate_connection("staging", staging)?;
    }
    if let Some(control) = &config.control {
        validate_connection("control", control)?;
    }

    // Global temporary tables are visible only within one server instance
    if !same_instance(&config.source, &config.destination) {
        return Err(SyncError::Config(format!(
            "source ({}) and destination ({}) must be on the same SQL Server instance",
            config.source.endpoint(),
            config.destination.endpoint()
        )));
    }
    if let Some(staging) = &config.staging {
        if !same_instance(&config.source, staging) {
            return Err(SyncError::Config(format!(
                "staging ({}) must be on the same SQL Server instance as source ({})",
                staging.endpoint(),
                config.source.endpoint()
            )));
        }
    }

    // Cannot replicate onto the source itself
    if config
            .source
            .database
            .eq_ignore_ascii_case(&config.destination.database)
    {
        return Err(SyncError::Config(
            "source and destination cannot be the same database".into(),
        ));
    }

    let sync = &config.sync;
    if sync.job_name.trim().is_empty() {
        return Err(SyncError::Config("sync.job_name is required".into()));
    }
    if sync.batch_size == 0 {
        return Err(SyncError::Config(
            "sync.batch_size must be at least 1".into(),
        ));
    }
    if sync.backoff_base == 0 {
        return Err(SyncError::Config(
            "sync.backoff_base must be at least 1".into(),
        ));
    }
    validate_prefix(&sync.staging_prefix)
        .map_err(|e| SyncError::Config(format!("sync.staging_prefix: {}", e)))?;

    Ok(())
}
