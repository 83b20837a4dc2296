//! Change tracking enablement on the source database.

use serde::Serialize;
use tiberius::Query;
use tracing::{info, warn};

use crate::core::identifier::{qualify_mssql, quote_mssql};
use crate::error::Result;
use crate::orchestrator::pools::MssqlPool;
use crate::source::query_base_tables;

/// Default retention of change tracking information, in days.
pub const DEFAULT_RETENTION_DAYS: u32 = 2;

/// Result of an enablement pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChangeTrackingReport {
    pub database: String,
    pub enabled: Vec<String>,
    pub already_enabled: Vec<String>,
    /// Tables whose enablement failed, with the error (e.g. no primary key).
    pub failed: Vec<(String, String)>,
}

/// Turns on database- and table-level change tracking.
pub struct ChangeTracking<'a> {
    pool: &'a MssqlPool,
}

pub(crate) fn enable_database_sql(database: &str, retention_days: u32) -> Result<String> {
    Ok(format!(
        "IF NOT EXISTS (SELECT 1 FROM sys.change_tracking_databases WHERE database_id = DB_ID()) \
         ALTER DATABASE {} SET CHANGE_TRACKING = ON (CHANGE_RETENTION = {} DAYS, AUTO_CLEANUP = ON)",
        quote_mssql(database)?,
        retention_days.max(1)
    ))
}

pub(crate) fn enable_table_sql(schema: &str, table: &str) -> Result<String> {
    Ok(format!(
        "ALTER TABLE {} ENABLE CHANGE_TRACKING WITH (TRACK_COLUMNS_UPDATED = ON)",
        qualify_mssql(schema, table)?
    ))
}

impl<'a> ChangeTracking<'a> {
    pub fn new(pool: &'a MssqlPool) -> Self {
        Self { pool }
    }

    /// Enable change tracking on the database, then on every base table in
    /// the configured schema that is not tracked yet.
    ///
    /// A table that cannot be tracked is reported and skipped; a database
    /// level failure is returned as an error.
    pub async fn enable(&self, retention_days: u32) -> Result<ChangeTrackingReport> {
        let config = self.pool.config();
        let schema = config.schema.as_str();
        let mut conn = self.pool.get_conn().await?;

        let sql = enable_database_sql(&config.database, retention_days)?;
        conn.simple_query(sql).await?.into_results().await?;
        info!("Change tracking enabled for database {}", config.database);

        let mut report = ChangeTrackingReport {
            database: config.database.clone(),
            ..Default::default()
        };

        for table in query_base_tables(&mut *conn, schema).await? {
            let qualified = match qualify_mssql(schema, &table) {
                Ok(q) => q,
                Err(e) => {
                    warn!("Skipping change tracking for {}: {}", table, e);
                    report.failed.push((table, e.to_string()));
                    continue;
                }
            };

            let mut query = Query::new(
                "SELECT COUNT(*) FROM sys.change_tracking_tables WHERE object_id = OBJECT_ID(@P1)",
            );
            query.bind(qualified.as_str());
            let tracked: i32 = query
                .query(&mut *conn)
                .await?
                .into_row()
                .await?
                .and_then(|row| row.get(0))
                .unwrap_or(0);

            if tracked > 0 {
                info!("Change tracking already enabled for table: {}", table);
                report.already_enabled.push(table);
                continue;
            }

            let sql = enable_table_sql(schema, &table)?;
            let result = match conn.simple_query(sql).await {
                Ok(stream) => stream.into_results().await.map(|_| ()),
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => {
                    info!("Change tracking enabled for table: {}", table);
                    report.enabled.push(table);
                }
                Err(e) => {
                    warn!("Failed to enable change tracking for {}: {}", table, e);
                    report.failed.push((table, e.to_string()));
                }
            }
        }

        Ok(report)
    }
}
