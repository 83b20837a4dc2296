//! Source catalog access: table enumeration and schema introspection.

mod change_tracking;
mod types;

pub use change_tracking::{ChangeTracking, ChangeTrackingReport, DEFAULT_RETENTION_DAYS};
pub use types::*;

use crate::core::traits::CatalogSession;
use crate::error::{SyncError, Result};
use crate::orchestrator::pools::MssqlClient;
use tiberius::Query;
use tracing::debug;

const BASE_TABLES_QUERY: &str = r#"
    SELECT TABLE_NAME
    FROM INFORMATION_SCHEMA.TABLES
    WHERE TABLE_TYPE = 'BASE TABLE'
      AND TABLE_SCHEMA = @P1
    ORDER BY TABLE_NAME
"#;

const COLUMNS_QUERY: &str = r#"
    SELECT
        COLUMN_NAME,
        DATA_TYPE,
        CAST(CHARACTER_MAXIMUM_LENGTH AS INT),
        CAST(NUMERIC_PRECISION AS INT),
        CAST(NUMERIC_SCALE AS INT)
    FROM INFORMATION_SCHEMA.COLUMNS
    WHERE TABLE_SCHEMA = @P1 AND TABLE_NAME = @P2
    ORDER BY ORDINAL_POSITION
"#;

/// Read the ordered column list of one source table.
///
/// Any catalog failure (connectivity, permissions) surfaces as
/// `SchemaLookup`. An empty result is returned as-is; the caller decides
/// whether a column-less table is an error.
pub async fn introspect<S: CatalogSession + ?Sized>(
    session: &mut S,
    schema: &str,
    table: &str,
) -> Result<Vec<ColumnDescriptor>> {
    let columns = session
        .columns(schema, table)
        .await
        .map_err(|e| match e {
            SyncError::SchemaLookup { .. } => e,
            other => SyncError::schema_lookup(table, other),
        })?;

    debug!("Loaded {} columns for {}.{}", columns.len(), schema, table);
    Ok(columns)
}

/// Enumerate base tables in `schema` on a raw client.
pub(crate) async fn query_base_tables(client: &mut MssqlClient, schema: &str) -> Result<Vec<String>> {
    let mut query = Query::new(BASE_TABLES_QUERY);
    query.bind(schema);

    let stream = query.query(client).await?;
    let rows = stream.into_first_result().await?;

    let mut tables = Vec::with_capacity(rows.len());
    for row in rows {
        let name: Option<&str> = row.try_get(0)?;
        if let Some(name) = name {
            tables.push(name.to_string());
        }
    }

    debug!("Found {} base tables in schema {}", tables.len(), schema);
    Ok(tables)
}

/// Load column metadata for a table on a raw client.
pub(crate) async fn query_columns(
    client: &mut MssqlClient,
    schema: &str,
    table: &str,
) -> Result<Vec<ColumnDescriptor>> {
    let mut query = Query::new(COLUMNS_QUERY);
    query.bind(schema);
    query.bind(table);

    let stream = query
        .query(client)
        .await
        .map_err(|e| SyncError::schema_lookup(table, e))?;
    let rows = stream
        .into_first_result()
        .await
        .map_err(|e| SyncError::schema_lookup(table, e))?;

    let mut columns = Vec::with_capacity(rows.len());
    for row in rows {
        let name: &str = row
            .try_get(0)?
            .ok_or_else(|| SyncError::schema_lookup(table, "missing column name"))?;
        let data_type: &str = row
            .try_get(1)?
            .ok_or_else(|| SyncError::schema_lookup(table, "missing data type"))?;

        columns.push(ColumnDescriptor {
            name: name.to_string(),
            data_type: data_type.to_string(),
            max_length: row.try_get::<i32, _>(2)?,
            numeric_precision: row.try_get::<i32, _>(3)?,
            numeric_scale: row.try_get::<i32, _>(4)?,
        });
    }

    Ok(columns)
}
