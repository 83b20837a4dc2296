//! Destination table replacement and load.

use tracing::debug;

use crate::core::identifier::{qualify_mssql, quote_list, quote_literal, quote_mssql};
use crate::core::traits::SqlSession;
use crate::error::{SyncError, Result};
use crate::source::ColumnDescriptor;
use crate::staging::staging_reference;
use crate::typemap::column_definitions;

/// Soft-delete flag appended to every destination table.
pub const SOFT_DELETE_COLUMN: &str = "warehouse_isDeleted";

/// Latest-update timestamp appended to every destination table.
pub const LATEST_UPDATE_COLUMN: &str = "latest_updated";

/// Trailing audit column definitions, in table order.
pub fn audit_column_definitions() -> Result<[String; 2]> {
    Ok([
        format!("{} BIT NOT NULL DEFAULT 0", quote_mssql(SOFT_DELETE_COLUMN)?),
        format!("{} DATETIME2 NULL", quote_mssql(LATEST_UPDATE_COLUMN)?),
    ])
}

fn check_audit_collision(table: &str, columns: &[ColumnDescriptor]) -> Result<()> {
    let clash = columns.iter().find(|c| {
        c.name.eq_ignore_ascii_case(SOFT_DELETE_COLUMN)
            || c.name.eq_ignore_ascii_case(LATEST_UPDATE_COLUMN)
    });

    match clash {
        Some(col) => Err(SyncError::Identifier(format!(
            "source column {:?} of table {:?} collides with an audit column",
            col.name, table
        ))),
        None => Ok(()),
    }
}

/// Drop the destination table when it exists.
pub fn drop_table_sql(schema: &str, table: &str) -> Result<String> {
    let qualified = qualify_mssql(schema, table)?;
    Ok(format!(
        "IF OBJECT_ID({}, N'U') IS NOT NULL DROP TABLE {}",
        quote_literal(&qualified),
        qualified
    ))
}

/// Create the destination table: mapped source columns plus the audit columns.
pub fn create_table_sql(schema: &str, table: &str, columns: &[ColumnDescriptor]) -> Result<String> {
    check_audit_collision(table, columns)?;

    let mut defs = column_definitions(columns)?;
    defs.extend(audit_column_definitions()?);

    Ok(format!(
        "CREATE TABLE {} ({})",
        qualify_mssql(schema, table)?,
        defs.join(", ")
    ))
}

/// Populate the destination table from staging with default audit values.
pub fn insert_sql(
    schema: &str,
    table: &str,
    staging: &str,
    columns: &[ColumnDescriptor],
) -> Result<String> {
    let source_columns = quote_list(columns.iter().map(|c| c.name.as_str()))?;
    Ok(format!(
        "INSERT INTO {} ({}, {}, {}) SELECT {}, 0, NULL FROM {}",
        qualify_mssql(schema, table)?,
        source_columns,
        quote_mssql(SOFT_DELETE_COLUMN)?,
        quote_mssql(LATEST_UPDATE_COLUMN)?,
        source_columns,
        staging_reference(staging)?
    ))
}

/// Statements that replace and load one destination table, in order.
///
/// All statements are built before any is executed, so a name or collision
/// problem never leaves the destination half-replaced.
pub fn load_statements(
    schema: &str,
    table: &str,
    staging: &str,
    columns: &[ColumnDescriptor],
) -> Result<Vec<String>> {
    Ok(vec![
        drop_table_sql(schema, table)?,
        create_table_sql(schema, table, columns)?,
        insert_sql(schema, table, staging, columns)?,
    ])
}

/// Replace `schema.table` on the destination and load it from `staging`.
///
/// Runs inside the caller's transaction. The previous table is gone once the
/// drop executes; a failed load leaves the table absent or empty.
pub async fn load<S: SqlSession + ?Sized>(
    session: &mut S,
    schema: &str,
    table: &str,
    staging: &str,
    columns: &[ColumnDescriptor],
) -> Result<()> {
    let statements = load_statements(schema, table, staging, columns)?;

    for sql in &statements {
        debug!("{}", sql);
        session
            .execute(sql)
            .await
            .map_err(|e| SyncError::load(table, e))?;
    }

    debug!("Loaded {}.{} from {}", schema, table, staging);
    Ok(())
}
