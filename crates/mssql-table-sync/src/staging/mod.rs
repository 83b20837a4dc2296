//! Staging objects in tempdb.
//!
//! Each table is copied into a global temporary table (`##...`) that both the
//! source-side and destination-side sessions can see. The staging name is a
//! pure function of the configured prefix and the table name:
//!
//! - ASCII letters and digits are kept as-is
//! - every other UTF-16 code unit (including `_`) becomes `_` + 4 hex digits
//!
//! so `Order-Items` becomes `##sync_Order_002DItems` and no two table names
//! share a staging object. [`table_from_staging_name`] inverts the mapping.

use tracing::debug;

use crate::core::identifier::{qualify_mssql, quote_list, quote_literal, quote_mssql, MAX_IDENTIFIER_LENGTH};
use crate::core::traits::SqlSession;
use crate::error::{SyncError, Result};
use crate::source::ColumnDescriptor;

/// Marker every global temporary table name starts with.
pub const GLOBAL_TEMP_MARKER: &str = "##";

/// Longest accepted staging prefix.
pub const MAX_PREFIX_LENGTH: usize = 32;

/// Check that a staging prefix is a global temp marker plus `[A-Za-z0-9_]*`.
pub fn validate_prefix(prefix: &str) -> Result<()> {
    let rest = prefix.strip_prefix(GLOBAL_TEMP_MARKER).ok_or_else(|| {
        SyncError::Identifier(format!(
            "staging prefix must start with '{}': {:?}",
            GLOBAL_TEMP_MARKER, prefix
        ))
    })?;

    if prefix.len() > MAX_PREFIX_LENGTH {
        return Err(SyncError::Identifier(format!(
            "staging prefix exceeds {} characters: {:?}",
            MAX_PREFIX_LENGTH, prefix
        )));
    }

    if let Some(bad) = rest
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && *c != '_')
    {
        return Err(SyncError::Identifier(format!(
            "staging prefix contains disallowed character {:?}: {:?}",
            bad, prefix
        )));
    }

    Ok(())
}

/// Derive the staging object name for a table.
///
/// # Errors
///
/// `Identifier` when the encoded name would exceed the engine's identifier
/// length; such a table cannot be staged and is skipped.
pub fn staging_name(prefix: &str, table: &str) -> Result<String> {
    let mut name = String::with_capacity(prefix.len() + table.len());
    name.push_str(prefix);

    for unit in table.encode_utf16() {
        match char::from_u32(u32::from(unit)) {
            Some(c) if c.is_ascii_alphanumeric() => name.push(c),
            _ => name.push_str(&format!("_{:04X}", unit)),
        }
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(SyncError::Identifier(format!(
            "staging name for table {:?} exceeds {} characters",
            table, MAX_IDENTIFIER_LENGTH
        )));
    }

    Ok(name)
}

/// Recover the table name a staging object was derived from.
///
/// Returns `None` for names that do not carry `prefix` or are not valid
/// encodings.
pub fn table_from_staging_name(prefix: &str, name: &str) -> Option<String> {
    let encoded = name.strip_prefix(prefix)?;
    let mut units: Vec<u16> = Vec::with_capacity(encoded.len());
    let mut chars = encoded.chars();

    while let Some(c) = chars.next() {
        if c.is_ascii_alphanumeric() {
            units.push(c as u16);
        } else if c == '_' {
            let hex: String = chars.by_ref().take(4).collect();
            if hex.len() != 4 {
                return None;
            }
            units.push(u16::from_str_radix(&hex, 16).ok()?);
        } else {
            return None;
        }
    }

    String::from_utf16(&units).ok()
}

/// `tempdb..[name]` reference to a staging object.
pub fn staging_reference(name: &str) -> Result<String> {
    Ok(format!("tempdb..{}", quote_mssql(name)?))
}

/// Drop a staging object when present.
pub fn drop_sql(name: &str) -> Result<String> {
    let reference = staging_reference(name)?;
    Ok(format!(
        "IF OBJECT_ID({}, N'U') IS NOT NULL DROP TABLE {}",
        quote_literal(&reference),
        reference
    ))
}

/// Materialize every column of `schema.table` into the staging object.
pub fn copy_sql(
    schema: &str,
    table: &str,
    name: &str,
    columns: &[ColumnDescriptor],
) -> Result<String> {
    let column_list = quote_list(columns.iter().map(|c| c.name.as_str()))?;
    Ok(format!(
        "SELECT {} INTO {} FROM {}",
        column_list,
        staging_reference(name)?,
        qualify_mssql(schema, table)?
    ))
}

/// Drop every staging object carrying `prefix`, whichever table produced it.
pub fn purge_sql(prefix: &str) -> Result<String> {
    validate_prefix(prefix)?;
    let pattern = format!("{}%", prefix.replace('_', "[_]"));
    Ok(format!(
        "DECLARE @sql NVARCHAR(MAX) = N''; \
         SELECT @sql = @sql + N'DROP TABLE tempdb..' + QUOTENAME(name) + N'; ' \
         FROM tempdb.sys.tables WHERE name LIKE {}; \
         IF LEN(@sql) > 0 EXEC sp_executesql @sql;",
        quote_literal(&pattern)
    ))
}

/// Copy a source table into its staging object.
///
/// Any leftover object of the same name is dropped first, so a retry always
/// starts from an empty staging slot.
pub async fn transfer<S: SqlSession + ?Sized>(
    session: &mut S,
    schema: &str,
    table: &str,
    name: &str,
    columns: &[ColumnDescriptor],
) -> Result<()> {
    let drop = drop_sql(name)?;
    let copy = copy_sql(schema, table, name, columns)?;

    debug!("Staging {}.{} into {}", schema, table, name);
    session
        .execute(&drop)
        .await
        .map_err(|e| SyncError::transfer(table, e))?;
    session
        .execute(&copy)
        .await
        .map_err(|e| SyncError::transfer(table, e))?;

    Ok(())
}

/// Drop one staging object. Absent objects are not an error.
pub async fn cleanup<S: SqlSession + ?Sized>(session: &mut S, name: &str) -> Result<()> {
    let sql = drop_sql(name)?;
    session
        .execute(&sql)
        .await
        .map_err(|e| SyncError::staging_cleanup(name, e))
}

/// Drop orphaned staging objects left behind by an earlier run.
pub async fn purge<S: SqlSession + ?Sized>(session: &mut S, prefix: &str) -> Result<()> {
    let sql = purge_sql(prefix)?;
    session
        .execute(&sql)
        .await
        .map_err(|e| SyncError::staging_cleanup(format!("{}*", prefix), e))
}
