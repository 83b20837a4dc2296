//! Identifier validation and quoting for generated T-SQL.
//!
//! Table, column and type names come from the source catalog rather than from
//! user input, but they are still interpolated into DDL/DML text (identifiers
//! cannot be bound as parameters). Every name passes an allow-list check
//! before it is bracket-quoted:
//!
//! 1. Non-empty, at most [`MAX_IDENTIFIER_LENGTH`] characters
//! 2. Every character alphanumeric or one of [`ALLOWED_PUNCTUATION`]
//! 3. Closing brackets doubled inside the quotes (`]` never passes step 2,
//!    the escaping is kept so quoting stays correct on its own)

use crate::error::{SyncError, Result};

/// SQL Server `sysname` length.
pub const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Punctuation accepted inside identifiers in addition to alphanumerics.
pub const ALLOWED_PUNCTUATION: &[char] = &['_', '-', '$', '#', '@', ' ', '.'];

/// Validate an identifier against the allow-listed grammar.
///
/// # Errors
///
/// Returns `SyncError::Identifier` with a description of the violation.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(SyncError::Identifier(
            "identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(SyncError::Identifier(format!(
            "identifier contains null byte: {:?}",
            name
        )));
    }

    let len = name.chars().count();
    if len > MAX_IDENTIFIER_LENGTH {
        return Err(SyncError::Identifier(format!(
            "identifier exceeds maximum length of {} characters (got {}): {:?}",
            MAX_IDENTIFIER_LENGTH, len, name
        )));
    }

    if let Some(bad) = name
        .chars()
        .find(|c| !c.is_alphanumeric() && !ALLOWED_PUNCTUATION.contains(c))
    {
        return Err(SyncError::Identifier(format!(
            "identifier contains disallowed character {:?}: {:?}",
            bad, name
        )));
    }

    if name.starts_with(' ') || name.ends_with(' ') {
        return Err(SyncError::Identifier(format!(
            "identifier has leading or trailing whitespace: {:?}",
            name
        )));
    }

    Ok(())
}

/// Validate a catalog data type name (`int`, `nvarchar`, `datetime2`, ...).
///
/// Type names are emitted unquoted, so the grammar is narrower than for
/// identifiers: ASCII letters, digits, underscore and inner single spaces
/// (`double precision` style names).
pub fn validate_type_name(data_type: &str) -> Result<()> {
    let ok = !data_type.is_empty()
        && data_type.len() <= MAX_IDENTIFIER_LENGTH
        && data_type.starts_with(|c: char| c.is_ascii_alphabetic())
        && !data_type.ends_with(' ')
        && !data_type.contains("  ")
        && data_type
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ' ');

    if ok {
        Ok(())
    } else {
        Err(SyncError::Identifier(format!(
            "unsupported data type name: {:?}",
            data_type
        )))
    }
}

/// Quote a SQL Server identifier using brackets.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(quote_mssql("users")?, "[users]");
/// assert_eq!(quote_mssql("Order-Items")?, "[Order-Items]");
/// ```
pub fn quote_mssql(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("[{}]", name.replace(']', "]]")))
}

/// Qualify a SQL Server table name with schema.
///
/// Returns `[schema].[table]` with proper quoting.
pub fn qualify_mssql(schema: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_mssql(schema)?, quote_mssql(table)?))
}

/// Quote and comma-join a list of column names.
pub fn quote_list<'a, I>(names: I) -> Result<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let quoted = names
        .into_iter()
        .map(quote_mssql)
        .collect::<Result<Vec<_>>>()?;
    Ok(quoted.join(", "))
}

/// Render a Unicode string literal, doubling embedded single quotes.
pub fn quote_literal(value: &str) -> String {
    format!("N'{}'", value.replace('\'', "''"))
}
