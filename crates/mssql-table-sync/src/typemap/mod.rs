//! Destination column definitions derived from source column metadata.

use crate::core::identifier::{quote_mssql, validate_type_name};
use crate::error::Result;
use crate::source::ColumnDescriptor;

/// Length token for unbounded character and binary columns.
pub const MAX_LENGTH_TOKEN: &str = "MAX";

/// Render the destination type of a column (`nvarchar(50)`, `decimal(10, 2)`, `int`).
pub fn format_type(column: &ColumnDescriptor) -> Result<String> {
    validate_type_name(&column.data_type)?;
    let data_type = column.data_type.as_str();

    let rendered = match data_type.to_lowercase().as_str() {
        // Character and binary types carry a length
        "char" | "varchar" | "nchar" | "nvarchar" | "binary" | "varbinary" => {
            match column.max_length {
                _ if column.is_unbounded() => format!("{}({})", data_type, MAX_LENGTH_TOKEN),
                Some(length) => format!("{}({})", data_type, length),
                None => data_type.to_string(),
            }
        }

        // Exact numerics carry precision and scale
        "decimal" | "numeric" => match column.numeric_precision {
            Some(precision) => format!(
                "{}({}, {})",
                data_type,
                precision,
                column.numeric_scale.unwrap_or(0)
            ),
            None => data_type.to_string(),
        },

        _ => data_type.to_string(),
    };

    Ok(rendered)
}

/// Render a full column definition: `[name] type`.
pub fn column_definition(column: &ColumnDescriptor) -> Result<String> {
    Ok(format!("{} {}", quote_mssql(&column.name)?, format_type(column)?))
}

/// Column definitions for a whole table, in ordinal order.
pub fn column_definitions(columns: &[ColumnDescriptor]) -> Result<Vec<String>> {
    columns.iter().map(column_definition).collect()
}
