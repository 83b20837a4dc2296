//! Schema and metadata types.

use serde::{Deserialize, Serialize};

/// Sentinel `max_length` the catalog reports for `(MAX)` character columns.
pub const UNBOUNDED_LENGTH: i32 = -1;

/// Column metadata read from `INFORMATION_SCHEMA.COLUMNS`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Column name.
    pub name: String,

    /// Data type (e.g., "int", "nvarchar", "decimal").
    pub data_type: String,

    /// Maximum length for character/binary types (-1 for max).
    pub max_length: Option<i32>,

    /// Numeric precision.
    pub numeric_precision: Option<i32>,

    /// Numeric scale.
    pub numeric_scale: Option<i32>,
}

impl ColumnDescriptor {
    /// Build a descriptor for a type without length or precision.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            max_length: None,
            numeric_precision: None,
            numeric_scale: None,
        }
    }

    pub fn with_length(mut self, max_length: i32) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn with_precision(mut self, precision: i32, scale: i32) -> Self {
        self.numeric_precision = Some(precision);
        self.numeric_scale = Some(scale);
        self
    }

    /// Whether the column is declared `(MAX)`.
    pub fn is_unbounded(&self) -> bool {
        self.max_length == Some(UNBOUNDED_LENGTH)
    }
}
