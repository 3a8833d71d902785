//! Schema introspection data models.

use serde::Serialize;

/// One column in a table's schema, as reported by the engine's catalog.
#[derive(Debug, Clone, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    /// Engine-specific type name (e.g. "varchar", "int8", "decimal")
    pub data_type: String,
    pub nullable: bool,
    /// Maximum character length for text types, when the catalog reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    /// 1-based position within the table.
    pub ordinal_position: i32,
}
