//! Row decoding into the unified value model.
//!
//! Type conversion uses a two-phase approach: [`categorize_type`] classifies
//! the engine's column type name into a logical category, then the
//! engine-specific decoders extract the value. This keeps the classification
//! logic in one place while allowing per-engine handling where the drivers
//! differ.

use crate::models::{SqlValue, ValueMap};
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::{Column, Decode, Row, Type, TypeInfo};

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Timestamp,
    Unknown,
}

/// Classify an engine type name into a logical category.
pub(crate) fn categorize_type(type_name: &str) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Decimal/Numeric first - "numeric" overlaps with float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        return TypeCategory::Decimal;
    }

    if lower.contains("int") || lower.contains("serial") || lower.contains("tiny") {
        return TypeCategory::Integer;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("float")
        || lower.contains("double")
        || lower == "real"
        || lower == "float4"
        || lower == "float8"
    {
        return TypeCategory::Float;
    }

    if lower.contains("timestamp") || lower == "datetime" {
        return TypeCategory::Timestamp;
    }

    if lower.contains("char") || lower.contains("text") {
        return TypeCategory::Text;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    // Dates, times, enums, uuids and friends all decode via the text path
    TypeCategory::Unknown
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Wrapper decoding DECIMAL/NUMERIC columns as their raw string form.
/// This preserves the exact database representation instead of rounding
/// through a binary float.
#[derive(Debug)]
pub(crate) struct DecimalText(pub String);

impl Type<sqlx::MySql> for DecimalText {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for DecimalText {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(DecimalText(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for DecimalText {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for DecimalText {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(DecimalText(s.to_string()))
    }
}

/// Encode binary column data as base64 text.
pub(crate) fn binary_to_value(bytes: &[u8]) -> SqlValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    SqlValue::Text(STANDARD.encode(bytes))
}

// =============================================================================
// Row Conversion
// =============================================================================

/// Convert a MySQL row into an ordered column/value map.
pub(crate) fn mysql_row_to_values(row: &MySqlRow) -> ValueMap {
    let mut map = ValueMap::new();
    for (idx, col) in row.columns().iter().enumerate() {
        let category = categorize_type(col.type_info().name());
        map.insert(col.name().to_string(), mysql::decode_column(row, idx, category));
    }
    map
}

/// Convert a PostgreSQL row into an ordered column/value map.
pub(crate) fn postgres_row_to_values(row: &PgRow) -> ValueMap {
    let mut map = ValueMap::new();
    for (idx, col) in row.columns().iter().enumerate() {
        let category = categorize_type(col.type_info().name());
        map.insert(col.name().to_string(), postgres::decode_column(row, idx, category));
    }
    map
}

// =============================================================================
// Engine-Specific Decoders
// =============================================================================
//
// The two modules below provide the same interface adapted to each driver's
// type system. The structure is intentionally parallel to make differences
// obvious.

mod mysql {
    use super::*;
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

    pub fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> SqlValue {
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Timestamp => decode_timestamp(row, idx),
            TypeCategory::Binary => decode_binary(row, idx),
            _ => decode_text(row, idx),
        }
    }

    fn decode_decimal(row: &MySqlRow, idx: usize) -> SqlValue {
        match row.try_get::<Option<DecimalText>, _>(idx) {
            Ok(Some(v)) => SqlValue::Text(v.0),
            Ok(None) => SqlValue::Null,
            Err(e) => {
                tracing::error!("Failed to decode DECIMAL: {:?}", e);
                SqlValue::Null
            }
        }
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> SqlValue {
        // Check NULL first
        if let Ok(None) = row.try_get::<Option<i64>, _>(idx) {
            return SqlValue::Null;
        }
        // Signed widths
        if let Ok(Some(v)) = row.try_get::<Option<i8>, _>(idx) {
            return SqlValue::Int(v as i64);
        }
        if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
            return SqlValue::Int(v as i64);
        }
        if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
            return SqlValue::Int(v as i64);
        }
        if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
            return SqlValue::Int(v);
        }
        // Unsigned widths
        if let Ok(Some(v)) = row.try_get::<Option<u8>, _>(idx) {
            return SqlValue::Int(v as i64);
        }
        if let Ok(Some(v)) = row.try_get::<Option<u16>, _>(idx) {
            return SqlValue::Int(v as i64);
        }
        if let Ok(Some(v)) = row.try_get::<Option<u32>, _>(idx) {
            return SqlValue::Int(v as i64);
        }
        if let Ok(Some(v)) = row.try_get::<Option<u64>, _>(idx) {
            return i64::try_from(v)
                .map(SqlValue::Int)
                .unwrap_or_else(|_| SqlValue::Text(v.to_string()));
        }
        SqlValue::Null
    }

    fn decode_boolean(row: &MySqlRow, idx: usize) -> SqlValue {
        row.try_get::<Option<bool>, _>(idx)
            .ok()
            .flatten()
            .map(SqlValue::Bool)
            .unwrap_or(SqlValue::Null)
    }

    fn decode_float(row: &MySqlRow, idx: usize) -> SqlValue {
        if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
            return SqlValue::Float(v);
        }
        if let Ok(Some(v)) = row.try_get::<Option<f32>, _>(idx) {
            return SqlValue::Float(v as f64);
        }
        SqlValue::Null
    }

    fn decode_timestamp(row: &MySqlRow, idx: usize) -> SqlValue {
        if let Ok(Some(v)) = row.try_get::<Option<DateTime<Utc>>, _>(idx) {
            return SqlValue::Timestamp(v);
        }
        // DATETIME has no zone; treat it as UTC
        if let Ok(Some(v)) = row.try_get::<Option<NaiveDateTime>, _>(idx) {
            return SqlValue::Timestamp(v.and_utc());
        }
        SqlValue::Null
    }

    fn decode_binary(row: &MySqlRow, idx: usize) -> SqlValue {
        row.try_get::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map(|v| binary_to_value(&v))
            .unwrap_or(SqlValue::Null)
    }

    fn decode_text(row: &MySqlRow, idx: usize) -> SqlValue {
        if let Ok(Some(v)) = row.try_get::<Option<String>, _>(idx) {
            return SqlValue::Text(v);
        }
        if let Ok(Some(v)) = row.try_get::<Option<NaiveDate>, _>(idx) {
            return SqlValue::Text(v.to_string());
        }
        if let Ok(Some(v)) = row.try_get::<Option<NaiveTime>, _>(idx) {
            return SqlValue::Text(v.to_string());
        }
        SqlValue::Null
    }
}

mod postgres {
    use super::*;
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

    pub fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> SqlValue {
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Timestamp => decode_timestamp(row, idx),
            TypeCategory::Binary => decode_binary(row, idx),
            _ => decode_text(row, idx),
        }
    }

    fn decode_decimal(row: &PgRow, idx: usize) -> SqlValue {
        match row.try_get::<Option<DecimalText>, _>(idx) {
            Ok(Some(v)) => SqlValue::Text(v.0),
            Ok(None) => SqlValue::Null,
            Err(e) => {
                tracing::error!("Failed to decode NUMERIC: {:?}", e);
                SqlValue::Null
            }
        }
    }

    fn decode_integer(row: &PgRow, idx: usize) -> SqlValue {
        if let Ok(None) = row.try_get::<Option<i64>, _>(idx) {
            return SqlValue::Null;
        }
        if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
            return SqlValue::Int(v as i64);
        }
        if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
            return SqlValue::Int(v as i64);
        }
        if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
            return SqlValue::Int(v);
        }
        SqlValue::Null
    }

    fn decode_boolean(row: &PgRow, idx: usize) -> SqlValue {
        row.try_get::<Option<bool>, _>(idx)
            .ok()
            .flatten()
            .map(SqlValue::Bool)
            .unwrap_or(SqlValue::Null)
    }

    fn decode_float(row: &PgRow, idx: usize) -> SqlValue {
        if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
            return SqlValue::Float(v);
        }
        if let Ok(Some(v)) = row.try_get::<Option<f32>, _>(idx) {
            return SqlValue::Float(v as f64);
        }
        SqlValue::Null
    }

    fn decode_timestamp(row: &PgRow, idx: usize) -> SqlValue {
        if let Ok(Some(v)) = row.try_get::<Option<DateTime<Utc>>, _>(idx) {
            return SqlValue::Timestamp(v);
        }
        if let Ok(Some(v)) = row.try_get::<Option<NaiveDateTime>, _>(idx) {
            return SqlValue::Timestamp(v.and_utc());
        }
        SqlValue::Null
    }

    fn decode_binary(row: &PgRow, idx: usize) -> SqlValue {
        row.try_get::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map(|v| binary_to_value(&v))
            .unwrap_or(SqlValue::Null)
    }

    fn decode_text(row: &PgRow, idx: usize) -> SqlValue {
        if let Ok(Some(v)) = row.try_get::<Option<String>, _>(idx) {
            return SqlValue::Text(v);
        }
        if let Ok(Some(v)) = row.try_get::<Option<NaiveDate>, _>(idx) {
            return SqlValue::Text(v.to_string());
        }
        if let Ok(Some(v)) = row.try_get::<Option<NaiveTime>, _>(idx) {
            return SqlValue::Text(v.to_string());
        }
        SqlValue::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_integer_types() {
        assert_eq!(categorize_type("INT"), TypeCategory::Integer);
        assert_eq!(categorize_type("BIGINT"), TypeCategory::Integer);
        assert_eq!(categorize_type("TINYINT"), TypeCategory::Integer);
        assert_eq!(categorize_type("serial"), TypeCategory::Integer);
    }

    #[test]
    fn test_categorize_decimal_before_numeric_overlap() {
        assert_eq!(categorize_type("DECIMAL"), TypeCategory::Decimal);
        assert_eq!(categorize_type("NUMERIC"), TypeCategory::Decimal);
    }

    #[test]
    fn test_categorize_temporal_types() {
        assert_eq!(categorize_type("TIMESTAMP"), TypeCategory::Timestamp);
        assert_eq!(categorize_type("timestamptz"), TypeCategory::Timestamp);
        assert_eq!(categorize_type("DATETIME"), TypeCategory::Timestamp);
        // Bare dates/times take the text path
        assert_eq!(categorize_type("DATE"), TypeCategory::Unknown);
    }

    #[test]
    fn test_categorize_text_and_binary() {
        assert_eq!(categorize_type("VARCHAR"), TypeCategory::Text);
        assert_eq!(categorize_type("TEXT"), TypeCategory::Text);
        assert_eq!(categorize_type("BLOB"), TypeCategory::Binary);
        assert_eq!(categorize_type("bytea"), TypeCategory::Binary);
        assert_eq!(categorize_type("BOOLEAN"), TypeCategory::Boolean);
    }

    #[test]
    fn test_binary_to_value_base64() {
        assert_eq!(
            binary_to_value(b"hello world"),
            SqlValue::Text("aGVsbG8gd29ybGQ=".to_string())
        );
        assert_eq!(binary_to_value(&[]), SqlValue::Text(String::new()));
    }
}
