//! Backend row decoding into [`CompatibleRow`].
//!
//! Type conversion uses a two-phase approach: `TypeCategory` classifies the
//! driver-reported column type into a logical category, then a per-backend
//! decoder extracts the value. The three decoders are intentionally parallel
//! so differences between backends stay obvious.
//!
//! Decoding is total: a value that cannot be decoded under its declared
//! category falls through a ladder of alternatives and bottoms out at JSON
//! null rather than failing the whole row.

use crate::db::dialect::Dialect;
use crate::db::row::CompatibleRow;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde_json::Value;
use sqlx::mysql::MySqlRow;
use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Boolean,
    Text,
    Binary,
    Json,
    Timestamp,
    Unknown,
}

/// Classify a driver-reported type name into a logical category.
pub fn categorize_type(type_name: &str, dialect: Dialect) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // SQLite reports NUMERIC affinity for several declared types; treat it
    // as a float like the driver does.
    if lower.contains("numeric") || lower.contains("decimal") {
        if dialect == Dialect::Sqlite {
            return TypeCategory::Float;
        }
        return TypeCategory::Unknown;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("int") || lower.contains("serial") {
        return TypeCategory::Integer;
    }

    if lower.contains("float")
        || lower.contains("double")
        || lower == "real"
        || lower == "float4"
        || lower == "float8"
    {
        return TypeCategory::Float;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    if lower.contains("timestamp") || lower.contains("datetime") {
        return TypeCategory::Timestamp;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    if lower.contains("char") || lower.contains("text") {
        return TypeCategory::Text;
    }

    TypeCategory::Unknown
}

/// Decode ladder shared by all backends for values whose declared category
/// did not decode cleanly: text, integer, float, boolean, then null.
macro_rules! fallback_decode {
    ($row:expr, $index:expr) => {{
        if let Ok(v) = $row.try_get::<String, _>($index) {
            Value::from(v)
        } else if let Ok(v) = $row.try_get::<i64, _>($index) {
            Value::from(v)
        } else if let Ok(v) = $row.try_get::<f64, _>($index) {
            Value::from(v)
        } else if let Ok(v) = $row.try_get::<bool, _>($index) {
            Value::from(v)
        } else {
            Value::Null
        }
    }};
}

fn is_null_at<R: Row>(row: &R, index: usize) -> bool
where
    usize: sqlx::ColumnIndex<R>,
{
    match row.try_get_raw(index) {
        Ok(raw) => raw.is_null(),
        Err(_) => true,
    }
}

/// Decode a SQLite row.
pub(crate) fn sqlite_row(row: &SqliteRow) -> CompatibleRow {
    let mut entries = Vec::with_capacity(row.len());
    for (index, column) in row.columns().iter().enumerate() {
        let name = column.name().to_string();
        if is_null_at(row, index) {
            entries.push((name, Value::Null));
            continue;
        }
        let value = match categorize_type(column.type_info().name(), Dialect::Sqlite) {
            TypeCategory::Integer => row
                .try_get::<i64, _>(index)
                .map(Value::from)
                .unwrap_or_else(|_| fallback_decode!(row, index)),
            TypeCategory::Float => row
                .try_get::<f64, _>(index)
                .map(Value::from)
                .unwrap_or_else(|_| fallback_decode!(row, index)),
            TypeCategory::Boolean => row
                .try_get::<bool, _>(index)
                .map(Value::from)
                .unwrap_or_else(|_| fallback_decode!(row, index)),
            TypeCategory::Binary => row
                .try_get::<Vec<u8>, _>(index)
                .map(|bytes| Value::from(BASE64.encode(bytes)))
                .unwrap_or(Value::Null),
            // SQLite has no native JSON or timestamp storage class; both
            // arrive as text (or integers for unix timestamps).
            TypeCategory::Json | TypeCategory::Timestamp | TypeCategory::Text => row
                .try_get::<String, _>(index)
                .map(Value::from)
                .unwrap_or_else(|_| fallback_decode!(row, index)),
            TypeCategory::Unknown => fallback_decode!(row, index),
        };
        entries.push((name, value));
    }
    CompatibleRow::new(entries)
}

/// Decode a PostgreSQL row.
pub(crate) fn postgres_row(row: &PgRow) -> CompatibleRow {
    let mut entries = Vec::with_capacity(row.len());
    for (index, column) in row.columns().iter().enumerate() {
        let name = column.name().to_string();
        if is_null_at(row, index) {
            entries.push((name, Value::Null));
            continue;
        }
        let type_name = column.type_info().name().to_string();
        let value = match categorize_type(&type_name, Dialect::Postgres) {
            TypeCategory::Integer => {
                if let Ok(v) = row.try_get::<i64, _>(index) {
                    Value::from(v)
                } else if let Ok(v) = row.try_get::<i32, _>(index) {
                    Value::from(v)
                } else if let Ok(v) = row.try_get::<i16, _>(index) {
                    Value::from(v)
                } else {
                    fallback_decode!(row, index)
                }
            }
            TypeCategory::Float => {
                if let Ok(v) = row.try_get::<f64, _>(index) {
                    Value::from(v)
                } else if let Ok(v) = row.try_get::<f32, _>(index) {
                    Value::from(f64::from(v))
                } else {
                    fallback_decode!(row, index)
                }
            }
            TypeCategory::Boolean => row
                .try_get::<bool, _>(index)
                .map(Value::from)
                .unwrap_or_else(|_| fallback_decode!(row, index)),
            TypeCategory::Json => row
                .try_get::<Value, _>(index)
                .unwrap_or_else(|_| fallback_decode!(row, index)),
            TypeCategory::Timestamp => {
                if type_name.eq_ignore_ascii_case("timestamptz") {
                    row.try_get::<chrono::DateTime<chrono::Utc>, _>(index)
                        .map(|ts| Value::from(ts.to_rfc3339()))
                        .unwrap_or_else(|_| fallback_decode!(row, index))
                } else {
                    row.try_get::<chrono::NaiveDateTime, _>(index)
                        .map(|ts| Value::from(ts.to_string()))
                        .unwrap_or_else(|_| fallback_decode!(row, index))
                }
            }
            TypeCategory::Binary => row
                .try_get::<Vec<u8>, _>(index)
                .map(|bytes| Value::from(BASE64.encode(bytes)))
                .unwrap_or(Value::Null),
            TypeCategory::Text => row
                .try_get::<String, _>(index)
                .map(Value::from)
                .unwrap_or_else(|_| fallback_decode!(row, index)),
            TypeCategory::Unknown => fallback_decode!(row, index),
        };
        entries.push((name, value));
    }
    CompatibleRow::new(entries)
}

/// Decode a MySQL row.
pub(crate) fn mysql_row(row: &MySqlRow) -> CompatibleRow {
    let mut entries = Vec::with_capacity(row.len());
    for (index, column) in row.columns().iter().enumerate() {
        let name = column.name().to_string();
        if is_null_at(row, index) {
            entries.push((name, Value::Null));
            continue;
        }
        let type_name = column.type_info().name().to_string();
        let value = match categorize_type(&type_name, Dialect::MySql) {
            TypeCategory::Integer => {
                if let Ok(v) = row.try_get::<i64, _>(index) {
                    Value::from(v)
                } else if let Ok(v) = row.try_get::<u64, _>(index) {
                    Value::from(v)
                } else {
                    fallback_decode!(row, index)
                }
            }
            TypeCategory::Float => row
                .try_get::<f64, _>(index)
                .map(Value::from)
                .unwrap_or_else(|_| fallback_decode!(row, index)),
            TypeCategory::Boolean => row
                .try_get::<bool, _>(index)
                .map(Value::from)
                .unwrap_or_else(|_| fallback_decode!(row, index)),
            TypeCategory::Json => row
                .try_get::<Value, _>(index)
                .unwrap_or_else(|_| fallback_decode!(row, index)),
            TypeCategory::Timestamp => {
                if type_name.eq_ignore_ascii_case("timestamp") {
                    row.try_get::<chrono::DateTime<chrono::Utc>, _>(index)
                        .map(|ts| Value::from(ts.to_rfc3339()))
                        .unwrap_or_else(|_| fallback_decode!(row, index))
                } else {
                    row.try_get::<chrono::NaiveDateTime, _>(index)
                        .map(|ts| Value::from(ts.to_string()))
                        .unwrap_or_else(|_| fallback_decode!(row, index))
                }
            }
            TypeCategory::Binary => row
                .try_get::<Vec<u8>, _>(index)
                .map(|bytes| Value::from(BASE64.encode(bytes)))
                .unwrap_or(Value::Null),
            TypeCategory::Text => row
                .try_get::<String, _>(index)
                .map(Value::from)
                .unwrap_or_else(|_| fallback_decode!(row, index)),
            TypeCategory::Unknown => fallback_decode!(row, index),
        };
        entries.push((name, value));
    }
    CompatibleRow::new(entries)
}
