//! Parameter values and binding for database queries.
//!
//! Call sites supply positional values; these are carried through placeholder
//! conversion and bound to the backend-specific query object here.

use serde_json::Value as JsonValue;
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::PgArguments;
use sqlx::sqlite::SqliteArguments;
use sqlx::types::Json;
use sqlx::{MySql, Postgres, Sqlite};

/// A positional query parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Json(JsonValue),
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<JsonValue> for ParamValue {
    fn from(v: JsonValue) -> Self {
        Self::Json(v)
    }
}

impl<T> From<Option<T>> for ParamValue
where
    T: Into<ParamValue>,
{
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Bind a parameter to a SQLite query.
pub(crate) fn bind_sqlite<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    param: &ParamValue,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match param {
        ParamValue::Null => query.bind(None::<String>),
        ParamValue::Bool(v) => query.bind(*v),
        ParamValue::Int(v) => query.bind(*v),
        ParamValue::Float(v) => query.bind(*v),
        ParamValue::Text(v) => query.bind(v.clone()),
        // SQLite doesn't have a native JSON type, store as text
        ParamValue::Json(v) => query.bind(v.to_string()),
    }
}

/// Bind a parameter to a PostgreSQL query.
pub(crate) fn bind_postgres<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    param: &ParamValue,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match param {
        ParamValue::Null => query.bind(None::<String>),
        ParamValue::Bool(v) => query.bind(*v),
        ParamValue::Int(v) => query.bind(*v),
        ParamValue::Float(v) => query.bind(*v),
        ParamValue::Text(v) => query.bind(v.clone()),
        ParamValue::Json(v) => query.bind(Json(v.clone())),
    }
}

/// Bind a parameter to a MySQL query.
pub(crate) fn bind_mysql<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    param: &ParamValue,
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    match param {
        ParamValue::Null => query.bind(None::<String>),
        ParamValue::Bool(v) => query.bind(*v),
        ParamValue::Int(v) => query.bind(*v),
        ParamValue::Float(v) => query.bind(*v),
        ParamValue::Text(v) => query.bind(v.clone()),
        ParamValue::Json(v) => query.bind(Json(v.clone())),
    }
}
