//! Connection adapter and query translation.
//!
//! Call sites write SQL once, in SQLite flavor: `?` placeholders, no
//! dialect-specific keywords, and the `agent_memory.key` column referenced
//! by its logical name. This module performs all dialect adaptation:
//!
//! 1. `?` placeholders become named `:paramN` parameters (1-indexed),
//!    then render to the driver's native syntax (`$N` for PostgreSQL,
//!    `?` for SQLite/MySQL).
//! 2. On MySQL, where `key` is a reserved word, references to the
//!    `agent_memory` `key` column are rewritten to `key_name`.
//!
//! The rewrite is a narrowly-scoped text transform gated on dialect and
//! table, not a SQL parser.

use crate::db::cursor::Cursor;
use crate::db::dialect::Dialect;
use crate::db::params::{ParamValue, bind_mysql, bind_postgres, bind_sqlite};
use crate::db::row::CompatibleRow;
use crate::db::types;
use crate::error::{StorageError, StorageResult};
use futures_util::TryStreamExt;
use regex::Regex;
use sqlx::pool::PoolConnection;
use sqlx::{Either, Executor, MySql, Postgres, Sqlite};
use std::borrow::Cow;
use std::sync::LazyLock;
use tracing::warn;

static AGENT_MEMORY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bagent_memory\b").expect("static regex"));
static QUALIFIED_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(agent_memory)\s*\.\s*key\b").expect("static regex"));
static KEY_BEFORE_EQ: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bkey(\s*=)").expect("static regex"));
static KEY_IN_LIST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bkey(\s*[,)])").expect("static regex"));
static NAMED_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":param(\d+)\b").expect("static regex"));

/// Rewrite `key` column references to `key_name` for MySQL.
///
/// Applies only when the statement targets `agent_memory`; `key` columns of
/// other tables and all other dialects pass through untouched.
pub(crate) fn rewrite_reserved_columns(dialect: Dialect, query: &str) -> Cow<'_, str> {
    if dialect != Dialect::MySql || !AGENT_MEMORY.is_match(query) {
        return Cow::Borrowed(query);
    }
    let rewritten = QUALIFIED_KEY.replace_all(query, "${1}.key_name");
    let rewritten = KEY_BEFORE_EQ.replace_all(&rewritten, "key_name$1");
    let rewritten = KEY_IN_LIST.replace_all(&rewritten, "key_name$1");
    Cow::Owned(rewritten.into_owned())
}

/// Convert a `?`-placeholder query to named-parameter form.
///
/// Every `?` becomes `:paramN`, numbered left to right from 1. The value
/// list is truncated to `min(placeholders, values)` - excess supplied
/// values are silently ignored. A query with no parameters passes through
/// unchanged with an empty map.
pub fn convert_params(
    dialect: Dialect,
    query: &str,
    params: &[ParamValue],
) -> (String, Vec<(String, ParamValue)>) {
    let query = rewrite_reserved_columns(dialect, query);

    let mut converted = String::with_capacity(query.len());
    let mut placeholder_count = 0usize;
    for ch in query.chars() {
        if ch == '?' {
            placeholder_count += 1;
            converted.push_str(":param");
            converted.push_str(&placeholder_count.to_string());
        } else {
            converted.push(ch);
        }
    }

    let bound = placeholder_count.min(params.len());
    let values = params[..bound]
        .iter()
        .enumerate()
        .map(|(i, v)| (format!("param{}", i + 1), v.clone()))
        .collect();

    (converted, values)
}

/// Render a named-parameter query into the driver's placeholder syntax.
pub(crate) fn render_for_driver(named_query: &str, dialect: Dialect) -> String {
    match dialect {
        Dialect::Postgres => NAMED_PARAM.replace_all(named_query, "$$$1").into_owned(),
        Dialect::Sqlite | Dialect::MySql => NAMED_PARAM.replace_all(named_query, "?").into_owned(),
    }
}

/// One checked-out backend connection.
pub(crate) enum BackendConnection {
    Sqlite(PoolConnection<Sqlite>),
    Postgres(PoolConnection<Postgres>),
    MySql(PoolConnection<MySql>),
}

/// Drain a `fetch_many` stream into rows plus write metadata.
macro_rules! drain_stream {
    ($stream:expr, $decode:expr, $lastrowid_of:expr) => {{
        let mut rows: Vec<CompatibleRow> = Vec::new();
        let mut affected = 0u64;
        let mut lastrowid: Option<i64> = None;
        let mut stream = $stream;
        while let Some(item) = stream.try_next().await? {
            match item {
                Either::Left(done) => {
                    affected = done.rows_affected();
                    lastrowid = $lastrowid_of(&done);
                }
                Either::Right(row) => rows.push($decode(&row)),
            }
        }
        drop(stream);
        (rows, affected, lastrowid)
    }};
}

/// Wrapper around one backend connection that performs dialect translation.
///
/// Dropping the wrapper returns the connection to its owning pool.
pub struct ConnectionWrapper {
    conn: BackendConnection,
    dialect: Dialect,
}

impl ConnectionWrapper {
    pub(crate) fn new(conn: BackendConnection, dialect: Dialect) -> Self {
        Self { conn, dialect }
    }

    /// The dialect this connection speaks.
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Convert a query and positional parameters into named-parameter form.
    pub fn convert_params(
        &self,
        query: &str,
        params: &[ParamValue],
    ) -> (String, Vec<(String, ParamValue)>) {
        convert_params(self.dialect, query, params)
    }

    /// Execute one statement and return its result cursor.
    ///
    /// Any driver-level failure is wrapped as a query failure with the
    /// driver's message preserved; the driver error type never escapes.
    pub async fn execute(&mut self, query: &str, params: &[ParamValue]) -> StorageResult<Cursor> {
        let (named, values) = self.convert_params(query, params);
        let sql = render_for_driver(&named, self.dialect);
        self.dispatch(&sql, &values)
            .await
            .map_err(StorageError::query_failed)
    }

    /// Execute a multi-statement script.
    ///
    /// Statements are split on `;` with blank fragments skipped, and run
    /// sequentially. Scripts with `;` inside procedure or trigger bodies
    /// must go through the schema loader instead, which splits
    /// block-aware.
    pub async fn executescript(&mut self, script: &str) -> StorageResult<()> {
        for statement in script.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            self.dispatch(statement, &[])
                .await
                .map_err(StorageError::script_failed)?;
        }
        Ok(())
    }

    /// Execute one raw statement, bypassing placeholder conversion and
    /// reserved-word rewriting. Schema DDL goes through here - it carries
    /// no placeholders, and rewriting must not touch constraint keywords.
    pub(crate) async fn execute_ddl(&mut self, sql: &str) -> StorageResult<()> {
        self.dispatch(sql, &[])
            .await
            .map(|_| ())
            .map_err(StorageError::script_failed)
    }

    /// No-op: statements commit per-statement on the wrapped engine.
    pub async fn commit(&mut self) -> StorageResult<()> {
        Ok(())
    }

    /// Best-effort rollback. Failure is logged, never propagated.
    pub async fn rollback(&mut self) {
        if let Err(e) = self.dispatch("ROLLBACK", &[]).await {
            warn!(error = %e, "rollback failed");
        }
    }

    /// No-op: the connection returns to its pool when the wrapper drops.
    pub fn close(self) {}

    async fn dispatch(
        &mut self,
        sql: &str,
        values: &[(String, ParamValue)],
    ) -> Result<Cursor, sqlx::Error> {
        let (rows, affected, lastrowid) = match &mut self.conn {
            BackendConnection::Sqlite(conn) => {
                if values.is_empty() {
                    drain_stream!(
                        (&mut **conn).fetch_many(sql),
                        types::sqlite_row,
                        |done: &sqlx::sqlite::SqliteQueryResult| nonzero(done.last_insert_rowid())
                    )
                } else {
                    let mut query = sqlx::query(sql);
                    for (_, value) in values {
                        query = bind_sqlite(query, value);
                    }
                    drain_stream!(
                        (&mut **conn).fetch_many(query),
                        types::sqlite_row,
                        |done: &sqlx::sqlite::SqliteQueryResult| nonzero(done.last_insert_rowid())
                    )
                }
            }
            BackendConnection::Postgres(conn) => {
                if values.is_empty() {
                    drain_stream!(
                        (&mut **conn).fetch_many(sql),
                        types::postgres_row,
                        |_: &sqlx::postgres::PgQueryResult| None
                    )
                } else {
                    let mut query = sqlx::query(sql);
                    for (_, value) in values {
                        query = bind_postgres(query, value);
                    }
                    drain_stream!(
                        (&mut **conn).fetch_many(query),
                        types::postgres_row,
                        |_: &sqlx::postgres::PgQueryResult| None
                    )
                }
            }
            BackendConnection::MySql(conn) => {
                if values.is_empty() {
                    drain_stream!(
                        (&mut **conn).fetch_many(sql),
                        types::mysql_row,
                        |done: &sqlx::mysql::MySqlQueryResult| nonzero(done.last_insert_id() as i64)
                    )
                } else {
                    let mut query = sqlx::query(sql);
                    for (_, value) in values {
                        query = bind_mysql(query, value);
                    }
                    drain_stream!(
                        (&mut **conn).fetch_many(query),
                        types::mysql_row,
                        |done: &sqlx::mysql::MySqlQueryResult| nonzero(done.last_insert_id() as i64)
                    )
                }
            }
        };

        let rowcount = if rows.is_empty() {
            affected
        } else {
            rows.len() as u64
        };
        Ok(Cursor::new(rows, rowcount, lastrowid))
    }
}

/// Drivers report 0 when no row was inserted on this connection.
fn nonzero(id: i64) -> Option<i64> {
    (id != 0).then_some(id)
}
