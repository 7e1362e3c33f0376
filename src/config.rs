//! Configuration for the storage layer.
//!
//! This module provides per-dialect engine configuration and the tuning
//! knobs for the low-level connection pool. Values a dialect does not use
//! are `None` rather than sentinels, and are omitted from the rendered
//! connect-args map entirely.

use crate::db::Dialect;
use serde_json::{Map, Value, json};
use std::time::Duration;

/// Application name reported to PostgreSQL servers.
pub const APPLICATION_NAME: &str = "shared_context_mcp";

// Pool configuration defaults (low-level SQLite pool)
pub const DEFAULT_POOL_MIN_SIZE: usize = 5;
pub const DEFAULT_POOL_MAX_SIZE: usize = 20;
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_CONNECTION_AGE: Duration = Duration::from_secs(3600);
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(30);

// Health thresholds
/// A single acquisition held longer than this counts as a slow query.
pub const SLOW_QUERY_THRESHOLD_MS: u64 = 50;
/// Average query latency above this classifies the pool as "slow".
pub const SLOW_AVG_QUERY_MS: f64 = 100.0;
/// Error rate above this classifies the pool as "degraded".
pub const DEGRADED_ERROR_RATE: f64 = 0.05;
/// Error rate above this classifies the pool as "unstable".
pub const UNSTABLE_ERROR_RATE: f64 = 0.10;

/// Engine configuration for one dialect.
///
/// Mirrors the pooling parameters handed to the underlying engine. Fields a
/// dialect does not define stay `None` - SQLite has no traditional pool, so
/// `pool_size`/`max_overflow` are absent rather than zeroed.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct EngineConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_overflow: Option<u32>,
    /// Connections older than this many seconds are recycled.
    pub pool_recycle_secs: u64,
    /// Validate connections on checkout.
    pub pool_pre_ping: bool,
    /// Driver-specific connection arguments.
    pub connect_args: Map<String, Value>,
}

impl EngineConfig {
    /// Build the engine configuration for a dialect.
    ///
    /// The table is an exhaustive match - adding a dialect without a config
    /// row is a compile error, not a runtime fallthrough.
    pub fn for_dialect(dialect: Dialect) -> Self {
        match dialect {
            Dialect::Sqlite => Self {
                pool_size: None,
                max_overflow: None,
                pool_recycle_secs: 3600,
                pool_pre_ping: true,
                connect_args: Map::new(),
            },
            Dialect::Postgres => Self {
                pool_size: Some(20),
                max_overflow: Some(30),
                pool_recycle_secs: 3600,
                pool_pre_ping: true,
                connect_args: {
                    let mut args = Map::new();
                    args.insert("prepared_statement_cache_size".into(), json!(500));
                    args.insert("server_settings".into(), json!({ "jit": "off" }));
                    args.insert("application_name".into(), json!(APPLICATION_NAME));
                    args
                },
            },
            Dialect::MySql => Self {
                pool_size: Some(10),
                max_overflow: Some(20),
                pool_recycle_secs: 3600,
                pool_pre_ping: true,
                connect_args: {
                    let mut args = Map::new();
                    args.insert("charset".into(), json!("utf8mb4"));
                    args.insert("autocommit".into(), json!(false));
                    args.insert(
                        "init_command".into(),
                        json!("SET sql_mode='STRICT_TRANS_TABLES'"),
                    );
                    args
                },
            },
        }
    }

    /// Total connection budget for the underlying pool.
    /// `None` when the dialect leaves sizing to the driver (SQLite).
    pub fn max_connections(&self) -> Option<u32> {
        self.pool_size
            .map(|size| size + self.max_overflow.unwrap_or(0))
    }
}

/// Settings for the low-level connection pool.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Connections opened eagerly at startup.
    pub min_size: usize,
    /// Hard upper bound on open connections.
    pub max_size: usize,
    /// How long an acquisition may wait before failing as exhausted.
    pub connection_timeout: Duration,
    /// Acquisitions held longer than this count as slow queries.
    pub slow_query_threshold: Duration,
    /// Idle connections older than this are recycled by cleanup.
    pub max_connection_age: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min_size: DEFAULT_POOL_MIN_SIZE,
            max_size: DEFAULT_POOL_MAX_SIZE,
            connection_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            slow_query_threshold: Duration::from_millis(SLOW_QUERY_THRESHOLD_MS),
            max_connection_age: DEFAULT_MAX_CONNECTION_AGE,
        }
    }
}

impl PoolSettings {
    /// Validate settings and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_size == 0 {
            return Err("max_size must be greater than 0".to_string());
        }
        if self.min_size > self.max_size {
            return Err(format!(
                "min_size ({}) cannot exceed max_size ({})",
                self.min_size, self.max_size
            ));
        }
        Ok(())
    }
}
