//! Database abstraction layer.
//!
//! This module provides the storage functionality:
//! - Dialect detection from the strict URL allow-list
//! - Row / cursor / connection adapters with placeholder translation
//! - Schema file loading with block-aware statement splitting
//! - The multi-database manager over dialect-specific engines
//! - The low-level bounded connection pool with performance tracking

pub mod connection;
pub mod cursor;
pub mod dialect;
pub mod manager;
pub mod params;
pub mod pool;
pub mod row;
pub mod schema;
pub mod types;

pub use connection::{ConnectionWrapper, convert_params};
pub use cursor::Cursor;
pub use dialect::{Dialect, masked_url};
pub use manager::DatabaseManager;
pub use params::ParamValue;
pub use pool::{
    ConnectionPoolManager, ConnectionStats, HealthStatus, PerformanceIndicators, PerformanceStats,
    PoolStats, PooledConnection,
};
pub use row::CompatibleRow;
pub use schema::{load_schema_statements, schema_file_path, split_sql_statements};
pub use types::{TypeCategory, categorize_type};
