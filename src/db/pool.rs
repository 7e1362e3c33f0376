//! Low-level async connection pool for the SQLite backend.
//!
//! This pool owns raw driver connections directly: bounded size, eager
//! warm-up with per-connection PRAGMA tuning, timeout-based acquisition
//! with exhaustion accounting, stale-connection recycling, and health
//! classification for monitoring surfaces.
//!
//! # Concurrency Safety
//!
//! - Acquisition is gated by a semaphore sized to `max_size`; waiters time
//!   out rather than queue forever.
//! - Bookkeeping uses atomics and short `std::sync::Mutex` sections; no
//!   lock is held across an await point.
//! - A checked-out connection is owned by exactly one caller; the guard
//!   returns it (or discards it during shutdown) on every exit path,
//!   including panics.
//! - The monitoring task holds only a `Weak` reference and exits when the
//!   manager is dropped.

use crate::config::{
    DEGRADED_ERROR_RATE, PoolSettings, SLOW_AVG_QUERY_MS, UNSTABLE_ERROR_RATE,
};
use crate::db::dialect;
use crate::db::params::{ParamValue, bind_sqlite};
use crate::db::row::CompatibleRow;
use crate::db::types;
use crate::error::{StorageError, StorageResult};
use sqlx::Connection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Per-connection tuning applied at open time. Failures are logged and
/// counted, never fatal - a pool with default PRAGMAs still works.
const CONNECTION_PRAGMAS: &[&str] = &[
    "PRAGMA journal_mode=WAL",
    "PRAGMA foreign_keys=ON",
    "PRAGMA synchronous=NORMAL",
    "PRAGMA busy_timeout=5000",
    "PRAGMA cache_size=-8000",
    "PRAGMA mmap_size=134217728",
    "PRAGMA temp_store=MEMORY",
];

/// Pool health, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    NotInitialized,
    Unstable,
    Degraded,
    Slow,
    Healthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotInitialized => "not_initialized",
            Self::Unstable => "unstable",
            Self::Degraded => "degraded",
            Self::Slow => "slow",
            Self::Healthy => "healthy",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One live connection owned by the pool.
struct PoolSlot {
    conn: SqliteConnection,
    created_at: Instant,
    queries: u64,
}

/// Shared state installed by `initialize_pool`.
struct PoolCore {
    connect_options: SqliteConnectOptions,
    settings: PoolSettings,
    semaphore: Arc<Semaphore>,
    idle: Mutex<VecDeque<PoolSlot>>,
    /// Total live connections, idle plus checked out.
    pool_size: AtomicUsize,
}

#[derive(Debug, Default)]
struct PoolCounters {
    total_connections_created: AtomicU64,
    active_connections: AtomicUsize,
    peak_active_connections: AtomicUsize,
    total_queries: AtomicU64,
    slow_queries: AtomicU64,
    connection_errors: AtomicU64,
    pool_exhaustion_count: AtomicU64,
    total_query_time_us: AtomicU64,
}

/// Bounded async connection pool with performance tracking.
///
/// Constructed explicitly and shared by `Arc`; there is no ambient global
/// instance. Tests and callers hold their own manager and drive its
/// lifecycle through `initialize_pool` / `shutdown_pool`.
pub struct ConnectionPoolManager {
    core: Mutex<Option<Arc<PoolCore>>>,
    initialized: AtomicBool,
    shutting_down: AtomicBool,
    counters: PoolCounters,
    monitor: Mutex<Option<JoinHandle<()>>>,
    last_health: Mutex<HealthStatus>,
}

impl ConnectionPoolManager {
    pub fn new() -> Self {
        Self {
            core: Mutex::new(None),
            initialized: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            counters: PoolCounters::default(),
            monitor: Mutex::new(None),
            last_health: Mutex::new(HealthStatus::NotInitialized),
        }
    }

    /// Open the pool against a SQLite database URL.
    ///
    /// Idempotent: calling again while initialized keeps the existing
    /// settings and returns without error. The first call opens
    /// `settings.min_size` connections eagerly; individual PRAGMA failures
    /// are logged and counted, not fatal.
    ///
    /// Each pooled connection to `:memory:` opens a private database;
    /// callers needing shared state across connections should use a file.
    pub async fn initialize_pool(&self, url: &str, settings: PoolSettings) -> StorageResult<()> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(StorageError::ShuttingDown);
        }
        if self.core.lock().expect("pool lock").is_some() {
            debug!("pool already initialized, keeping existing settings");
            return Ok(());
        }
        settings.validate().map_err(StorageError::config)?;

        let path = dialect::sqlite_path(url)?;
        let connect_options = if path == ":memory:" {
            SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| StorageError::config(format!("invalid SQLite URL: {e}")))?
        } else {
            SqliteConnectOptions::new()
                .filename(&path)
                .create_if_missing(true)
        };

        let core = Arc::new(PoolCore {
            connect_options,
            settings: settings.clone(),
            semaphore: Arc::new(Semaphore::new(settings.max_size)),
            idle: Mutex::new(VecDeque::with_capacity(settings.max_size)),
            pool_size: AtomicUsize::new(0),
        });

        for _ in 0..settings.min_size {
            match self.open_connection(&core).await {
                Ok(slot) => core.idle.lock().expect("pool lock").push_back(slot),
                Err(e) => warn!(error = %e, "failed to open connection during warm-up"),
            }
        }

        {
            let mut guard = self.core.lock().expect("pool lock");
            if guard.is_some() {
                // Concurrent initializer won; our warm-up connections drop here.
                return Ok(());
            }
            *guard = Some(core);
        }
        self.initialized.store(true, Ordering::Release);
        *self.last_health.lock().expect("health lock") = HealthStatus::Healthy;
        info!(
            min_size = settings.min_size,
            max_size = settings.max_size,
            timeout_ms = settings.connection_timeout.as_millis() as u64,
            "connection pool initialized"
        );
        Ok(())
    }

    /// True once `initialize_pool` has succeeded and before shutdown.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// True once `shutdown_pool` has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Currently checked-out connections.
    pub fn active_connections(&self) -> usize {
        self.counters.active_connections.load(Ordering::Acquire)
    }

    /// Total live connections, idle plus checked out.
    pub fn pool_size(&self) -> usize {
        self.core
            .lock()
            .expect("pool lock")
            .as_ref()
            .map_or(0, |core| core.pool_size.load(Ordering::Acquire))
    }

    /// Acquire a connection for the scope of the returned guard.
    ///
    /// Takes an idle connection immediately when one is available, opens a
    /// new one while under `max_size`, and otherwise waits up to the
    /// configured timeout before failing as exhausted. The guard returns
    /// the connection on drop, on every exit path.
    pub async fn get_connection(
        self: &Arc<Self>,
        operation_name: &str,
    ) -> StorageResult<PooledConnection> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(StorageError::ShuttingDown);
        }
        let core = self
            .core
            .lock()
            .expect("pool lock")
            .clone()
            .ok_or(StorageError::NotInitialized)?;

        let timeout = core.settings.connection_timeout;
        let permit =
            match tokio::time::timeout(timeout, Arc::clone(&core.semaphore).acquire_owned()).await
            {
                Ok(Ok(permit)) => permit,
                // Semaphore closed by shutdown while we waited
                Ok(Err(_)) => return Err(StorageError::ShuttingDown),
                Err(_) => {
                    self.counters
                        .pool_exhaustion_count
                        .fetch_add(1, Ordering::Relaxed);
                    warn!(
                        operation = operation_name,
                        waited_ms = timeout.as_millis() as u64,
                        "connection pool exhausted"
                    );
                    return Err(StorageError::PoolExhausted {
                        waited_ms: timeout.as_millis() as u64,
                    });
                }
            };

        if self.shutting_down.load(Ordering::Acquire) {
            return Err(StorageError::ShuttingDown);
        }

        let idle_slot = core.idle.lock().expect("pool lock").pop_front();
        let slot = match idle_slot {
            Some(slot) => slot,
            // Permit drops on error, releasing the capacity we reserved
            None => self.open_connection(&core).await?,
        };

        let active = self.counters.active_connections.fetch_add(1, Ordering::AcqRel) + 1;
        self.counters
            .peak_active_connections
            .fetch_max(active, Ordering::AcqRel);
        debug!(operation = operation_name, active, "connection acquired");

        Ok(PooledConnection {
            manager: Arc::clone(self),
            core,
            slot: Some(slot),
            _permit: permit,
            acquired_at: Instant::now(),
            operation: operation_name.to_string(),
        })
    }

    /// Run a read query and return all rows.
    pub async fn execute_query(
        self: &Arc<Self>,
        sql: &str,
        params: &[ParamValue],
        operation_name: &str,
    ) -> StorageResult<Vec<CompatibleRow>> {
        let mut guard = self.get_connection(operation_name).await?;
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_sqlite(query, param);
        }
        let rows = query
            .fetch_all(guard.connection())
            .await
            .map_err(StorageError::query_failed)?;
        Ok(rows.iter().map(types::sqlite_row).collect())
    }

    /// Run a write statement and return the inserted row id, when any.
    pub async fn execute_write(
        self: &Arc<Self>,
        sql: &str,
        params: &[ParamValue],
        operation_name: &str,
    ) -> StorageResult<Option<i64>> {
        let mut guard = self.get_connection(operation_name).await?;
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_sqlite(query, param);
        }
        let result = query
            .execute(guard.connection())
            .await
            .map_err(StorageError::query_failed)?;
        let id = result.last_insert_rowid();
        Ok((id != 0).then_some(id))
    }

    /// Run one statement for each parameter set inside a single
    /// transaction. Rolls back (best effort) on any failure and returns
    /// the total rows affected on success.
    pub async fn execute_many(
        self: &Arc<Self>,
        sql: &str,
        params_list: &[Vec<ParamValue>],
        operation_name: &str,
    ) -> StorageResult<u64> {
        let mut guard = self.get_connection(operation_name).await?;
        let conn = guard.connection();

        sqlx::query("BEGIN")
            .execute(&mut *conn)
            .await
            .map_err(StorageError::query_failed)?;

        let mut affected = 0u64;
        for params in params_list {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_sqlite(query, param);
            }
            match query.execute(&mut *conn).await {
                Ok(result) => affected += result.rows_affected(),
                Err(e) => {
                    rollback_quietly(&mut *conn).await;
                    return Err(StorageError::query_failed(e));
                }
            }
        }

        if let Err(e) = sqlx::query("COMMIT").execute(&mut *conn).await {
            rollback_quietly(&mut *conn).await;
            return Err(StorageError::query_failed(e));
        }
        Ok(affected)
    }

    /// Discard idle connections older than the configured max age and open
    /// replacements up to `min_size`. Tolerates an empty or uninitialized
    /// pool. Returns the number discarded.
    pub async fn cleanup_connections(&self) -> StorageResult<usize> {
        let Some(core) = self.core.lock().expect("pool lock").clone() else {
            return Ok(0);
        };
        let max_age = core.settings.max_connection_age;

        let stale: Vec<PoolSlot> = {
            let mut idle = core.idle.lock().expect("pool lock");
            let mut keep = VecDeque::with_capacity(idle.len());
            let mut stale = Vec::new();
            while let Some(slot) = idle.pop_front() {
                if slot.created_at.elapsed() > max_age {
                    stale.push(slot);
                } else {
                    keep.push_back(slot);
                }
            }
            *idle = keep;
            stale
        };

        let removed = stale.len();
        for slot in stale {
            core.pool_size.fetch_sub(1, Ordering::AcqRel);
            debug!(
                age_secs = slot.created_at.elapsed().as_secs(),
                queries = slot.queries,
                "discarding stale connection"
            );
            if let Err(e) = slot.conn.close().await {
                warn!(error = %e, "failed to close stale connection");
            }
        }

        let mut replaced = 0usize;
        while core.pool_size.load(Ordering::Acquire) < core.settings.min_size {
            match self.open_connection(&core).await {
                Ok(slot) => {
                    core.idle.lock().expect("pool lock").push_back(slot);
                    replaced += 1;
                }
                Err(e) => {
                    warn!(error = %e, "failed to replace stale connection");
                    break;
                }
            }
        }

        if removed > 0 {
            info!(removed, replaced, "recycled stale connections");
        }
        Ok(removed)
    }

    /// Current pool health, most severe condition first.
    pub fn health_status(&self) -> HealthStatus {
        if !self.initialized.load(Ordering::Acquire) {
            return HealthStatus::NotInitialized;
        }
        let c = &self.counters;
        let total_queries = c.total_queries.load(Ordering::Relaxed).max(1);
        let error_rate = c.connection_errors.load(Ordering::Relaxed) as f64 / total_queries as f64;
        let avg_query_ms =
            c.total_query_time_us.load(Ordering::Relaxed) as f64 / 1000.0 / total_queries as f64;

        if error_rate > UNSTABLE_ERROR_RATE {
            HealthStatus::Unstable
        } else if c.pool_exhaustion_count.load(Ordering::Relaxed) > 0
            || error_rate > DEGRADED_ERROR_RATE
        {
            HealthStatus::Degraded
        } else if avg_query_ms > SLOW_AVG_QUERY_MS {
            HealthStatus::Slow
        } else {
            HealthStatus::Healthy
        }
    }

    /// Snapshot connection, pool, and derived performance statistics.
    pub fn get_performance_stats(&self) -> PerformanceStats {
        let c = &self.counters;
        let total_queries = c.total_queries.load(Ordering::Relaxed);
        let avg_query_time_ms = if total_queries > 0 {
            c.total_query_time_us.load(Ordering::Relaxed) as f64 / 1000.0 / total_queries as f64
        } else {
            0.0
        };
        let slow_query_ratio = if total_queries > 0 {
            c.slow_queries.load(Ordering::Relaxed) as f64 / total_queries as f64
        } else {
            0.0
        };
        let error_rate = c.connection_errors.load(Ordering::Relaxed) as f64
            / total_queries.max(1) as f64;

        let active = c.active_connections.load(Ordering::Acquire);
        let (pool_size, idle, min_size, max_size) =
            match self.core.lock().expect("pool lock").as_ref() {
                Some(core) => (
                    core.pool_size.load(Ordering::Acquire),
                    core.idle.lock().expect("pool lock").len(),
                    core.settings.min_size,
                    core.settings.max_size,
                ),
                None => (0, 0, 0, 0),
            };
        let utilization = if max_size > 0 {
            active as f64 / max_size as f64
        } else {
            0.0
        };

        PerformanceStats {
            success: true,
            timestamp: chrono::Utc::now(),
            connection_stats: ConnectionStats {
                total_connections_created: c.total_connections_created.load(Ordering::Relaxed),
                active_connections: active,
                peak_active_connections: c.peak_active_connections.load(Ordering::Relaxed),
                total_queries,
                slow_queries: c.slow_queries.load(Ordering::Relaxed),
                connection_errors: c.connection_errors.load(Ordering::Relaxed),
                pool_exhaustion_count: c.pool_exhaustion_count.load(Ordering::Relaxed),
            },
            pool_stats: PoolStats {
                pool_size,
                idle_connections: idle,
                min_size,
                max_size,
                utilization,
            },
            performance: PerformanceIndicators {
                avg_query_time_ms,
                slow_query_ratio,
                error_rate,
                pool_utilization: utilization,
            },
            health_status: self.health_status(),
        }
    }

    /// Start the background monitoring task.
    ///
    /// The task snapshots stats, logs health transitions, and triggers
    /// stale-connection cleanup every `interval`. It skips silently while
    /// the pool is uninitialized, survives iteration failures, and exits
    /// when the manager is dropped or shut down. Calling again while a
    /// task is running is a no-op.
    pub fn start_monitoring(self: &Arc<Self>, interval: Duration) {
        let mut guard = self.monitor.lock().expect("monitor lock");
        if guard.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let weak = Arc::downgrade(self);
        *guard = Some(tokio::spawn(async move {
            Self::monitor_task(weak, interval).await;
        }));
    }

    async fn monitor_task(weak: Weak<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick fires immediately; skip it so the initial interval applies
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(manager) = weak.upgrade() else {
                debug!("pool manager dropped, monitor exiting");
                return;
            };
            if manager.shutting_down.load(Ordering::Acquire) {
                return;
            }
            if !manager.initialized.load(Ordering::Acquire) {
                continue;
            }
            if let Err(e) = manager.monitor_iteration().await {
                warn!(error = %e, "monitoring iteration failed");
            }
        }
    }

    async fn monitor_iteration(&self) -> StorageResult<()> {
        let stats = self.get_performance_stats();
        let health = stats.health_status;
        let previous = {
            let mut last = self.last_health.lock().expect("health lock");
            std::mem::replace(&mut *last, health)
        };
        if previous != health {
            info!(
                from = %previous,
                to = %health,
                active = stats.connection_stats.active_connections,
                exhaustions = stats.connection_stats.pool_exhaustion_count,
                "pool health transition"
            );
        }
        debug!(
            active = stats.connection_stats.active_connections,
            pool_size = stats.pool_stats.pool_size,
            utilization = stats.pool_stats.utilization,
            avg_query_time_ms = stats.performance.avg_query_time_ms,
            "pool stats snapshot"
        );
        self.cleanup_connections().await?;
        Ok(())
    }

    /// Drain and close the pool. Always completes: individual close
    /// failures are logged, never raised.
    pub async fn shutdown_pool(&self) {
        self.shutting_down.store(true, Ordering::Release);
        if let Some(handle) = self.monitor.lock().expect("monitor lock").take() {
            handle.abort();
        }

        let core = self.core.lock().expect("pool lock").take();
        if let Some(core) = core {
            // Wake waiters; they fail with a shutting-down error
            core.semaphore.close();
            let slots: Vec<PoolSlot> = core
                .idle
                .lock()
                .expect("pool lock")
                .drain(..)
                .collect();
            for slot in slots {
                if let Err(e) = slot.conn.close().await {
                    warn!(error = %e, "failed to close connection during shutdown");
                }
            }
            core.pool_size.store(0, Ordering::Release);
        }
        self.initialized.store(false, Ordering::Release);
        *self.last_health.lock().expect("health lock") = HealthStatus::NotInitialized;
        info!("connection pool shut down");
    }

    async fn open_connection(&self, core: &Arc<PoolCore>) -> StorageResult<PoolSlot> {
        let mut conn = SqliteConnection::connect_with(&core.connect_options)
            .await
            .map_err(|e| {
                self.counters.connection_errors.fetch_add(1, Ordering::Relaxed);
                StorageError::connection(e)
            })?;

        for &pragma in CONNECTION_PRAGMAS {
            if let Err(e) = sqlx::query(pragma).execute(&mut conn).await {
                self.counters.connection_errors.fetch_add(1, Ordering::Relaxed);
                warn!(pragma, error = %e, "connection optimization failed");
            }
        }

        self.counters
            .total_connections_created
            .fetch_add(1, Ordering::Relaxed);
        core.pool_size.fetch_add(1, Ordering::AcqRel);
        debug!(
            pool_size = core.pool_size.load(Ordering::Acquire),
            "opened pooled connection"
        );
        Ok(PoolSlot {
            conn,
            created_at: Instant::now(),
            queries: 0,
        })
    }
}

impl Default for ConnectionPoolManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConnectionPoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPoolManager")
            .field("initialized", &self.is_initialized())
            .field("shutting_down", &self.is_shutting_down())
            .field("active_connections", &self.active_connections())
            .finish_non_exhaustive()
    }
}

async fn rollback_quietly(conn: &mut SqliteConnection) {
    if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
        warn!(error = %e, "rollback failed");
    }
}

/// Decrement that saturates at 0. Shutdown zeroes `pool_size` while
/// connections may still be checked out; their late release must not wrap
/// the counter.
fn saturating_decrement(counter: &AtomicUsize) {
    let _ = counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
        Some(v.saturating_sub(1))
    });
}

/// Scoped pool acquisition.
///
/// Holds one connection plus its semaphore permit. Dropping the guard
/// records timing, returns the connection to the idle pool (or discards it
/// during shutdown), and releases the permit - on every exit path.
pub struct PooledConnection {
    manager: Arc<ConnectionPoolManager>,
    core: Arc<PoolCore>,
    slot: Option<PoolSlot>,
    _permit: OwnedSemaphorePermit,
    acquired_at: Instant,
    operation: String,
}

impl PooledConnection {
    /// The underlying driver connection.
    pub fn connection(&mut self) -> &mut SqliteConnection {
        &mut self
            .slot
            .as_mut()
            .expect("connection slot present until drop")
            .conn
    }

    /// Drop the connection instead of returning it to the pool, e.g. after
    /// a driver-level failure that leaves it unusable. Pool accounting is
    /// decremented so the slot is not leaked.
    pub fn discard(&mut self) {
        if self.slot.take().is_some() {
            saturating_decrement(&self.core.pool_size);
            warn!(operation = %self.operation, "pooled connection discarded");
        }
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("operation", &self.operation)
            .field("acquired_at", &self.acquired_at)
            .finish_non_exhaustive()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let elapsed = self.acquired_at.elapsed();
        let counters = &self.manager.counters;
        counters.active_connections.fetch_sub(1, Ordering::AcqRel);
        counters.total_queries.fetch_add(1, Ordering::Relaxed);
        counters
            .total_query_time_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        if elapsed > self.core.settings.slow_query_threshold {
            counters.slow_queries.fetch_add(1, Ordering::Relaxed);
            warn!(
                operation = %self.operation,
                elapsed_ms = elapsed.as_millis() as u64,
                "slow database operation"
            );
        }

        let Some(mut slot) = self.slot.take() else {
            // Discarded earlier; accounting already adjusted
            return;
        };
        slot.queries += 1;

        if self.manager.shutting_down.load(Ordering::Acquire) {
            // Discard quietly; shutdown drains whatever remains idle
            saturating_decrement(&self.core.pool_size);
            return;
        }
        match self.core.idle.lock() {
            Ok(mut idle) => idle.push_back(slot),
            Err(_) => {
                // Return failed; count the connection as lost rather than
                // leaving pool accounting inconsistent
                saturating_decrement(&self.core.pool_size);
                warn!(operation = %self.operation, "failed to return connection to pool");
            }
        }
    }
}

/// Connection-level counters.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ConnectionStats {
    pub total_connections_created: u64,
    pub active_connections: usize,
    pub peak_active_connections: usize,
    pub total_queries: u64,
    pub slow_queries: u64,
    pub connection_errors: u64,
    pub pool_exhaustion_count: u64,
}

/// Pool sizing and occupancy.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolStats {
    pub pool_size: usize,
    pub idle_connections: usize,
    pub min_size: usize,
    pub max_size: usize,
    /// active / max_size
    pub utilization: f64,
}

/// Derived performance indicators.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PerformanceIndicators {
    pub avg_query_time_ms: f64,
    pub slow_query_ratio: f64,
    pub error_rate: f64,
    pub pool_utilization: f64,
}

/// Full statistics snapshot for monitoring surfaces.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PerformanceStats {
    pub success: bool,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub connection_stats: ConnectionStats,
    pub pool_stats: PoolStats,
    pub performance: PerformanceIndicators,
    pub health_status: HealthStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_settings(min: usize, max: usize, timeout_ms: u64) -> PoolSettings {
        PoolSettings {
            min_size: min,
            max_size: max,
            connection_timeout: Duration::from_millis(timeout_ms),
            ..PoolSettings::default()
        }
    }

    fn temp_db_url(dir: &tempfile::TempDir, name: &str) -> String {
        format!("sqlite+aiosqlite:///{}", dir.path().join(name).display())
    }

    #[tokio::test]
    async fn test_uninitialized_pool_rejects_acquisition() {
        let manager = Arc::new(ConnectionPoolManager::new());
        let err = manager.get_connection("test").await.unwrap_err();
        assert!(matches!(err, StorageError::NotInitialized));
        assert_eq!(manager.health_status(), HealthStatus::NotInitialized);
    }

    #[tokio::test]
    async fn test_initialize_warm_up_and_idempotency() {
        let dir = tempfile::tempdir().unwrap();
        let url = temp_db_url(&dir, "pool.db");
        let manager = Arc::new(ConnectionPoolManager::new());

        manager
            .initialize_pool(&url, test_settings(2, 4, 100))
            .await
            .unwrap();
        assert!(manager.is_initialized());
        assert_eq!(manager.pool_size(), 2);

        // Second call keeps the existing settings untouched
        manager
            .initialize_pool(&url, test_settings(1, 1, 5))
            .await
            .unwrap();
        let stats = manager.get_performance_stats();
        assert_eq!(stats.pool_stats.min_size, 2);
        assert_eq!(stats.pool_stats.max_size, 4);

        manager.shutdown_pool().await;
    }

    #[tokio::test]
    async fn test_exhaustion_and_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let url = temp_db_url(&dir, "exhaust.db");
        let manager = Arc::new(ConnectionPoolManager::new());
        manager
            .initialize_pool(&url, test_settings(1, 2, 50))
            .await
            .unwrap();

        let first = manager.get_connection("hold-1").await.unwrap();
        let second = manager.get_connection("hold-2").await.unwrap();

        let started = Instant::now();
        let err = manager.get_connection("overflow").await.unwrap_err();
        assert!(err.to_string().contains("exhausted"));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(
            manager
                .get_performance_stats()
                .connection_stats
                .pool_exhaustion_count,
            1
        );

        // Releasing one held connection lets the next acquisition succeed
        drop(first);
        let third = manager.get_connection("retry").await.unwrap();
        drop(third);
        drop(second);
        manager.shutdown_pool().await;
    }

    #[tokio::test]
    async fn test_active_count_returns_to_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let url = temp_db_url(&dir, "accounting.db");
        let manager = Arc::new(ConnectionPoolManager::new());
        manager
            .initialize_pool(&url, test_settings(1, 4, 200))
            .await
            .unwrap();

        let baseline = manager.active_connections();
        let mut handles = Vec::new();
        for i in 0..8 {
            let manager = Arc::clone(&manager);
            handles.push(tokio::spawn(async move {
                let mut guard = manager
                    .get_connection(&format!("task-{i}"))
                    .await
                    .unwrap();
                sqlx::query("SELECT 1")
                    .execute(guard.connection())
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(manager.active_connections(), baseline);
        assert!(
            manager
                .get_performance_stats()
                .connection_stats
                .peak_active_connections
                >= 1
        );
        manager.shutdown_pool().await;
    }

    #[tokio::test]
    async fn test_accounting_survives_failed_operations() {
        let dir = tempfile::tempdir().unwrap();
        let url = temp_db_url(&dir, "failures.db");
        let manager = Arc::new(ConnectionPoolManager::new());
        manager
            .initialize_pool(&url, test_settings(1, 2, 100))
            .await
            .unwrap();

        let baseline = manager.active_connections();
        for _ in 0..3 {
            let err = manager
                .execute_query("SELECT * FROM nonexistent", &[], "bad-query")
                .await
                .unwrap_err();
            assert!(err.to_string().starts_with("Database query failed:"));
        }
        assert_eq!(manager.active_connections(), baseline);
        manager.shutdown_pool().await;
    }

    #[tokio::test]
    async fn test_convenience_operations() {
        let dir = tempfile::tempdir().unwrap();
        let url = temp_db_url(&dir, "ops.db");
        let manager = Arc::new(ConnectionPoolManager::new());
        manager
            .initialize_pool(&url, test_settings(1, 3, 200))
            .await
            .unwrap();

        manager
            .execute_write(
                "CREATE TABLE agent_memory (id INTEGER PRIMARY KEY, agent_id TEXT, key TEXT, value TEXT)",
                &[],
                "create-table",
            )
            .await
            .unwrap();

        let id = manager
            .execute_write(
                "INSERT INTO agent_memory (agent_id, key, value) VALUES (?, ?, ?)",
                &[
                    ParamValue::from("agent-1"),
                    ParamValue::from("theme"),
                    ParamValue::from("dark"),
                ],
                "set-memory",
            )
            .await
            .unwrap();
        assert_eq!(id, Some(1));

        let affected = manager
            .execute_many(
                "INSERT INTO agent_memory (agent_id, key, value) VALUES (?, ?, ?)",
                &[
                    vec![
                        ParamValue::from("agent-1"),
                        ParamValue::from("lang"),
                        ParamValue::from("en"),
                    ],
                    vec![
                        ParamValue::from("agent-2"),
                        ParamValue::from("theme"),
                        ParamValue::from("light"),
                    ],
                ],
                "bulk-memory",
            )
            .await
            .unwrap();
        assert_eq!(affected, 2);

        let rows = manager
            .execute_query(
                "SELECT agent_id, value FROM agent_memory WHERE key = ?",
                &[ParamValue::from("theme")],
                "get-memory",
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["agent_id"], serde_json::json!("agent-1"));

        manager.shutdown_pool().await;
    }

    #[tokio::test]
    async fn test_execute_many_rolls_back_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let url = temp_db_url(&dir, "rollback.db");
        let manager = Arc::new(ConnectionPoolManager::new());
        manager
            .initialize_pool(&url, test_settings(1, 2, 200))
            .await
            .unwrap();

        manager
            .execute_write(
                "CREATE TABLE entries (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
                &[],
                "create-table",
            )
            .await
            .unwrap();

        let err = manager
            .execute_many(
                "INSERT INTO entries (name) VALUES (?)",
                &[
                    vec![ParamValue::from("ok")],
                    vec![ParamValue::Null], // violates NOT NULL
                ],
                "bulk-insert",
            )
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("Database query failed:"));

        // The first insert must have been rolled back with the batch
        let rows = manager
            .execute_query("SELECT id FROM entries", &[], "verify")
            .await
            .unwrap();
        assert!(rows.is_empty());

        manager.shutdown_pool().await;
    }

    #[tokio::test]
    async fn test_health_degraded_after_exhaustion() {
        let dir = tempfile::tempdir().unwrap();
        let url = temp_db_url(&dir, "health.db");
        let manager = Arc::new(ConnectionPoolManager::new());
        manager
            .initialize_pool(&url, test_settings(1, 1, 20))
            .await
            .unwrap();

        let held = manager.get_connection("hold").await.unwrap();
        let _ = manager.get_connection("overflow").await.unwrap_err();
        drop(held);

        assert_eq!(manager.health_status(), HealthStatus::Degraded);
        let stats = manager.get_performance_stats();
        assert!(stats.success);
        assert_eq!(stats.health_status, HealthStatus::Degraded);
        manager.shutdown_pool().await;
    }

    #[tokio::test]
    async fn test_shutdown_completes_and_rejects_new_work() {
        let dir = tempfile::tempdir().unwrap();
        let url = temp_db_url(&dir, "shutdown.db");
        let manager = Arc::new(ConnectionPoolManager::new());
        manager
            .initialize_pool(&url, test_settings(2, 4, 100))
            .await
            .unwrap();

        manager.shutdown_pool().await;
        assert!(!manager.is_initialized());
        assert!(manager.is_shutting_down());
        assert_eq!(manager.pool_size(), 0);

        let err = manager.get_connection("late").await.unwrap_err();
        assert!(err.to_string().contains("shutting down"));
    }

    #[tokio::test]
    async fn test_connection_released_during_shutdown_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let url = temp_db_url(&dir, "late-release.db");
        let manager = Arc::new(ConnectionPoolManager::new());
        manager
            .initialize_pool(&url, test_settings(1, 2, 100))
            .await
            .unwrap();

        let held = manager.get_connection("held-across-shutdown").await.unwrap();
        manager.shutdown_pool().await;
        drop(held);

        assert_eq!(manager.active_connections(), 0);
        assert_eq!(manager.pool_size(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_tolerates_empty_pool() {
        let manager = Arc::new(ConnectionPoolManager::new());
        assert_eq!(manager.cleanup_connections().await.unwrap(), 0);

        let dir = tempfile::tempdir().unwrap();
        let url = temp_db_url(&dir, "cleanup.db");
        manager
            .initialize_pool(&url, test_settings(1, 2, 100))
            .await
            .unwrap();
        // Nothing is stale yet
        assert_eq!(manager.cleanup_connections().await.unwrap(), 0);
        manager.shutdown_pool().await;
    }

    #[tokio::test]
    async fn test_cleanup_replaces_stale_connections() {
        let dir = tempfile::tempdir().unwrap();
        let url = temp_db_url(&dir, "stale.db");
        let manager = Arc::new(ConnectionPoolManager::new());
        let settings = PoolSettings {
            min_size: 2,
            max_size: 4,
            connection_timeout: Duration::from_millis(100),
            max_connection_age: Duration::from_millis(0),
            ..PoolSettings::default()
        };
        manager.initialize_pool(&url, settings).await.unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        let removed = manager.cleanup_connections().await.unwrap();
        assert_eq!(removed, 2);
        // Replacements keep the pool at min_size
        assert_eq!(manager.pool_size(), 2);
        manager.shutdown_pool().await;
    }

    #[tokio::test]
    async fn test_monitoring_survives_uninitialized_pool() {
        let manager = Arc::new(ConnectionPoolManager::new());
        manager.start_monitoring(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(40)).await;
        // Task is still alive and the pool untouched
        assert!(!manager.is_initialized());
        assert!(
            manager
                .monitor
                .lock()
                .unwrap()
                .as_ref()
                .is_some_and(|handle| !handle.is_finished())
        );
        manager.shutdown_pool().await;
    }

    #[tokio::test]
    async fn test_start_monitoring_is_idempotent() {
        let manager = Arc::new(ConnectionPoolManager::new());
        manager.start_monitoring(Duration::from_millis(50));
        manager.start_monitoring(Duration::from_millis(50));
        manager.shutdown_pool().await;
    }

    #[test]
    fn test_health_status_serialization() {
        assert_eq!(HealthStatus::NotInitialized.as_str(), "not_initialized");
        assert_eq!(
            serde_json::to_value(HealthStatus::Degraded).unwrap(),
            serde_json::json!("degraded")
        );
    }
}
