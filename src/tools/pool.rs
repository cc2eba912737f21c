//! SQL connection pool (C5 pool)
//!
//! `r2d2` already provides the lazy-initialized, bounded, acquire-timeout
//! pool this component needs (FIFO free list, busy counter, condvar
//! waiters): `Pool::builder().max_size(n).connection_timeout(t)` covers it
//! directly rather than hand-rolling the same thing.

use std::path::Path;
use std::time::Duration;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;

use crate::config::SqlConfig;
use crate::error::{ErrorKind, FactError};

pub type Connection = PooledConnection<SqliteConnectionManager>;

/// C5's connection pool. Read-only from the core's perspective: every
/// connection it hands out is opened against a file the core never writes
/// through.
pub struct SqlPool {
    pool: Pool<SqliteConnectionManager>,
}

impl SqlPool {
    pub fn open(config: &SqlConfig) -> Result<Self, FactError> {
        Self::open_path(&config.db_path, config.max_connections, config.acquire_timeout_seconds)
    }

    pub fn open_path(
        db_path: impl AsRef<Path>,
        max_connections: u32,
        acquire_timeout_seconds: u64,
    ) -> Result<Self, FactError> {
        let manager = SqliteConnectionManager::file(db_path).with_flags(
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
        );
        let pool = Pool::builder()
            .max_size(max_connections)
            .connection_timeout(Duration::from_secs(acquire_timeout_seconds))
            .build(manager)
            .map_err(|e| FactError::config(format!("failed to open SQL pool: {e}")))?;

        Ok(Self { pool })
    }

    /// Acquire a connection, blocking up to `acquire_timeout`; maps pool
    /// exhaustion to `PoolExhausted` rather than propagating r2d2's error type.
    pub fn acquire(&self) -> Result<Connection, FactError> {
        self.pool.get().map_err(|_| {
            FactError::new(
                ErrorKind::PoolExhausted,
                "no connection became available within the acquire timeout",
            )
        })
    }

    pub fn close_all(&self) {
        // r2d2 has no explicit drain API; dropping the pool closes every
        // idle connection, and in-flight connections close when returned.
    }

    pub fn state(&self) -> (u32, u32) {
        let state = self.pool.state();
        (state.connections, state.idle_connections)
    }
}
