//! Database connection management.
//!
//! Wraps a single rusqlite Connection in a Mutex for thread-safe access.
//! Configures WAL mode and recommended PRAGMAs on initialization.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::info;

use notable_core::error::NotableError;

use crate::migrations;

/// Thread-safe SQLite database wrapper.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a database at the given path.
    ///
    /// Configures WAL mode, synchronous=NORMAL, and runs all pending
    /// migrations.
    pub fn new(path: &Path) -> Result<Self, NotableError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| NotableError::Storage(format!("Failed to open database: {}", e)))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -16384;",
        )
        .map_err(|e| NotableError::Storage(format!("Failed to set pragmas: {}", e)))?;

        info!("Database opened at {}", path.display());
        Self::init(conn)
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, NotableError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| NotableError::Storage(format!("Failed to open in-memory db: {}", e)))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, NotableError> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Execute a closure with a reference to the underlying connection.
    ///
    /// The mutex is held for the duration of the closure, which makes every
    /// closure atomic with respect to other callers.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, NotableError>
    where
        F: FnOnce(&Connection) -> Result<T, NotableError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| NotableError::Storage(format!("Database lock poisoned: {}", e)))?;
        f(&conn)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}
