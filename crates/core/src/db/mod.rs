//! SQLite persistence layer for Lingosync.
//!
//! Provides a [`Database`] handle with WAL-mode journaling, automatic schema
//! migrations, and query helpers for every table used by the merge
//! coordinator. The database doubles as the [`PendingEditStore`] the
//! coordinator reads translator edits from.

pub mod queries;
pub mod schema;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::DatabaseError;
use crate::models::PendingEdit;

pub use queries::{AuditLogEntry, CycleCommit, SyncCycleEntry};

/// Main database handle wrapping a SQLite connection.
///
/// The connection is opened in WAL mode and wrapped in a `Mutex` so that
/// `Database` is `Send + Sync`, enabling use inside `Arc`.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path`.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening database");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;

        debug!("database opened successfully with WAL mode");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (useful for testing).
    pub fn in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run all schema migrations to bring the database up to date.
    pub fn initialize(&self) -> Result<(), DatabaseError> {
        info!("initializing database schema");
        let conn = self.conn();
        schema::run_migrations(&conn)?;
        debug!("database schema is up to date");
        Ok(())
    }

    /// Obtain a lock on the underlying connection.
    ///
    /// If the Mutex is poisoned (a previous holder panicked), the lock is
    /// recovered rather than propagating a panic.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("database mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Execute a closure inside a SQLite transaction. If the closure returns
    /// `Ok`, the transaction is committed; otherwise it is rolled back.
    pub fn transaction<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }
}

/// Storage of translator edits awaiting the next synchronization cycle.
pub trait PendingEditStore: Send + Sync {
    /// All edits of a repository, read in one consistent snapshot.
    fn snapshot(&self, repository_id: &str) -> Result<Vec<PendingEdit>, DatabaseError>;

    /// Store an edit, replacing any earlier edit of the same unit.
    fn add(&self, edit: &PendingEdit) -> Result<(), DatabaseError>;
}

impl PendingEditStore for Database {
    fn snapshot(&self, repository_id: &str) -> Result<Vec<PendingEdit>, DatabaseError> {
        self.list_pending_edits(repository_id)
    }

    fn add(&self, edit: &PendingEdit) -> Result<(), DatabaseError> {
        self.add_pending_edit(edit)
    }
}
