//! Error types for the Lingosync core library.
//!
//! Each subsystem has its own error type derived with `thiserror`. The
//! engine-level [`SyncError`] is the only error callers of
//! [`MergeCoordinator`](crate::coordinator::MergeCoordinator) ever see, and
//! [`SyncError::kind`] sorts it into the four failure classes used for
//! retry decisions and status reporting. A top-level [`CoreError`] unifies
//! everything for callers that want a single error type.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Vcs(#[from] VcsError),

    #[error(transparent)]
    WorkingCopy(#[from] WorkingCopyError),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

// ---------------------------------------------------------------------------
// VCS adapter errors
// ---------------------------------------------------------------------------

/// Errors produced by a [`VcsBackend`](crate::vcs::VcsBackend).
///
/// Backends classify their native failures into these variants; nothing
/// backend-specific escapes the adapter.
#[derive(Debug, Error)]
pub enum VcsError {
    /// Network or server availability problem. Retryable.
    #[error("vcs unavailable: {0}")]
    Unavailable(String),

    /// Credentials were rejected. Fatal for the current cycle.
    #[error("vcs authentication failed: {0}")]
    Auth(String),

    /// The working copy is inconsistent and must be re-cloned.
    #[error("vcs working copy state error: {0}")]
    State(String),

    /// The remote refused the push because it moved since the last fetch.
    #[error("push rejected for branch '{branch}': {detail}")]
    PushRejected {
        branch: String,
        detail: String,
    },

    /// The backend executable is not installed.
    #[error("vcs binary not found: {0}")]
    BinaryNotFound(String),

    /// The caller gave up on the operation before it completed.
    #[error("vcs operation aborted")]
    Aborted,
}

impl VcsError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

// ---------------------------------------------------------------------------
// Working copy errors
// ---------------------------------------------------------------------------

/// Errors from the working copy manager.
#[derive(Debug, Error)]
pub enum WorkingCopyError {
    /// A VCS operation failed while preparing the working copy.
    #[error(transparent)]
    Vcs(#[from] VcsError),

    /// Filesystem error inside the data directory.
    #[error("working copy I/O error at '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Format errors
// ---------------------------------------------------------------------------

/// Errors from translation file parsers and serializers.
#[derive(Debug, Error)]
pub enum FormatError {
    /// No format is registered under the given name.
    #[error("unknown translation format '{0}'")]
    UnknownFormat(String),

    /// The file content could not be parsed.
    #[error("failed to parse '{path}': {detail}")]
    Parse {
        path: String,
        detail: String,
    },

    /// Units could not be serialized.
    #[error("failed to serialize '{path}': {detail}")]
    Serialize {
        path: String,
        detail: String,
    },
}

// ---------------------------------------------------------------------------
// Change extraction errors
// ---------------------------------------------------------------------------

/// Errors raised while extracting upstream changes.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Vcs(#[from] VcsError),

    #[error(transparent)]
    Format(#[from] FormatError),
}

// ---------------------------------------------------------------------------
// Engine errors
// ---------------------------------------------------------------------------

/// Failure classes exposed to callers above the engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network / VCS availability. Retried with backoff inside the engine.
    Transient,
    /// Busy lock or push race. Retried a bounded number of times.
    Contention,
    /// True content conflict. Always surfaced, never discarded.
    DataConflict,
    /// Needs operator intervention. Surfaced immediately.
    Fatal,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Contention => write!(f, "contention"),
            Self::DataConflict => write!(f, "data_conflict"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// Why a synchronization cycle failed.
#[derive(Debug, Error)]
pub enum SyncError {
    /// No repository with this id is configured.
    #[error("unknown repository '{0}'")]
    UnknownRepository(String),

    /// Fetch or another network operation kept failing.
    #[error("version control unavailable: {0}")]
    VcsUnavailable(String),

    /// Credentials were rejected by the remote.
    #[error("version control authentication failed: {0}")]
    VcsAuth(String),

    /// The working copy was inconsistent; it has been marked for re-clone.
    #[error("working copy is inconsistent: {0}")]
    VcsState(String),

    /// The remote history no longer contains the sync point.
    #[error("remote history diverged: sync point {sync_point} is not an ancestor of {remote}")]
    DivergedHistory {
        sync_point: String,
        remote: String,
    },

    /// Pushing kept losing races against other writers.
    #[error("push rejected after {attempts} attempt(s): {detail}")]
    PushConflict {
        attempts: u32,
        detail: String,
    },

    /// Units need manual review and the commit policy is all-or-nothing.
    #[error("{count} unit(s) need manual review")]
    MergeConflict {
        count: usize,
    },

    /// The cycle held the repository lock past its maximum hold duration.
    #[error("lock on repository '{0}' exceeded its maximum hold duration")]
    LockTimeout(String),

    /// The caller cancelled the cycle.
    #[error("synchronization cancelled")]
    Cancelled,

    /// A tracked file could not be parsed or serialized.
    #[error("translation file error: {0}")]
    Format(#[from] FormatError),

    /// Persistent storage failed.
    #[error("storage error: {0}")]
    Database(#[from] DatabaseError),

    /// Local filesystem failure inside the working copy.
    #[error("working copy I/O error: {0}")]
    Io(String),
}

impl SyncError {
    /// Classify this failure.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::VcsUnavailable(_) | Self::Cancelled | Self::LockTimeout(_) => {
                FailureKind::Transient
            }
            Self::PushConflict { .. } => FailureKind::Contention,
            Self::MergeConflict { .. } => FailureKind::DataConflict,
            Self::UnknownRepository(_)
            | Self::VcsAuth(_)
            | Self::VcsState(_)
            | Self::DivergedHistory { .. }
            | Self::Format(_)
            | Self::Database(_)
            | Self::Io(_) => FailureKind::Fatal,
        }
    }

    /// Short machine-readable name used in cycle history.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::UnknownRepository(_) => "unknown_repository",
            Self::VcsUnavailable(_) => "vcs_unavailable",
            Self::VcsAuth(_) => "vcs_auth",
            Self::VcsState(_) => "vcs_state",
            Self::DivergedHistory { .. } => "diverged_history",
            Self::PushConflict { .. } => "push_conflict",
            Self::MergeConflict { .. } => "merge_conflict",
            Self::LockTimeout(_) => "lock_timeout",
            Self::Cancelled => "cancelled",
            Self::Format(_) => "format",
            Self::Database(_) => "database",
            Self::Io(_) => "io",
        }
    }
}

// ---------------------------------------------------------------------------
// Conflict errors
// ---------------------------------------------------------------------------

/// Errors from conflict resolution.
#[derive(Debug, Error)]
pub enum ConflictError {
    /// The requested conflict ID was not found.
    #[error("conflict not found: {0}")]
    NotFound(String),

    /// Attempted to resolve a conflict that is already resolved.
    #[error("conflict {0} is already resolved")]
    AlreadyResolved(String),

    /// The provided resolution is invalid.
    #[error("invalid resolution for conflict {id}: {detail}")]
    InvalidResolution {
        id: String,
        detail: String,
    },

    /// Database error when persisting conflict data.
    #[error("conflict database error: {0}")]
    DatabaseError(#[from] DatabaseError),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue {
        field: String,
        detail: String,
    },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Database errors
// ---------------------------------------------------------------------------

/// Errors from the SQLite persistence layer.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Underlying rusqlite error.
    #[error("database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// A migration failed.
    #[error("database migration failed (version {version}): {detail}")]
    MigrationFailed {
        version: u32,
        detail: String,
    },

    /// A record was not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        entity: String,
        id: String,
    },

    /// A stored value could not be decoded.
    #[error("corrupt {entity} row: {detail}")]
    Corrupt {
        entity: String,
        detail: String,
    },

    /// Generic I/O error (e.g. file permissions).
    #[error("database I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
