//! Lingosync core library.
//!
//! This crate provides the foundational components for keeping the
//! translation files of version-controlled repositories in sync with the
//! edits translators make in a localization platform: configuration,
//! database persistence, VCS adapters, working copy management, change
//! extraction, the conflict resolution policy and the merge coordinator
//! that drives a synchronization cycle.

pub mod commit_format;
pub mod config;
pub mod coordinator;
pub mod credentials;
pub mod db;
pub mod errors;
pub mod extractor;
pub mod format;
pub mod lock;
pub mod models;
pub mod policy;
pub mod stats;
pub mod vcs;
pub mod working_copy;

// Re-exports for convenience.
pub use config::AppConfig;
pub use coordinator::MergeCoordinator;
pub use db::Database;
pub use errors::{CoreError, SyncError};
pub use format::FormatRegistry;
pub use models::{SyncOutcome, SyncTrigger};
