//! VCS adapter: one capability surface over every supported backend.
//!
//! The merge coordinator only talks to [`VcsBackend`]. Each backend
//! classifies its native failures into [`VcsError`] and produces commits
//! with the identity and message it is given, so history looks the same
//! regardless of the backend.

pub mod git;
pub mod mercurial;
pub mod tasks;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::credentials::Credentials;
use crate::errors::VcsError;
use crate::models::{Author, Revision};

pub use self::git::GitBackend;
pub use self::mercurial::MercurialBackend;
pub use self::tasks::VcsTasks;

/// Supported backends. Selected per repository by configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VcsKind {
    #[default]
    Git,
    Mercurial,
}

impl VcsKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Git => "git",
            Self::Mercurial => "mercurial",
        }
    }

    /// Marker of a lock left behind by an interrupted VCS process.
    pub fn stale_lock_file(&self) -> &'static str {
        match self {
            Self::Git => ".git/index.lock",
            Self::Mercurial => ".hg/wlock",
        }
    }
}

impl std::fmt::Display for VcsKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remote endpoints of a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSpec {
    pub url: String,
    pub push_url: Option<String>,
    pub branch: String,
}

impl RemoteSpec {
    pub fn push_url(&self) -> &str {
        self.push_url.as_deref().unwrap_or(&self.url)
    }
}

/// Result of merging a revision into the working copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The merge completed and was committed.
    Merged(Revision),
    /// The merge stopped on conflicts in these paths.
    Conflicted(Vec<String>),
}

/// Summary of one commit, as listed by [`VcsBackend::log`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub revision: Revision,
    pub author: String,
    pub summary: String,
}

/// Capabilities every backend provides for a single working copy.
///
/// Network operations (`clone_repo`, `fetch`, `push`) may fail with
/// [`VcsError::Unavailable`]; local operations fail with
/// [`VcsError::State`] when the working copy is inconsistent.
#[async_trait]
pub trait VcsBackend: Send + Sync {
    fn kind(&self) -> VcsKind;

    /// Root of the working copy.
    fn path(&self) -> &Path;

    /// Create the working copy at [`path`](Self::path) from the remote.
    async fn clone_repo(&self) -> Result<(), VcsError>;

    /// Fetch the configured branch and return the remote head.
    async fn fetch(&self) -> Result<Revision, VcsError>;

    /// Point the local branch at `rev` and force the working tree to match.
    async fn checkout(&self, rev: &Revision) -> Result<(), VcsError>;

    /// Revision the working copy is at.
    async fn current_revision(&self) -> Result<Revision, VcsError>;

    /// Paths that differ between two revisions.
    async fn list_changed_paths(&self, from: &Revision, to: &Revision)
        -> Result<Vec<String>, VcsError>;

    /// Content of `path` at `rev`, `None` if it does not exist there.
    async fn read_file(&self, rev: &Revision, path: &str) -> Result<Option<Vec<u8>>, VcsError>;

    /// Commit `paths` on top of the current revision. Returns `None` when
    /// the resulting tree is identical to the parent.
    async fn commit(
        &self,
        message: &str,
        author: &Author,
        paths: &[String],
    ) -> Result<Option<Revision>, VcsError>;

    /// Push the current revision to the remote branch.
    async fn push(&self) -> Result<(), VcsError>;

    /// Merge `rev` into the current revision.
    async fn merge(&self, rev: &Revision, message: &str, author: &Author)
        -> Result<MergeOutcome, VcsError>;

    /// Whether `ancestor` is `descendant` or one of its ancestors.
    async fn is_ancestor(&self, ancestor: &Revision, descendant: &Revision)
        -> Result<bool, VcsError>;

    /// Commits reachable from `to` but not from `from`, newest first.
    async fn log(&self, from: &Revision, to: &Revision) -> Result<Vec<CommitInfo>, VcsError>;

    /// Whether the working copy exists and can be opened.
    async fn is_healthy(&self) -> bool;
}

/// Instantiate the backend for `kind`, bound to a working copy path.
///
/// Blocking work and child processes of the backend are spawned through
/// `tasks`.
pub fn open(
    kind: VcsKind,
    path: impl Into<PathBuf>,
    remote: RemoteSpec,
    credentials: Credentials,
    tasks: VcsTasks,
) -> Arc<dyn VcsBackend> {
    match kind {
        VcsKind::Git => Arc::new(GitBackend::new(path, remote, credentials).with_tasks(tasks)),
        VcsKind::Mercurial => {
            Arc::new(MercurialBackend::new(path, remote, credentials).with_tasks(tasks))
        }
    }
}

/// Builds the backend of a working copy; [`open`] unless replaced.
pub type VcsOpener =
    Arc<dyn Fn(VcsKind, PathBuf, RemoteSpec, Credentials, VcsTasks) -> Arc<dyn VcsBackend> + Send + Sync>;

/// The opener used when none is configured.
pub fn default_opener() -> VcsOpener {
    Arc::new(
        |kind: VcsKind, path: PathBuf, remote: RemoteSpec, credentials: Credentials, tasks: VcsTasks| {
            open(kind, path, remote, credentials, tasks)
        },
    )
}
