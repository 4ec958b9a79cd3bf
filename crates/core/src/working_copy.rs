//! Working copy management.
//!
//! Every repository owns exactly one checkout at `<root>/<repository id>`.
//! A checkout is only handed out against the repository's [`LockToken`], and
//! a checkout found in a doubtful state is discarded and cloned again rather
//! than repaired.
//!
//! Crash safety rests on a marker file `<root>/<repository id>.busy`,
//! written before the checkout is mutated and removed once the mutation is
//! complete. A marker found at acquisition means a cycle died half-way.
//!
//! VCS work outlives the future that started it, so the owner of the lock
//! calls [`WorkingCopyManager::settle`] before releasing it.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::config::RepositoryConfig;
use crate::credentials::Credentials;
use crate::errors::WorkingCopyError;
use crate::lock::LockToken;
use crate::vcs::{self, RemoteSpec, VcsBackend, VcsKind, VcsOpener, VcsTasks};

/// Maps repositories to their on-disk checkouts.
#[derive(Clone)]
pub struct WorkingCopyManager {
    root: PathBuf,
    opener: VcsOpener,
    /// Work spawned for the current lease of each repository.
    tasks: Arc<DashMap<String, VcsTasks>>,
}

impl fmt::Debug for WorkingCopyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkingCopyManager")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

/// Exclusive access to one checkout for the duration of a cycle.
pub struct WorkingCopy {
    repository_id: String,
    vcs: Arc<dyn VcsBackend>,
    marker: PathBuf,
    mutating: bool,
}

impl WorkingCopyManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_opener(root, vcs::default_opener())
    }

    /// Build backends with `opener` instead of [`vcs::open`].
    pub fn with_opener(root: impl Into<PathBuf>, opener: VcsOpener) -> Self {
        Self {
            root: root.into(),
            opener,
            tasks: Arc::new(DashMap::new()),
        }
    }

    /// Wait until no VCS work started for `repository_id` is running, and
    /// refuse new work on the checkout handed out last.
    pub async fn settle(&self, repository_id: &str) {
        let tasks = self.tasks.remove(repository_id).map(|(_, tasks)| tasks);
        if let Some(tasks) = tasks {
            tasks.settle().await;
        }
    }

    pub fn path_for(&self, repository_id: &str) -> PathBuf {
        self.root.join(repository_id)
    }

    fn marker_for(&self, repository_id: &str) -> PathBuf {
        self.root.join(format!("{repository_id}.busy"))
    }

    /// Hand out the checkout of `repo`, cloning it first when it is missing
    /// or cannot be trusted.
    pub async fn acquire(
        &self,
        token: &LockToken,
        repo: &RepositoryConfig,
        credentials: Credentials,
    ) -> Result<WorkingCopy, WorkingCopyError> {
        debug_assert_eq!(token.repository_id(), repo.id);
        std::fs::create_dir_all(&self.root).map_err(|e| io_error(&self.root, e))?;

        let path = self.path_for(&repo.id);
        let marker = self.marker_for(&repo.id);
        let remote = RemoteSpec {
            url: repo.url.clone(),
            push_url: repo.push_url.clone(),
            branch: repo.branch.clone(),
        };
        let tasks = VcsTasks::new();
        self.tasks.insert(repo.id.clone(), tasks.clone());
        let backend = (self.opener)(
            repo.vcs,
            path.clone(),
            remote.clone(),
            credentials.clone(),
            tasks.clone(),
        );

        if let Some(reason) = self.needs_reclone(repo.vcs, &path, &marker, backend.as_ref()).await {
            warn!(repository = %repo.id, %reason, "discarding working copy");
            self.reclone(repo, &path, remote, credentials, tasks).await?;
            remove_if_exists(&marker)?;
        }

        Ok(WorkingCopy {
            repository_id: repo.id.clone(),
            vcs: backend,
            marker,
            mutating: false,
        })
    }

    /// Why the checkout at `path` cannot be used, if it cannot.
    async fn needs_reclone(
        &self,
        kind: VcsKind,
        path: &Path,
        marker: &Path,
        backend: &dyn VcsBackend,
    ) -> Option<&'static str> {
        if !path.exists() {
            return Some("missing");
        }
        if marker.exists() {
            return Some("interrupted mutation");
        }
        if path.join(kind.stale_lock_file()).exists() {
            return Some("stale vcs lock");
        }
        if !backend.is_healthy().await {
            return Some("unopenable repository");
        }
        None
    }

    /// Clone into a temporary sibling and move it into place.
    async fn reclone(
        &self,
        repo: &RepositoryConfig,
        path: &Path,
        remote: RemoteSpec,
        credentials: Credentials,
        tasks: VcsTasks,
    ) -> Result<(), WorkingCopyError> {
        self.remove_leftover_clones(&repo.id)?;
        if path.exists() {
            std::fs::remove_dir_all(path).map_err(|e| io_error(path, e))?;
        }

        let staging = tempfile::Builder::new()
            .prefix(&format!(".{}-clone-", repo.id))
            .tempdir_in(&self.root)
            .map_err(|e| io_error(&self.root, e))?;
        let staged = staging.path().join("checkout");
        let backend = (self.opener)(repo.vcs, staged.clone(), remote, credentials, tasks);
        backend.clone_repo().await?;

        std::fs::rename(&staged, path).map_err(|e| io_error(path, e))?;
        info!(repository = %repo.id, path = %path.display(), "working copy cloned");
        Ok(())
    }

    /// Remove staging directories of clones that never finished.
    fn remove_leftover_clones(&self, repository_id: &str) -> Result<(), WorkingCopyError> {
        let prefix = format!(".{repository_id}-clone-");
        let entries = std::fs::read_dir(&self.root).map_err(|e| io_error(&self.root, e))?;
        for entry in entries.flatten() {
            if entry.file_name().to_string_lossy().starts_with(&prefix) {
                debug!(path = %entry.path().display(), "removing leftover clone");
                std::fs::remove_dir_all(entry.path()).map_err(|e| io_error(&entry.path(), e))?;
            }
        }
        Ok(())
    }
}

impl WorkingCopy {
    pub fn repository_id(&self) -> &str {
        &self.repository_id
    }

    pub fn vcs(&self) -> &dyn VcsBackend {
        self.vcs.as_ref()
    }

    pub fn path(&self) -> &Path {
        self.vcs.path()
    }

    /// Record that the checkout is about to change.
    pub fn begin_mutation(&mut self) -> Result<(), WorkingCopyError> {
        std::fs::write(&self.marker, self.repository_id.as_bytes())
            .map_err(|e| io_error(&self.marker, e))?;
        self.mutating = true;
        Ok(())
    }

    /// Record that the checkout is consistent again.
    pub fn end_mutation(&mut self) -> Result<(), WorkingCopyError> {
        remove_if_exists(&self.marker)?;
        self.mutating = false;
        Ok(())
    }

    /// Force a re-clone on the next acquisition.
    pub fn mark_for_reclone(&mut self) {
        if let Err(e) = std::fs::write(&self.marker, b"reclone") {
            warn!(error = %e, "failed to write re-clone marker");
        }
        // The marker must survive this lease.
        self.mutating = true;
    }

    /// Replace a file inside the checkout atomically.
    pub fn write_file(&self, relative: &str, bytes: &[u8]) -> Result<(), WorkingCopyError> {
        use std::io::Write;

        let target = self.path().join(relative);
        let dir = target
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.path().to_path_buf());
        std::fs::create_dir_all(&dir).map_err(|e| io_error(&dir, e))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| io_error(&dir, e))?;
        tmp.write_all(bytes).map_err(|e| io_error(&target, e))?;
        tmp.persist(&target).map_err(|e| io_error(&target, e.error))?;
        Ok(())
    }
}

impl Drop for WorkingCopy {
    fn drop(&mut self) {
        if self.mutating {
            warn!(
                repository = %self.repository_id,
                "working copy released mid-mutation, it will be re-cloned"
            );
        }
    }
}

fn remove_if_exists(path: &Path) -> Result<(), WorkingCopyError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_error(path, e)),
    }
}

fn io_error(path: &Path, source: std::io::Error) -> WorkingCopyError {
    WorkingCopyError::Io {
        path: path.display().to_string(),
        source,
    }
}
