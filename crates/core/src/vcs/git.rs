//! Git backend via `git2`.
//!
//! libgit2 is blocking, so every operation opens the repository on the
//! blocking pool through [`VcsTasks`] and works on that handle. Transfers
//! poll the operation's cancellation token from their progress callbacks.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use git2::{
    build::CheckoutBuilder, Cred, ErrorCode, FetchOptions, Oid, PushOptions, RemoteCallbacks,
    Repository, Signature,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::{CommitInfo, MergeOutcome, RemoteSpec, VcsBackend, VcsKind, VcsTasks};
use crate::credentials::Credentials;
use crate::errors::VcsError;
use crate::models::{Author, Revision};

const REMOTE: &str = "origin";

/// Git working copy bound to one remote branch.
pub struct GitBackend {
    path: PathBuf,
    remote: RemoteSpec,
    credentials: Credentials,
    tasks: VcsTasks,
}

impl GitBackend {
    pub fn new(path: impl Into<PathBuf>, remote: RemoteSpec, credentials: Credentials) -> Self {
        Self {
            path: path.into(),
            remote,
            credentials,
            tasks: VcsTasks::new(),
        }
    }

    /// Spawn blocking work through `tasks` instead of a private tracker.
    pub fn with_tasks(mut self, tasks: VcsTasks) -> Self {
        self.tasks = tasks;
        self
    }

    /// Run `f` against the opened repository on the blocking pool.
    async fn with_repo<T, F>(&self, f: F) -> Result<T, VcsError>
    where
        T: Send + 'static,
        F: FnOnce(&Repository) -> Result<T, VcsError> + Send + 'static,
    {
        self.with_repo_op(move |repo, _| f(repo)).await
    }

    /// Like [`with_repo`](Self::with_repo), for work that polls the
    /// cancellation token of the operation.
    async fn with_repo_op<T, F>(&self, f: F) -> Result<T, VcsError>
    where
        T: Send + 'static,
        F: FnOnce(&Repository, &CancellationToken) -> Result<T, VcsError> + Send + 'static,
    {
        let path = self.path.clone();
        self.tasks
            .run_blocking(move |op| {
                let repo = Repository::open(&path).map_err(|e| {
                    VcsError::State(format!("cannot open {}: {}", path.display(), e.message()))
                })?;
                f(&repo, op)
            })
            .await
    }

    fn branch_ref(&self) -> String {
        format!("refs/heads/{}", self.remote.branch)
    }

    fn tracking_ref(&self) -> String {
        format!("refs/remotes/{}/{}", REMOTE, self.remote.branch)
    }
}

#[async_trait]
impl VcsBackend for GitBackend {
    fn kind(&self) -> VcsKind {
        VcsKind::Git
    }

    fn path(&self) -> &Path {
        &self.path
    }

    #[instrument(skip_all, fields(url = %self.remote.url, path = %self.path.display()))]
    async fn clone_repo(&self) -> Result<(), VcsError> {
        info!("cloning git repository");
        let url = self.remote.url.clone();
        let branch = self.remote.branch.clone();
        let path = self.path.clone();
        let credentials = self.credentials.clone();
        self.tasks
            .run_blocking(move |op| {
                let mut fetch_opts = FetchOptions::new();
                fetch_opts.remote_callbacks(callbacks(&credentials, op));
                let mut builder = git2::build::RepoBuilder::new();
                builder.fetch_options(fetch_opts).branch(&branch);
                builder
                    .clone(&url, &path)
                    .map_err(|e| transfer_error(op, e))?;
                Ok(())
            })
            .await?;
        info!("clone completed");
        Ok(())
    }

    #[instrument(skip_all, fields(branch = %self.remote.branch))]
    async fn fetch(&self) -> Result<Revision, VcsError> {
        let credentials = self.credentials.clone();
        let refspec = format!("+{}:{}", self.branch_ref(), self.tracking_ref());
        let tracking = self.tracking_ref();
        let url = self.remote.url.clone();
        let rev = self
            .with_repo_op(move |repo, op| {
                let mut remote = match repo.find_remote(REMOTE) {
                    Ok(remote) => remote,
                    Err(_) => repo.remote(REMOTE, &url).map_err(local_error)?,
                };
                let mut fetch_opts = FetchOptions::new();
                fetch_opts.remote_callbacks(callbacks(&credentials, op));
                remote
                    .fetch(&[refspec.as_str()], Some(&mut fetch_opts), None)
                    .map_err(|e| transfer_error(op, e))?;
                let oid = repo
                    .refname_to_id(&tracking)
                    .map_err(|e| VcsError::State(format!("{tracking}: {}", e.message())))?;
                Ok(Revision::new(oid.to_string()))
            })
            .await?;
        debug!(revision = %rev.short(), "fetch completed");
        Ok(rev)
    }

    #[instrument(skip_all, fields(revision = %rev.short()))]
    async fn checkout(&self, rev: &Revision) -> Result<(), VcsError> {
        let rev = rev.clone();
        let branch_ref = self.branch_ref();
        self.with_repo(move |repo| {
            let oid = parse_oid(&rev)?;
            let target = repo.find_object(oid, None).map_err(local_error)?;
            if repo.find_reference(&branch_ref).is_err() {
                repo.reference(&branch_ref, oid, true, "lingosync: checkout")
                    .map_err(local_error)?;
            }
            repo.set_head(&branch_ref).map_err(local_error)?;
            // Hard reset against the old HEAD also drops files only a local,
            // unpushed commit knew about.
            repo.reset(
                &target,
                git2::ResetType::Hard,
                Some(CheckoutBuilder::new().force().remove_untracked(true)),
            )
            .map_err(local_error)?;
            Ok(())
        })
        .await
    }

    async fn current_revision(&self) -> Result<Revision, VcsError> {
        self.with_repo(|repo| {
            let commit = repo
                .head()
                .and_then(|h| h.peel_to_commit())
                .map_err(local_error)?;
            Ok(Revision::new(commit.id().to_string()))
        })
        .await
    }

    async fn list_changed_paths(
        &self,
        from: &Revision,
        to: &Revision,
    ) -> Result<Vec<String>, VcsError> {
        let (from, to) = (from.clone(), to.clone());
        self.with_repo(move |repo| {
            let old = repo
                .find_commit(parse_oid(&from)?)
                .and_then(|c| c.tree())
                .map_err(local_error)?;
            let new = repo
                .find_commit(parse_oid(&to)?)
                .and_then(|c| c.tree())
                .map_err(local_error)?;
            let diff = repo
                .diff_tree_to_tree(Some(&old), Some(&new), None)
                .map_err(local_error)?;
            let mut paths = Vec::new();
            for delta in diff.deltas() {
                for file in [delta.old_file(), delta.new_file()] {
                    if let Some(p) = file.path().and_then(|p| p.to_str()) {
                        if !paths.iter().any(|x: &String| x == p) {
                            paths.push(p.to_string());
                        }
                    }
                }
            }
            Ok(paths)
        })
        .await
    }

    async fn read_file(&self, rev: &Revision, path: &str) -> Result<Option<Vec<u8>>, VcsError> {
        let rev = rev.clone();
        let path = path.to_string();
        self.with_repo(move |repo| {
            let tree = repo
                .find_commit(parse_oid(&rev)?)
                .and_then(|c| c.tree())
                .map_err(local_error)?;
            let entry = match tree.get_path(Path::new(&path)) {
                Ok(entry) => entry,
                Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
                Err(e) => return Err(local_error(e)),
            };
            let blob = repo.find_blob(entry.id()).map_err(local_error)?;
            Ok(Some(blob.content().to_vec()))
        })
        .await
    }

    #[instrument(skip_all, fields(files = paths.len()))]
    async fn commit(
        &self,
        message: &str,
        author: &Author,
        paths: &[String],
    ) -> Result<Option<Revision>, VcsError> {
        let message = message.to_string();
        let author = author.clone();
        let paths = paths.to_vec();
        let workdir = self.path.clone();
        let rev = self
            .with_repo(move |repo| {
                let mut index = repo.index().map_err(local_error)?;
                for p in &paths {
                    if workdir.join(p).exists() {
                        index.add_path(Path::new(p)).map_err(local_error)?;
                    } else {
                        index.remove_path(Path::new(p)).map_err(local_error)?;
                    }
                }
                index.write().map_err(local_error)?;
                let tree_oid = index.write_tree().map_err(local_error)?;

                let parent = repo
                    .head()
                    .and_then(|h| h.peel_to_commit())
                    .map_err(local_error)?;
                if parent.tree_id() == tree_oid {
                    return Ok(None);
                }

                let tree = repo.find_tree(tree_oid).map_err(local_error)?;
                let signature = signature(&author)?;
                let oid = repo
                    .commit(Some("HEAD"), &signature, &signature, &message, &tree, &[&parent])
                    .map_err(local_error)?;
                Ok(Some(Revision::new(oid.to_string())))
            })
            .await?;
        match &rev {
            Some(rev) => info!(revision = %rev.short(), "created commit"),
            None => debug!("tree unchanged, no commit created"),
        }
        Ok(rev)
    }

    #[instrument(skip_all, fields(branch = %self.remote.branch))]
    async fn push(&self) -> Result<(), VcsError> {
        info!("pushing");
        let credentials = self.credentials.clone();
        let branch = self.remote.branch.clone();
        let push_url = self.remote.push_url.clone();
        let refspec = format!("{0}:{0}", self.branch_ref());
        self.with_repo_op(move |repo, op| {
            let mut remote = match &push_url {
                Some(url) => repo.remote_anonymous(url).map_err(local_error)?,
                None => repo.find_remote(REMOTE).map_err(local_error)?,
            };

            let rejection = Arc::new(Mutex::new(None::<String>));
            let rejection_slot = rejection.clone();
            let mut cbs = callbacks(&credentials, op);
            cbs.push_update_reference(move |refname, status| {
                if let Some(msg) = status {
                    warn!(refname, msg, "push rejected");
                    if let Ok(mut slot) = rejection_slot.lock() {
                        *slot = Some(msg.to_string());
                    }
                }
                Ok(())
            });
            let mut push_opts = PushOptions::new();
            push_opts.remote_callbacks(cbs);

            remote
                .push(&[refspec.as_str()], Some(&mut push_opts))
                .map_err(|e| {
                    if op.is_cancelled() {
                        VcsError::Aborted
                    } else if e.code() == ErrorCode::NotFastForward {
                        VcsError::PushRejected {
                            branch: branch.clone(),
                            detail: e.message().to_string(),
                        }
                    } else {
                        network_error(e)
                    }
                })?;

            let rejected = rejection.lock().ok().and_then(|mut slot| slot.take());
            if let Some(detail) = rejected {
                return Err(VcsError::PushRejected { branch, detail });
            }
            Ok(())
        })
        .await?;
        info!("push completed");
        Ok(())
    }

    #[instrument(skip_all, fields(revision = %rev.short()))]
    async fn merge(
        &self,
        rev: &Revision,
        message: &str,
        author: &Author,
    ) -> Result<MergeOutcome, VcsError> {
        let rev = rev.clone();
        let message = message.to_string();
        let author = author.clone();
        let branch_ref = self.branch_ref();
        self.with_repo(move |repo| {
            let ours = repo
                .head()
                .and_then(|h| h.peel_to_commit())
                .map_err(local_error)?;
            let theirs = repo.find_commit(parse_oid(&rev)?).map_err(local_error)?;

            if ours.id() == theirs.id()
                || repo
                    .graph_descendant_of(ours.id(), theirs.id())
                    .map_err(local_error)?
            {
                return Ok(MergeOutcome::Merged(Revision::new(ours.id().to_string())));
            }

            let mut checkout = CheckoutBuilder::new();
            checkout.force();

            if repo
                .graph_descendant_of(theirs.id(), ours.id())
                .map_err(local_error)?
            {
                repo.reference(&branch_ref, theirs.id(), true, "lingosync: fast-forward")
                    .map_err(local_error)?;
                repo.checkout_head(Some(&mut checkout)).map_err(local_error)?;
                return Ok(MergeOutcome::Merged(rev));
            }

            let mut index = repo
                .merge_commits(&ours, &theirs, None)
                .map_err(local_error)?;
            if index.has_conflicts() {
                let mut paths = Vec::new();
                for conflict in index.conflicts().map_err(local_error)? {
                    let conflict = conflict.map_err(local_error)?;
                    let entry = conflict.our.or(conflict.their).or(conflict.ancestor);
                    if let Some(entry) = entry {
                        paths.push(String::from_utf8_lossy(&entry.path).into_owned());
                    }
                }
                return Ok(MergeOutcome::Conflicted(paths));
            }

            let tree_oid = index.write_tree_to(repo).map_err(local_error)?;
            let tree = repo.find_tree(tree_oid).map_err(local_error)?;
            let signature = signature(&author)?;
            let oid = repo
                .commit(
                    Some("HEAD"),
                    &signature,
                    &signature,
                    &message,
                    &tree,
                    &[&ours, &theirs],
                )
                .map_err(local_error)?;
            repo.checkout_head(Some(&mut checkout)).map_err(local_error)?;
            Ok(MergeOutcome::Merged(Revision::new(oid.to_string())))
        })
        .await
    }

    async fn is_ancestor(
        &self,
        ancestor: &Revision,
        descendant: &Revision,
    ) -> Result<bool, VcsError> {
        if ancestor == descendant {
            return Ok(true);
        }
        let (ancestor, descendant) = (ancestor.clone(), descendant.clone());
        self.with_repo(move |repo| {
            // An unknown revision cannot be part of the fetched history.
            let Ok(a) = Oid::from_str(ancestor.as_str()) else {
                return Ok(false);
            };
            if repo.find_commit(a).is_err() {
                return Ok(false);
            }
            let d = parse_oid(&descendant)?;
            repo.graph_descendant_of(d, a).map_err(local_error)
        })
        .await
    }

    async fn log(&self, from: &Revision, to: &Revision) -> Result<Vec<CommitInfo>, VcsError> {
        let (from, to) = (from.clone(), to.clone());
        self.with_repo(move |repo| {
            let mut walk = repo.revwalk().map_err(local_error)?;
            walk.set_sorting(git2::Sort::TOPOLOGICAL | git2::Sort::TIME)
                .map_err(local_error)?;
            walk.push(parse_oid(&to)?).map_err(local_error)?;
            if let Ok(from) = parse_oid(&from) {
                if repo.find_commit(from).is_ok() {
                    walk.hide(from).map_err(local_error)?;
                }
            }
            let mut commits = Vec::new();
            for oid in walk {
                let oid = oid.map_err(local_error)?;
                let commit = repo.find_commit(oid).map_err(local_error)?;
                commits.push(CommitInfo {
                    revision: Revision::new(oid.to_string()),
                    author: commit.author().name().unwrap_or("").to_string(),
                    summary: commit.summary().unwrap_or("").to_string(),
                });
            }
            Ok(commits)
        })
        .await
    }

    async fn is_healthy(&self) -> bool {
        self.with_repo(|repo| {
            if repo.is_bare() {
                return Err(VcsError::State("working copy is bare".into()));
            }
            repo.head().and_then(|h| h.peel_to_commit()).map_err(local_error)?;
            Ok(())
        })
        .await
        .is_ok()
    }
}

/// Remote callbacks carrying credentials, when any are configured, that
/// stop the transfer once `op` is cancelled.
fn callbacks(credentials: &Credentials, op: &CancellationToken) -> RemoteCallbacks<'static> {
    let mut callbacks = RemoteCallbacks::new();
    let (transfer, sideband, negotiation) = (op.clone(), op.clone(), op.clone());
    callbacks.transfer_progress(move |_| !transfer.is_cancelled());
    callbacks.sideband_progress(move |_| !sideband.is_cancelled());
    callbacks.push_negotiation(move |_| {
        if negotiation.is_cancelled() {
            return Err(git2::Error::from_str("push aborted"));
        }
        Ok(())
    });
    if let Some(secret) = credentials.secret.clone() {
        let username = credentials.username_or("x-access-token");
        let mut attempts = 0u8;
        callbacks.credentials(move |_url, _username, _allowed| {
            // libgit2 keeps asking while the server rejects the credentials.
            attempts += 1;
            if attempts > 3 {
                return Err(git2::Error::from_str("authentication failed"));
            }
            Cred::userpass_plaintext(&username, &secret)
        });
    }
    callbacks
}

fn signature(author: &Author) -> Result<Signature<'static>, VcsError> {
    Signature::now(&author.name, &author.email)
        .map_err(|e| VcsError::State(format!("invalid signature '{author}': {}", e.message())))
}

fn parse_oid(rev: &Revision) -> Result<Oid, VcsError> {
    Oid::from_str(rev.as_str())
        .map_err(|e| VcsError::State(format!("invalid revision '{rev}': {}", e.message())))
}

/// Classify a failed network operation.
fn network_error(e: git2::Error) -> VcsError {
    let msg = e.message().to_string();
    let lower = msg.to_lowercase();
    if e.code() == ErrorCode::Auth
        || lower.contains("authentication")
        || lower.contains("401")
        || lower.contains("403")
    {
        VcsError::Auth(msg)
    } else {
        VcsError::Unavailable(msg)
    }
}

/// Classify a failed transfer, which fails on purpose once `op` is cancelled.
fn transfer_error(op: &CancellationToken, e: git2::Error) -> VcsError {
    if op.is_cancelled() {
        VcsError::Aborted
    } else {
        network_error(e)
    }
}

/// Classify a failed local operation.
fn local_error(e: git2::Error) -> VcsError {
    VcsError::State(e.message().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed_origin(dir: &Path) -> PathBuf {
        let origin = dir.join("origin.git");
        let mut opts = git2::RepositoryInitOptions::new();
        opts.bare(true).initial_head("main");
        Repository::init_opts(&origin, &opts).unwrap();

        let seed = dir.join("seed");
        let repo = Repository::clone(origin.to_str().unwrap(), &seed).unwrap();
        std::fs::write(seed.join("es.json"), "[]\n").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("es.json")).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = Signature::now("Dev", "dev@example.com").unwrap();
        repo.commit(Some("refs/heads/main"), &sig, &sig, "init", &tree, &[])
            .unwrap();
        let mut remote = repo.find_remote("origin").unwrap();
        remote
            .push(&["refs/heads/main:refs/heads/main"], None)
            .unwrap();
        origin
    }

    fn backend(dir: &Path, origin: &Path) -> GitBackend {
        GitBackend::new(
            dir.join("wc"),
            RemoteSpec {
                url: origin.to_str().unwrap().to_string(),
                push_url: None,
                branch: "main".into(),
            },
            Credentials::default(),
        )
    }

    #[tokio::test]
    async fn test_clone_commit_push_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let origin = seed_origin(dir.path());
        let git = backend(dir.path(), &origin);
        git.clone_repo().await.unwrap();
        assert!(git.is_healthy().await);

        let base = git.fetch().await.unwrap();
        assert_eq!(git.current_revision().await.unwrap(), base);

        let author = Author::new("Bot", "bot@example.com");
        let files = vec!["es.json".to_string()];
        assert_eq!(git.commit("noop", &author, &files).await.unwrap(), None);

        std::fs::write(git.path().join("es.json"), "[1]\n").unwrap();
        let rev = git.commit("update", &author, &files).await.unwrap().unwrap();
        git.push().await.unwrap();

        assert_eq!(git.fetch().await.unwrap(), rev);
        assert!(git.is_ancestor(&base, &rev).await.unwrap());
        assert!(!git.is_ancestor(&rev, &base).await.unwrap());
        assert_eq!(git.list_changed_paths(&base, &rev).await.unwrap(), files);
        assert_eq!(
            git.read_file(&base, "es.json").await.unwrap(),
            Some(b"[]\n".to_vec())
        );
        assert_eq!(git.read_file(&rev, "missing.json").await.unwrap(), None);
        let log = git.log(&base, &rev).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].summary, "update");
    }

    #[tokio::test]
    async fn test_push_race_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let origin = seed_origin(dir.path());
        let first = backend(dir.path(), &origin);
        let second = GitBackend::new(dir.path().join("wc2"), first.remote.clone(), Credentials::default());
        first.clone_repo().await.unwrap();
        second.clone_repo().await.unwrap();

        let author = Author::new("Bot", "bot@example.com");
        let files = vec!["es.json".to_string()];
        std::fs::write(first.path().join("es.json"), "[\"a\"]\n").unwrap();
        first.commit("a", &author, &files).await.unwrap();
        first.push().await.unwrap();

        std::fs::write(second.path().join("es.json"), "[\"b\"]\n").unwrap();
        second.commit("b", &author, &files).await.unwrap();
        let err = second.push().await.unwrap_err();
        assert!(matches!(err, VcsError::PushRejected { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_checkout_discards_local_commit() {
        let dir = tempfile::tempdir().unwrap();
        let origin = seed_origin(dir.path());
        let git = backend(dir.path(), &origin);
        git.clone_repo().await.unwrap();
        let remote = git.fetch().await.unwrap();

        std::fs::write(git.path().join("es.json"), "[2]\n").unwrap();
        let local = git
            .commit("local", &Author::new("Bot", "b@x"), &["es.json".to_string()])
            .await
            .unwrap()
            .unwrap();
        assert_ne!(local, remote);

        git.checkout(&remote).await.unwrap();
        assert_eq!(git.current_revision().await.unwrap(), remote);
        assert_eq!(std::fs::read(git.path().join("es.json")).unwrap(), b"[]\n");
    }

    #[tokio::test]
    async fn test_unopenable_working_copy_is_state_error() {
        let dir = tempfile::tempdir().unwrap();
        let git = GitBackend::new(
            dir.path().join("nothing"),
            RemoteSpec {
                url: "/nonexistent".into(),
                push_url: None,
                branch: "main".into(),
            },
            Credentials::default(),
        );
        assert!(!git.is_healthy().await);
        assert!(matches!(git.current_revision().await, Err(VcsError::State(_))));
    }

    /// Commit `content` as `name` from a second clone and push it.
    async fn push_from_elsewhere(dir: &Path, origin: &Path, name: &str, content: &str) -> Revision {
        let other = GitBackend::new(
            dir.join("elsewhere"),
            backend(dir, origin).remote.clone(),
            Credentials::default(),
        );
        if !other.is_healthy().await {
            other.clone_repo().await.unwrap();
        }
        let head = other.fetch().await.unwrap();
        other.checkout(&head).await.unwrap();
        std::fs::write(other.path().join(name), content).unwrap();
        let rev = other
            .commit("elsewhere", &Author::new("Dev", "dev@example.com"), &[name.to_string()])
            .await
            .unwrap()
            .unwrap();
        other.push().await.unwrap();
        rev
    }

    #[tokio::test]
    async fn test_merge_fast_forwards() {
        let dir = tempfile::tempdir().unwrap();
        let origin = seed_origin(dir.path());
        let git = backend(dir.path(), &origin);
        git.clone_repo().await.unwrap();
        let base = git.current_revision().await.unwrap();

        let remote = push_from_elsewhere(dir.path(), &origin, "es.json", "[\"r\"]\n").await;
        assert_eq!(git.fetch().await.unwrap(), remote);

        let author = Author::new("Bot", "bot@example.com");
        let outcome = git.merge(&remote, "merge", &author).await.unwrap();
        assert_eq!(outcome, MergeOutcome::Merged(remote.clone()));
        assert_eq!(git.current_revision().await.unwrap(), remote);
        assert_eq!(std::fs::read(git.path().join("es.json")).unwrap(), b"[\"r\"]\n");

        // Merging an ancestor changes nothing.
        let outcome = git.merge(&base, "merge", &author).await.unwrap();
        assert_eq!(outcome, MergeOutcome::Merged(remote));
    }

    #[tokio::test]
    async fn test_merge_combines_disjoint_changes() {
        let dir = tempfile::tempdir().unwrap();
        let origin = seed_origin(dir.path());
        let git = backend(dir.path(), &origin);
        git.clone_repo().await.unwrap();

        let author = Author::new("Bot", "bot@example.com");
        std::fs::write(git.path().join("de.json"), "[]\n").unwrap();
        let local = git
            .commit("add german", &author, &["de.json".to_string()])
            .await
            .unwrap()
            .unwrap();
        let remote = push_from_elsewhere(dir.path(), &origin, "es.json", "[\"r\"]\n").await;
        git.fetch().await.unwrap();

        let merged = match git.merge(&remote, "merge upstream", &author).await.unwrap() {
            MergeOutcome::Merged(rev) => rev,
            other => panic!("expected a merge commit, got {other:?}"),
        };
        assert_ne!(merged, local);
        assert_ne!(merged, remote);
        assert_eq!(git.current_revision().await.unwrap(), merged);
        assert!(git.is_ancestor(&local, &merged).await.unwrap());
        assert!(git.is_ancestor(&remote, &merged).await.unwrap());
        assert_eq!(std::fs::read(git.path().join("es.json")).unwrap(), b"[\"r\"]\n");
        assert!(git.path().join("de.json").exists());
    }

    #[tokio::test]
    async fn test_merge_reports_conflicted_paths() {
        let dir = tempfile::tempdir().unwrap();
        let origin = seed_origin(dir.path());
        let git = backend(dir.path(), &origin);
        git.clone_repo().await.unwrap();

        let author = Author::new("Bot", "bot@example.com");
        std::fs::write(git.path().join("es.json"), "[\"local\"]\n").unwrap();
        let local = git
            .commit("local", &author, &["es.json".to_string()])
            .await
            .unwrap()
            .unwrap();
        let remote = push_from_elsewhere(dir.path(), &origin, "es.json", "[\"remote\"]\n").await;
        git.fetch().await.unwrap();

        let outcome = git.merge(&remote, "merge upstream", &author).await.unwrap();
        assert_eq!(outcome, MergeOutcome::Conflicted(vec!["es.json".to_string()]));
        // No merge commit is created.
        assert_eq!(git.current_revision().await.unwrap(), local);
    }

    #[tokio::test]
    async fn test_settled_tasks_refuse_new_operations() {
        let dir = tempfile::tempdir().unwrap();
        let origin = seed_origin(dir.path());
        let tasks = VcsTasks::new();
        let git = backend(dir.path(), &origin).with_tasks(tasks.clone());
        git.clone_repo().await.unwrap();

        tasks.settle().await;
        assert!(matches!(git.fetch().await, Err(VcsError::Aborted)));
        assert!(!git.is_healthy().await);
    }

    #[test]
    fn test_error_classification() {
        let auth = git2::Error::new(ErrorCode::Auth, git2::ErrorClass::Http, "denied");
        assert!(matches!(network_error(auth), VcsError::Auth(_)));
        let net = git2::Error::new(ErrorCode::GenericError, git2::ErrorClass::Net, "reset");
        assert!(matches!(network_error(net), VcsError::Unavailable(_)));
    }
}
