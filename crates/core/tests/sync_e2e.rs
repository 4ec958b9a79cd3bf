//! End-to-end tests for the merge coordinator.
//!
//! These tests exercise the real `MergeCoordinator` with:
//! - A local bare Git "origin" created with `git2`
//! - A seed clone that plays the upstream developer
//! - A real SQLite database in a temporary data directory
//! - Optionally, a wrapper backend that races pushes, counts fetches or
//!   stalls, to drive the retry and timeout paths
//!
//! No network I/O: every remote is a local path.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use lingosync_core::config::{AppConfig, CommitPolicy};
use lingosync_core::credentials::{ConfigCredentials, Credentials};
use lingosync_core::db::Database;
use lingosync_core::errors::{ConflictError, FailureKind, SyncError, VcsError};
use lingosync_core::format::{FormatRegistry, JsonFormat, TranslationFormat};
use lingosync_core::models::{
    Author, ConflictStatus, PendingEdit, Resolution, ResolutionChoice, Revision, StringUnit,
    SyncOutcome, SyncReport, SyncTrigger, UnitState,
};
use lingosync_core::vcs::{
    self, CommitInfo, MergeOutcome, RemoteSpec, VcsBackend, VcsKind, VcsTasks,
};
use lingosync_core::MergeCoordinator;

// ===========================================================================
// Helpers
// ===========================================================================

const FILE: &str = "es.json";

fn units_json(units: &[StringUnit]) -> Vec<u8> {
    JsonFormat.serialize(FILE, units).unwrap()
}

fn initial_units() -> Vec<StringUnit> {
    vec![
        StringUnit::new("greeting", "Hello", "", UnitState::Empty),
        StringUnit::new("farewell", "Goodbye", "Adios", UnitState::Translated),
    ]
}

/// Create a bare origin whose `main` holds the initial translation file.
fn create_origin(dir: &Path) -> PathBuf {
    let origin = dir.join("origin.git");
    let mut opts = git2::RepositoryInitOptions::new();
    opts.bare(true).initial_head("main");
    let bare = git2::Repository::init_opts(&origin, &opts).expect("failed to init origin");

    let sig = git2::Signature::now("Upstream Dev", "dev@example.com").unwrap();
    let blob = bare.blob(&units_json(&initial_units())).unwrap();
    let mut tree = bare.treebuilder(None).unwrap();
    tree.insert(FILE, blob, 0o100644).unwrap();
    let tree = bare.find_tree(tree.write().unwrap()).unwrap();
    bare.commit(Some("refs/heads/main"), &sig, &sig, "add spanish", &tree, &[])
        .expect("failed to create initial commit");
    origin
}

/// Clone of the origin used to make upstream commits.
struct Upstream {
    repo: git2::Repository,
    dir: PathBuf,
}

impl Upstream {
    fn clone(origin: &Path, dir: &Path) -> Self {
        let repo = git2::Repository::clone(origin.to_str().unwrap(), dir)
            .expect("failed to clone origin");
        Self {
            repo,
            dir: dir.to_path_buf(),
        }
    }

    /// Fast-forward to whatever the origin holds now.
    fn refresh(&self) {
        let mut remote = self.repo.find_remote("origin").unwrap();
        remote
            .fetch(&["+refs/heads/main:refs/remotes/origin/main"], None, None)
            .unwrap();
        let oid = self.repo.refname_to_id("refs/remotes/origin/main").unwrap();
        let target = self.repo.find_object(oid, None).unwrap();
        self.repo
            .reset(&target, git2::ResetType::Hard, None)
            .unwrap();
    }

    fn commit_units(&self, units: &[StringUnit], message: &str) -> Revision {
        self.refresh();
        std::fs::write(self.dir.join(FILE), units_json(units)).unwrap();
        let mut index = self.repo.index().unwrap();
        index.add_path(Path::new(FILE)).unwrap();
        index.write().unwrap();
        let tree = self.repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = git2::Signature::now("Upstream Dev", "dev@example.com").unwrap();
        let parent = self.repo.head().unwrap().peel_to_commit().unwrap();
        let oid = self
            .repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])
            .unwrap();
        let mut remote = self.repo.find_remote("origin").unwrap();
        remote
            .push(&["refs/heads/main:refs/heads/main"], None)
            .expect("upstream push failed");
        Revision::new(oid.to_string())
    }

    fn units(&self) -> Vec<StringUnit> {
        self.refresh();
        JsonFormat
            .parse(FILE, &std::fs::read(self.dir.join(FILE)).unwrap())
            .unwrap()
    }
}

fn origin_head(origin: &Path) -> Revision {
    let repo = git2::Repository::open_bare(origin).unwrap();
    let oid = repo.refname_to_id("refs/heads/main").unwrap();
    Revision::new(oid.to_string())
}

fn origin_head_message(origin: &Path) -> String {
    let repo = git2::Repository::open_bare(origin).unwrap();
    let oid = repo.refname_to_id("refs/heads/main").unwrap();
    let message = repo.find_commit(oid).unwrap().message().unwrap_or("").to_string();
    message
}

fn make_app_config(origin: &Path, data_dir: &Path) -> AppConfig {
    let toml_str = format!(
        r#"
[daemon]
poll_interval_secs = 5
log_level = "debug"
data_dir = "{}"

[sync]
backoff_base_ms = 1
network_timeout_secs = 30

[[repositories]]
id = "web"
url = "{}"
branch = "main"

[[repositories.files]]
path = "{FILE}"
format = "json"
"#,
        data_dir.display(),
        origin.display()
    );
    toml::from_str(&toml_str).expect("invalid test config")
}

/// Commit a new unit straight into the bare origin, as another writer
/// racing the engine would.
fn race_upstream(origin: &Path, key: &str) {
    let bare = git2::Repository::open_bare(origin).unwrap();
    let parent = bare
        .find_commit(bare.refname_to_id("refs/heads/main").unwrap())
        .unwrap();
    let entry = parent.tree().unwrap().get_name(FILE).unwrap().id();
    let mut units = JsonFormat
        .parse(FILE, bare.find_blob(entry).unwrap().content())
        .unwrap();
    units.push(StringUnit::new(key, "Thanks", "", UnitState::Empty));

    let blob = bare.blob(&units_json(&units)).unwrap();
    let mut tree = bare.treebuilder(Some(&parent.tree().unwrap())).unwrap();
    tree.insert(FILE, blob, 0o100644).unwrap();
    let tree = bare.find_tree(tree.write().unwrap()).unwrap();
    let sig = git2::Signature::now("Other Writer", "other@example.com").unwrap();
    bare.commit(Some("refs/heads/main"), &sig, &sig, "race", &tree, &[&parent])
        .unwrap();
}

/// Knobs shared between a test and its [`Scripted`] backends.
#[derive(Default)]
struct Script {
    origin: PathBuf,
    fetches: AtomicU32,
    pushes: AtomicU32,
    /// Pushes still to be preceded by an upstream commit.
    races: AtomicU32,
    /// Blocking work every fetch does first, in milliseconds.
    stall_ms: AtomicU64,
    stall_finished: AtomicBool,
}

/// Git backend wrapper driven by a [`Script`].
struct Scripted {
    inner: Arc<dyn VcsBackend>,
    tasks: VcsTasks,
    script: Arc<Script>,
}

#[async_trait]
impl VcsBackend for Scripted {
    fn kind(&self) -> VcsKind {
        self.inner.kind()
    }

    fn path(&self) -> &Path {
        self.inner.path()
    }

    async fn clone_repo(&self) -> Result<(), VcsError> {
        self.inner.clone_repo().await
    }

    async fn fetch(&self) -> Result<Revision, VcsError> {
        self.script.fetches.fetch_add(1, Ordering::SeqCst);
        let stall = self.script.stall_ms.load(Ordering::SeqCst);
        if stall > 0 {
            let script = Arc::clone(&self.script);
            self.tasks
                .run_blocking(move |_| {
                    std::thread::sleep(Duration::from_millis(stall));
                    script.stall_finished.store(true, Ordering::SeqCst);
                    Ok(())
                })
                .await?;
        }
        self.inner.fetch().await
    }

    async fn checkout(&self, rev: &Revision) -> Result<(), VcsError> {
        self.inner.checkout(rev).await
    }

    async fn current_revision(&self) -> Result<Revision, VcsError> {
        self.inner.current_revision().await
    }

    async fn list_changed_paths(
        &self,
        from: &Revision,
        to: &Revision,
    ) -> Result<Vec<String>, VcsError> {
        self.inner.list_changed_paths(from, to).await
    }

    async fn read_file(&self, rev: &Revision, path: &str) -> Result<Option<Vec<u8>>, VcsError> {
        self.inner.read_file(rev, path).await
    }

    async fn commit(
        &self,
        message: &str,
        author: &Author,
        paths: &[String],
    ) -> Result<Option<Revision>, VcsError> {
        self.inner.commit(message, author, paths).await
    }

    async fn push(&self) -> Result<(), VcsError> {
        let n = self.script.pushes.fetch_add(1, Ordering::SeqCst) + 1;
        let race = self
            .script
            .races
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if race {
            race_upstream(&self.script.origin, &format!("race{n}"));
        }
        self.inner.push().await
    }

    async fn merge(
        &self,
        rev: &Revision,
        message: &str,
        author: &Author,
    ) -> Result<MergeOutcome, VcsError> {
        self.inner.merge(rev, message, author).await
    }

    async fn is_ancestor(
        &self,
        ancestor: &Revision,
        descendant: &Revision,
    ) -> Result<bool, VcsError> {
        self.inner.is_ancestor(ancestor, descendant).await
    }

    async fn log(&self, from: &Revision, to: &Revision) -> Result<Vec<CommitInfo>, VcsError> {
        self.inner.log(from, to).await
    }

    async fn is_healthy(&self) -> bool {
        self.inner.is_healthy().await
    }
}

struct Harness {
    _dir: TempDir,
    origin: PathBuf,
    upstream: Upstream,
    config: AppConfig,
    db: Arc<Database>,
    coordinator: MergeCoordinator,
}

impl Harness {
    fn new() -> Self {
        Self::with_policy(CommitPolicy::Partial)
    }

    fn with_policy(policy: CommitPolicy) -> Self {
        Self::build(policy, |_| {}, false).0
    }

    /// A harness whose backends follow the returned [`Script`].
    fn scripted(tune: impl FnOnce(&mut AppConfig)) -> (Self, Arc<Script>) {
        let (h, script) = Self::build(CommitPolicy::Partial, tune, true);
        (h, script.expect("scripted harness"))
    }

    fn build(
        policy: CommitPolicy,
        tune: impl FnOnce(&mut AppConfig),
        scripted: bool,
    ) -> (Self, Option<Arc<Script>>) {
        let dir = TempDir::new().unwrap();
        let origin = create_origin(dir.path());
        let upstream = Upstream::clone(&origin, &dir.path().join("upstream"));
        let mut config = make_app_config(&origin, &dir.path().join("data"));
        config.sync.commit_policy = policy;
        tune(&mut config);

        let db = Database::new(config.daemon.database_path()).expect("failed to create database");
        db.initialize().expect("failed to initialize database schema");
        let db = Arc::new(db);
        let mut coordinator = MergeCoordinator::new(
            config.clone(),
            Arc::clone(&db),
            FormatRegistry::default(),
            Arc::new(ConfigCredentials::from_config(&config)),
        );

        let script = scripted.then(|| {
            Arc::new(Script {
                origin: origin.clone(),
                ..Script::default()
            })
        });
        if let Some(script) = &script {
            let script = Arc::clone(script);
            coordinator = coordinator.with_vcs_opener(Arc::new(
                move |kind: VcsKind,
                      path: PathBuf,
                      remote: RemoteSpec,
                      credentials: Credentials,
                      tasks: VcsTasks|
                      -> Arc<dyn VcsBackend> {
                    let inner = vcs::open(kind, path, remote, credentials, tasks.clone());
                    Arc::new(Scripted {
                        inner,
                        tasks,
                        script: Arc::clone(&script),
                    })
                },
            ));
        }

        let h = Self {
            _dir: dir,
            origin,
            upstream,
            config,
            db,
            coordinator,
        };
        (h, script)
    }

    async fn sync(&self) -> SyncOutcome {
        self.coordinator
            .synchronize("web", manual(), CancellationToken::new())
            .await
    }

    async fn sync_done(&self) -> SyncReport {
        match self.sync().await {
            SyncOutcome::Done(report) => report,
            other => panic!("expected Done, got {other:?}"),
        }
    }

    fn edit(&self, key: &str, target: &str, author: &str) -> PendingEdit {
        let edit = PendingEdit::new("web", FILE, key, target, UnitState::Translated, author);
        self.db.add_pending_edit(&edit).unwrap();
        edit
    }

    fn sync_point(&self) -> Option<Revision> {
        self.coordinator.sync_point("web", FILE).unwrap()
    }

    fn working_copy(&self) -> PathBuf {
        self.config.daemon.working_copies_dir().join("web")
    }
}

fn manual() -> SyncTrigger {
    SyncTrigger::Manual {
        actor: "ops".into(),
    }
}

fn unit<'a>(units: &'a [StringUnit], key: &str) -> &'a StringUnit {
    units
        .iter()
        .find(|u| u.key == key)
        .unwrap_or_else(|| panic!("missing unit {key}"))
}

/// Upstream changes the source of `farewell` and, optionally, the target of
/// `greeting`.
fn upstream_edit(h: &Harness, greeting_target: Option<&str>) -> Revision {
    let mut units = initial_units();
    units[1].source = "Bye".into();
    if let Some(target) = greeting_target {
        units[0].target = target.into();
        units[0].state = UnitState::Translated;
    }
    h.upstream.commit_units(&units, "tweak strings")
}

// ===========================================================================
// Tests
// ===========================================================================

#[tokio::test]
async fn test_first_cycle_initializes_sync_point() {
    let h = Harness::new();
    assert_eq!(h.sync_point(), None);

    let report = h.sync_done().await;
    assert!(!report.committed);
    assert_eq!(report.revision, origin_head(&h.origin));
    assert_eq!(h.sync_point(), Some(origin_head(&h.origin)));

    let stats = h.db.list_file_stats("web").unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].1.all.units, 2);
    assert_eq!(stats[0].1.translated.units, 1);
}

#[tokio::test]
async fn test_local_edit_merges_with_upstream_source_change() {
    let h = Harness::new();
    h.sync_done().await;
    let r0 = h.sync_point().unwrap();

    h.edit("greeting", "Hola", "ana");
    let r1 = upstream_edit(&h, None);

    let report = h.sync_done().await;
    assert!(report.committed);
    assert_eq!(report.conflicts(), 0);
    assert_eq!(report.local_applied(), 1);
    assert_eq!(report.upstream_commits, 1);
    assert_ne!(report.revision, r1);
    assert_eq!(report.revision, origin_head(&h.origin));
    assert_eq!(h.sync_point(), Some(report.revision.clone()));
    assert_ne!(r0, report.revision);

    let units = h.upstream.units();
    assert_eq!(unit(&units, "greeting").target, "Hola");
    assert_eq!(unit(&units, "greeting").state, UnitState::Translated);
    assert_eq!(unit(&units, "farewell").source, "Bye");
    // Upstream order is preserved.
    assert_eq!(units[0].key, "greeting");

    let message = origin_head_message(&h.origin);
    assert!(message.contains("[lingosync]"));
    assert!(message.contains("Translation-Authors: ana"));
    assert!(message.contains("Actor: ops"));

    assert_eq!(h.db.count_pending_edits("web").unwrap(), 0);
    assert!(h.coordinator.get_conflicts("web").unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_target_change_needs_review() {
    let h = Harness::new();
    h.sync_done().await;

    h.edit("greeting", "Hola", "ana");
    let r1 = upstream_edit(&h, Some("Buenas"));

    let report = h.sync_done().await;
    assert_eq!(report.conflicts(), 1);
    // Nothing local could be written, so upstream stays as it is.
    assert!(!report.committed);
    assert_eq!(origin_head(&h.origin), r1);
    assert_eq!(h.sync_point(), Some(r1));

    let conflicts = h.coordinator.get_conflicts("web").unwrap();
    assert_eq!(conflicts.len(), 1);
    let conflict = &conflicts[0];
    assert_eq!(conflict.unit_key, "greeting");
    assert_eq!(conflict.resolution, Resolution::NeedsManualReview);
    assert_eq!(conflict.local_target, "Hola");
    assert_eq!(conflict.remote.as_ref().unwrap().target, "Buenas");
    assert_eq!(conflict.base_target.as_deref(), Some(""));

    let units = h.upstream.units();
    assert_eq!(unit(&units, "greeting").target, "Buenas");
    assert_eq!(unit(&units, "farewell").source, "Bye");

    // The edit is held, not consumed.
    assert_eq!(h.db.count_pending_edits("web").unwrap(), 1);
}

#[tokio::test]
async fn test_partial_policy_commits_around_conflicts() {
    let h = Harness::new();
    h.sync_done().await;

    h.edit("greeting", "Hola", "ana");
    h.edit("farewell", "Chao", "luis");
    upstream_edit(&h, Some("Buenas"));

    let report = h.sync_done().await;
    assert!(report.committed);
    assert_eq!(report.conflicts(), 1);
    assert_eq!(report.local_applied(), 1);

    let units = h.upstream.units();
    assert_eq!(unit(&units, "greeting").target, "Buenas");
    assert_eq!(unit(&units, "farewell").target, "Chao");
    assert_eq!(unit(&units, "farewell").source, "Bye");
    assert!(origin_head_message(&h.origin).contains("Translation-Authors: luis"));
}

#[tokio::test]
async fn test_repeated_sync_is_idempotent() {
    let h = Harness::new();
    h.sync_done().await;
    h.edit("greeting", "Hola", "ana");
    upstream_edit(&h, None);

    let first = h.sync_done().await;
    assert!(first.committed);
    let head = origin_head(&h.origin);

    let second = h.sync_done().await;
    assert!(!second.committed);
    assert_eq!(second.revision, head);
    assert_eq!(second.local_applied(), 0);
    assert_eq!(second.upstream_changes(), 0);
    assert_eq!(origin_head(&h.origin), head);
    assert_eq!(h.sync_point(), Some(head));
}

#[tokio::test]
async fn test_all_or_nothing_policy_blocks_the_commit() {
    let h = Harness::with_policy(CommitPolicy::AllOrNothing);
    h.sync_done().await;
    let r0 = h.sync_point().unwrap();

    h.edit("greeting", "Hola", "ana");
    h.edit("farewell", "Chao", "luis");
    let r1 = upstream_edit(&h, Some("Buenas"));

    match h.sync().await {
        SyncOutcome::Failed(SyncError::MergeConflict { count }) => assert_eq!(count, 1),
        other => panic!("expected MergeConflict, got {other:?}"),
    }
    assert_eq!(origin_head(&h.origin), r1);
    assert_eq!(h.sync_point(), Some(r0));
    assert_eq!(h.db.count_pending_edits("web").unwrap(), 2);

    let history = h.db.list_sync_cycles("web", 1).unwrap();
    assert_eq!(history[0].outcome, "failed");
    assert!(history[0].details.as_deref().unwrap().starts_with("merge_conflict"));

    // Once reviewed, the next cycle writes both edits even though the sync
    // point never moved past the conflicting upstream change.
    let conflict = &h.coordinator.get_conflicts("web").unwrap()[0];
    h.coordinator
        .resolve_conflict(&conflict.id, ResolutionChoice::KeepLocal, "reviewer")
        .unwrap();

    let report = h.sync_done().await;
    assert!(report.committed);
    assert_eq!(report.conflicts(), 0);
    let units = h.upstream.units();
    assert_eq!(unit(&units, "greeting").target, "Hola");
    assert_eq!(unit(&units, "farewell").target, "Chao");
    assert_eq!(h.db.count_pending_edits("web").unwrap(), 0);
}

#[tokio::test]
async fn test_resolution_feeds_next_cycle() {
    let h = Harness::new();
    h.sync_done().await;
    h.edit("greeting", "Hola", "ana");
    upstream_edit(&h, Some("Buenas"));
    h.sync_done().await;

    let conflict = h.coordinator.get_conflicts("web").unwrap().remove(0);
    let resolved = h
        .coordinator
        .resolve_conflict(
            &conflict.id,
            ResolutionChoice::Custom("Hola, buenas".into()),
            "reviewer",
        )
        .unwrap();
    assert_eq!(resolved.status, ConflictStatus::Resolved);
    assert_eq!(resolved.resolved_by.as_deref(), Some("reviewer"));

    // Resolving twice is refused.
    assert!(matches!(
        h.coordinator
            .resolve_conflict(&conflict.id, ResolutionChoice::KeepRemote, "reviewer"),
        Err(ConflictError::AlreadyResolved(_))
    ));

    let report = h.sync_done().await;
    assert!(report.committed);
    assert_eq!(report.local_applied(), 1);
    let units = h.upstream.units();
    assert_eq!(unit(&units, "greeting").target, "Hola, buenas");
    assert!(h.coordinator.get_conflicts("web").unwrap().is_empty());
    assert_eq!(h.db.count_pending_edits("web").unwrap(), 0);
}

#[tokio::test]
async fn test_keep_remote_drops_the_edit() {
    let h = Harness::new();
    h.sync_done().await;
    h.edit("greeting", "Hola", "ana");
    let r1 = upstream_edit(&h, Some("Buenas"));
    h.sync_done().await;

    let conflict = h.coordinator.get_conflicts("web").unwrap().remove(0);
    h.coordinator
        .resolve_conflict(&conflict.id, ResolutionChoice::KeepRemote, "reviewer")
        .unwrap();

    let report = h.sync_done().await;
    assert!(!report.committed);
    assert_eq!(origin_head(&h.origin), r1);
    assert_eq!(h.db.count_pending_edits("web").unwrap(), 0);
}

#[tokio::test]
async fn test_edit_of_removed_unit_cannot_be_kept() {
    let h = Harness::new();
    h.sync_done().await;
    h.edit("greeting", "Hola", "ana");
    let remaining = vec![initial_units()[1].clone()];
    h.upstream.commit_units(&remaining, "drop greeting");

    let report = h.sync_done().await;
    assert_eq!(report.conflicts(), 1);
    let conflict = h.coordinator.get_conflicts("web").unwrap().remove(0);
    assert!(conflict.remote.is_none());

    assert!(matches!(
        h.coordinator
            .resolve_conflict(&conflict.id, ResolutionChoice::KeepLocal, "reviewer"),
        Err(ConflictError::InvalidResolution { .. })
    ));
    h.coordinator
        .resolve_conflict(&conflict.id, ResolutionChoice::KeepRemote, "reviewer")
        .unwrap();
    assert_eq!(h.db.count_pending_edits("web").unwrap(), 0);
}

#[tokio::test]
async fn test_concurrent_synchronize_is_busy() {
    let h = Harness::new();
    let (a, b) = tokio::join!(h.sync(), h.sync());
    let busy = [&a, &b].iter().filter(|o| o.is_busy()).count();
    let done = [&a, &b].iter().filter(|o| o.is_done()).count();
    assert_eq!((busy, done), (1, 1), "got {a:?} and {b:?}");
    assert!(!h.coordinator.is_locked("web"));
}

#[tokio::test]
async fn test_maintenance_answers_busy() {
    let h = Harness::new();
    h.coordinator
        .set_maintenance("web", Some("re-cloning by hand".into()));
    assert!(h.coordinator.is_locked("web"));
    assert!(h.sync().await.is_busy());

    h.coordinator.set_maintenance("web", None);
    assert!(h.sync().await.is_done());
}

#[tokio::test]
async fn test_cancelled_cycle_releases_the_lock() {
    let h = Harness::new();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let outcome = h.coordinator.synchronize("web", manual(), cancel).await;
    assert!(matches!(outcome, SyncOutcome::Failed(SyncError::Cancelled)));
    assert!(!h.coordinator.is_locked("web"));
    assert_eq!(h.sync_point(), None);
    assert!(h.sync().await.is_done());
}

#[tokio::test]
async fn test_unknown_repository() {
    let h = Harness::new();
    let outcome = h
        .coordinator
        .synchronize("nope", manual(), CancellationToken::new())
        .await;
    assert!(matches!(
        outcome,
        SyncOutcome::Failed(SyncError::UnknownRepository(ref id)) if id == "nope"
    ));
}

#[tokio::test]
async fn test_recovers_after_crash_between_push_and_bookkeeping() {
    let h = Harness::new();
    h.sync_done().await;
    let r0 = h.sync_point().unwrap();
    h.edit("greeting", "Hola", "ana");
    let report = h.sync_done().await;
    let pushed = report.revision;
    assert_eq!(origin_head(&h.origin), pushed);

    // Roll the bookkeeping back as if the process died right after the push,
    // then let the translator refine the edit.
    h.db.set_sync_point("web", FILE, &r0).unwrap();
    h.edit("greeting", "¡Hola!", "ana");

    let report = h.sync_done().await;
    assert_eq!(report.conflicts(), 0, "own pushed commit must not conflict");
    assert!(report.committed);
    let units = h.upstream.units();
    assert_eq!(unit(&units, "greeting").target, "¡Hola!");
    assert_eq!(h.sync_point(), Some(origin_head(&h.origin)));
}

#[tokio::test]
async fn test_unpushed_local_commit_is_discarded() {
    let h = Harness::new();
    h.sync_done().await;
    h.edit("greeting", "Hola", "ana");

    // A commit left in the working copy by a cycle that died before pushing.
    {
        let repo = git2::Repository::open(h.working_copy()).unwrap();
        std::fs::write(h.working_copy().join("stray.txt"), "x").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("stray.txt")).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = git2::Signature::now("Lingosync", "noreply@lingosync.local").unwrap();
        let parent = repo.head().unwrap().peel_to_commit().unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "unpushed", &tree, &[&parent])
            .unwrap();
    }

    let report = h.sync_done().await;
    assert!(report.committed);
    assert!(!h.working_copy().join("stray.txt").exists());
    let repo = git2::Repository::open_bare(&h.origin).unwrap();
    let tip = repo.find_commit(repo.refname_to_id("refs/heads/main").unwrap()).unwrap();
    assert!(tip.tree().unwrap().get_name("stray.txt").is_none());
    assert_eq!(unit(&h.upstream.units(), "greeting").target, "Hola");
}

#[tokio::test]
async fn test_rewritten_history_fails_as_diverged() {
    let h = Harness::new();
    h.sync_done().await;

    // Force-push an unrelated root commit to the origin.
    {
        let bare = git2::Repository::open_bare(&h.origin).unwrap();
        let sig = git2::Signature::now("Upstream Dev", "dev@example.com").unwrap();
        let blob = bare.blob(b"[]\n").unwrap();
        let mut tree = bare.treebuilder(None).unwrap();
        tree.insert(FILE, blob, 0o100644).unwrap();
        let tree = bare.find_tree(tree.write().unwrap()).unwrap();
        let oid = bare.commit(None, &sig, &sig, "rewrite", &tree, &[]).unwrap();
        bare.reference("refs/heads/main", oid, true, "force push").unwrap();
    }

    match h.sync().await {
        SyncOutcome::Failed(e @ SyncError::DivergedHistory { .. }) => {
            assert_eq!(e.kind(), lingosync_core::errors::FailureKind::Fatal);
        }
        other => panic!("expected DivergedHistory, got {other:?}"),
    }
    let audit = h.db.list_audit_log(1).unwrap();
    assert!(!audit[0].success);
}

#[tokio::test]
async fn test_all_or_nothing_holds_while_conflicts_stay_open() {
    let h = Harness::with_policy(CommitPolicy::AllOrNothing);
    h.sync_done().await;

    h.edit("greeting", "Hola", "ana");
    h.edit("farewell", "Chao", "luis");
    let r1 = upstream_edit(&h, Some("Buenas"));
    assert!(matches!(
        h.sync().await,
        SyncOutcome::Failed(SyncError::MergeConflict { count: 1 })
    ));

    // Nothing was reviewed, so the next cycle must not commit the other edit
    // around the open conflict.
    match h.sync().await {
        SyncOutcome::Failed(SyncError::MergeConflict { count }) => assert_eq!(count, 1),
        other => panic!("expected MergeConflict, got {other:?}"),
    }
    assert_eq!(origin_head(&h.origin), r1);
    assert_eq!(unit(&h.upstream.units(), "farewell").target, "Adios");
    assert_eq!(h.db.count_pending_edits("web").unwrap(), 2);
    assert_eq!(h.coordinator.get_conflicts("web").unwrap().len(), 1);
}

#[tokio::test]
async fn test_review_of_superseded_upstream_target_conflicts_again() {
    let h = Harness::new();
    h.sync_done().await;
    h.edit("greeting", "Hola", "ana");
    upstream_edit(&h, Some("Buenas"));
    h.sync_done().await;
    let first = h.coordinator.get_conflicts("web").unwrap().remove(0);
    assert_eq!(first.remote.as_ref().unwrap().target, "Buenas");

    // Upstream rewrites the target again while the conflict is open.
    let saludos = upstream_edit(&h, Some("Saludos"));
    let report = h.sync_done().await;
    assert!(!report.committed);
    assert_eq!(h.sync_point(), Some(saludos.clone()));

    // The reviewer only ever saw "Buenas".
    h.coordinator
        .resolve_conflict(&first.id, ResolutionChoice::KeepLocal, "reviewer")
        .unwrap();
    let report = h.sync_done().await;
    assert_eq!(report.conflicts(), 1);
    assert!(!report.committed);
    assert_eq!(origin_head(&h.origin), saludos);
    assert_eq!(unit(&h.upstream.units(), "greeting").target, "Saludos");

    let second = h.coordinator.get_conflicts("web").unwrap().remove(0);
    assert_ne!(second.id, first.id);
    assert_eq!(second.remote.as_ref().unwrap().target, "Saludos");

    // Keeping the edit over what upstream has now goes through.
    h.coordinator
        .resolve_conflict(&second.id, ResolutionChoice::KeepLocal, "reviewer")
        .unwrap();
    let report = h.sync_done().await;
    assert!(report.committed);
    assert_eq!(unit(&h.upstream.units(), "greeting").target, "Hola");
    assert_eq!(h.db.count_pending_edits("web").unwrap(), 0);
}

#[tokio::test]
async fn test_push_race_restarts_from_fetch() {
    let (h, script) = Harness::scripted(|_| {});
    h.sync_done().await;
    h.edit("greeting", "Hola", "ana");
    h.edit("farewell", "Chao", "luis");
    upstream_edit(&h, Some("Buenas"));

    script.races.store(1, Ordering::SeqCst);
    script.fetches.store(0, Ordering::SeqCst);
    let report = h.sync_done().await;
    assert!(report.committed);
    assert_eq!(report.push_attempts, 2);
    assert_eq!(script.fetches.load(Ordering::SeqCst), 2);
    assert_eq!(report.revision, origin_head(&h.origin));
    assert_eq!(h.sync_point(), Some(report.revision.clone()));

    // The conflict found before the rejected push still counts.
    assert_eq!(report.conflicts(), 1);
    assert_eq!(h.coordinator.get_conflicts("web").unwrap().len(), 1);
    let history = h.db.list_sync_cycles("web", 1).unwrap();
    assert!(history[0].details.as_deref().unwrap().contains("1 conflict(s)"));

    let units = h.upstream.units();
    assert_eq!(unit(&units, "farewell").target, "Chao");
    assert_eq!(unit(&units, "greeting").target, "Buenas");
    assert_eq!(unit(&units, "race1").source, "Thanks");
}

#[tokio::test]
async fn test_push_race_gives_up_after_retries() {
    let (h, script) = Harness::scripted(|c| c.sync.max_push_retries = 2);
    h.sync_done().await;
    let r0 = h.sync_point().unwrap();
    h.edit("greeting", "Hola", "ana");

    script.races.store(u32::MAX, Ordering::SeqCst);
    match h.sync().await {
        SyncOutcome::Failed(e @ SyncError::PushConflict { .. }) => {
            assert_eq!(e.kind(), FailureKind::Contention);
            assert!(matches!(e, SyncError::PushConflict { attempts: 3, .. }));
        }
        other => panic!("expected PushConflict, got {other:?}"),
    }
    assert_eq!(script.pushes.load(Ordering::SeqCst), 3);
    assert_eq!(h.sync_point(), Some(r0));
    assert_eq!(h.db.count_pending_edits("web").unwrap(), 1);
    assert_eq!(unit(&h.upstream.units(), "greeting").target, "");
    assert!(!h.coordinator.is_locked("web"));

    // Once the other writer stops, the edit lands on top of its commits.
    script.races.store(0, Ordering::SeqCst);
    let report = h.sync_done().await;
    assert!(report.committed);
    let units = h.upstream.units();
    assert_eq!(unit(&units, "greeting").target, "Hola");
    assert_eq!(unit(&units, "race3").source, "Thanks");
}

#[tokio::test]
async fn test_fetch_retries_with_backoff_then_fails() {
    let (h, script) = Harness::scripted(|c| {
        c.sync.max_fetch_attempts = 3;
        c.sync.backoff_base_ms = 40;
    });
    h.sync_done().await;

    let moved = h.origin.with_extension("gone");
    std::fs::rename(&h.origin, &moved).unwrap();
    script.fetches.store(0, Ordering::SeqCst);
    let started = Instant::now();
    match h.sync().await {
        SyncOutcome::Failed(e @ SyncError::VcsUnavailable(_)) => {
            assert_eq!(e.kind(), FailureKind::Transient);
        }
        other => panic!("expected VcsUnavailable, got {other:?}"),
    }
    assert_eq!(script.fetches.load(Ordering::SeqCst), 3);
    // 40ms before the second attempt, 80ms before the third.
    assert!(started.elapsed() >= Duration::from_millis(120));
    let history = h.db.list_sync_cycles("web", 1).unwrap();
    assert!(history[0].details.as_deref().unwrap().starts_with("vcs_unavailable"));

    std::fs::rename(&moved, &h.origin).unwrap();
    assert!(h.sync().await.is_done());
}

#[tokio::test]
async fn test_lock_timeout_waits_for_abandoned_vcs_work() {
    let (h, script) = Harness::scripted(|c| c.sync.lock_max_hold_secs = 1);
    h.sync_done().await;
    h.edit("greeting", "Hola", "ana");

    script.stall_ms.store(1500, Ordering::SeqCst);
    match h.sync().await {
        SyncOutcome::Failed(SyncError::LockTimeout(id)) => assert_eq!(id, "web"),
        other => panic!("expected LockTimeout, got {other:?}"),
    }
    // The blocking work the cycle started was done before the lock went.
    assert!(script.stall_finished.load(Ordering::SeqCst));
    assert!(!h.coordinator.is_locked("web"));
    let history = h.db.list_sync_cycles("web", 1).unwrap();
    assert!(history[0].details.as_deref().unwrap().starts_with("lock_timeout"));
    assert_eq!(h.db.count_pending_edits("web").unwrap(), 1);

    script.stall_ms.store(0, Ordering::SeqCst);
    let report = h.sync_done().await;
    assert!(report.committed);
    assert_eq!(unit(&h.upstream.units(), "greeting").target, "Hola");
}
