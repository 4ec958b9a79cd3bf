//! The merge coordinator: one synchronization cycle per call.
//!
//! A cycle walks `Locking -> Fetching -> ExtractingRemoteChanges ->
//! ApplyingConflictPolicy -> Committing -> Pushing -> Done`. A push the
//! remote rejects because it moved restarts the cycle at `Fetching`, against
//! the new remote head, up to the configured number of retries.
//!
//! Everything a successful cycle persists (sync points, consumed edits,
//! conflicts, statistics, history) is written in one SQLite transaction
//! before the repository lock is released. Conflicts are additionally
//! stored before the commit is pushed, so a crash between push and
//! bookkeeping cannot lose them.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::commit_format::{CommitFormatter, CommitSummary};
use crate::config::{AppConfig, CommitPolicy, RepositoryConfig};
use crate::credentials::CredentialProvider;
use crate::db::{CycleCommit, Database, PendingEditStore, SyncCycleEntry};
use crate::errors::{
    ConfigError, ConflictError, CoreError, DatabaseError, ExtractError, SyncError, VcsError,
    WorkingCopyError,
};
use crate::extractor::{self, FileChanges};
use crate::format::{FormatRegistry, TranslationFormat};
use crate::lock::{LockManager, LockToken};
use crate::models::{
    AuditEntry, ConflictRecord, ConflictStatus, FileReport, PendingEdit, Resolution,
    ResolutionChoice, Revision, StringUnit, SyncOutcome, SyncReport, SyncState, SyncTrigger,
    UnitChange,
};
use crate::policy::{self, Decision};
use crate::stats::TranslationStats;
use crate::vcs::{VcsBackend, VcsOpener};
use crate::working_copy::{WorkingCopy, WorkingCopyManager};

/// Coordinates synchronization cycles for every configured repository.
pub struct MergeCoordinator {
    config: AppConfig,
    db: Arc<Database>,
    locks: LockManager,
    working_copies: WorkingCopyManager,
    formats: FormatRegistry,
    credentials: Arc<dyn CredentialProvider>,
    formatter: CommitFormatter,
}

/// Merge result of one tracked file.
struct FileMerge {
    path: String,
    format: Arc<dyn TranslationFormat>,
    merged: Vec<StringUnit>,
    report: FileReport,
}

/// Everything the policy step decided for a cycle.
#[derive(Default)]
struct MergePlan {
    files: Vec<FileMerge>,
    /// Edits written into the files.
    applied: Vec<String>,
    /// Edits upstream already agrees with.
    converged: Vec<String>,
    conflicts: Vec<ConflictRecord>,
    authors: BTreeSet<String>,
}

/// A cycle attempt that reached the end of `Pushing`.
struct Pushed {
    remote: Revision,
    revision: Revision,
    committed: bool,
    points: HashMap<String, Revision>,
    plan: MergePlan,
}

enum Attempt {
    Pushed(Pushed),
    /// The remote moved between fetch and push.
    Rejected {
        detail: String,
        conflicts: Vec<ConflictRecord>,
    },
}

impl MergePlan {
    /// Count conflicts an earlier, rejected attempt of the same cycle
    /// detected. Their edits were held by the time this plan was made.
    fn carry_forward(&mut self, earlier: Vec<ConflictRecord>) {
        for record in earlier {
            let known = self
                .conflicts
                .iter()
                .any(|c| c.file_path == record.file_path && c.unit_key == record.unit_key);
            if known {
                continue;
            }
            if let Some(file) = self.files.iter_mut().find(|f| f.path == record.file_path) {
                file.report.conflicts += 1;
            }
            self.conflicts.push(record);
        }
    }
}

impl MergeCoordinator {
    pub fn new(
        config: AppConfig,
        db: Arc<Database>,
        formats: FormatRegistry,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        info!(
            repositories = config.repositories.len(),
            "initializing merge coordinator"
        );
        Self {
            locks: LockManager::new(config.sync.lock_max_hold()),
            working_copies: WorkingCopyManager::new(config.daemon.working_copies_dir()),
            formatter: CommitFormatter::new(&config.commit),
            config,
            db,
            formats,
            credentials,
        }
    }

    /// Build VCS backends with `opener` instead of [`vcs::open`](crate::vcs::open).
    pub fn with_vcs_opener(mut self, opener: VcsOpener) -> Self {
        self.working_copies =
            WorkingCopyManager::with_opener(self.config.daemon.working_copies_dir(), opener);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    // -----------------------------------------------------------------------
    // Main entry point
    // -----------------------------------------------------------------------

    /// Run one synchronization cycle of `repository_id`.
    ///
    /// Answers [`SyncOutcome::Busy`] immediately when another cycle holds
    /// the repository. Cancelling `cancel` abandons the cycle; the working
    /// copy is then re-cloned if it was left mid-mutation. The lock is only
    /// released once VCS work the cycle started has stopped.
    pub async fn synchronize(
        &self,
        repository_id: &str,
        trigger: SyncTrigger,
        cancel: CancellationToken,
    ) -> SyncOutcome {
        let Some(repo) = self.config.repository(repository_id) else {
            warn!(repository = repository_id, "synchronize called for unknown repository");
            return SyncOutcome::Failed(SyncError::UnknownRepository(repository_id.to_string()));
        };

        // Taken before the first await: of two concurrent calls exactly one
        // wins, whatever the executor.
        self.enter(repository_id, SyncState::Locking);
        let Some(token) = self.locks.try_acquire(repository_id) else {
            info!(repository = repository_id, %trigger, "repository busy, skipping cycle");
            return SyncOutcome::Busy;
        };
        let guard = self.locks.guard(token);
        let Some(token) = guard.token() else {
            return SyncOutcome::Busy;
        };

        let started_at = Utc::now();
        info!(repository = repository_id, %trigger, "sync cycle starting");

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SyncError::Cancelled),
            _ = tokio::time::sleep(self.locks.max_hold()) => {
                Err(SyncError::LockTimeout(repository_id.to_string()))
            }
            result = self.run_cycle(repo, &trigger, token, started_at) => result,
        };
        // An abandoned cycle may still have VCS work running in the checkout.
        self.working_copies.settle(repository_id).await;

        let outcome = match result {
            Ok(report) => {
                self.enter(repository_id, SyncState::Done);
                info!(
                    repository = repository_id,
                    revision = %report.revision.short(),
                    committed = report.committed,
                    upstream_changes = report.upstream_changes(),
                    local_applied = report.local_applied(),
                    conflicts = report.conflicts(),
                    "sync cycle complete"
                );
                SyncOutcome::Done(report)
            }
            Err(e) => {
                self.enter(repository_id, SyncState::Failed);
                warn!(
                    repository = repository_id,
                    reason = e.reason(),
                    kind = ?e.kind(),
                    error = %e,
                    "sync cycle failed"
                );
                self.record_failure(repository_id, &trigger, started_at, &e);
                SyncOutcome::Failed(e)
            }
        };
        drop(guard);
        outcome
    }

    async fn run_cycle(
        &self,
        repo: &RepositoryConfig,
        trigger: &SyncTrigger,
        token: &LockToken,
        started_at: DateTime<Utc>,
    ) -> Result<SyncReport, SyncError> {
        let credentials = self.credentials.credentials(&repo.id);
        let mut wc = self
            .working_copies
            .acquire(token, repo, credentials)
            .await
            .map_err(working_copy_failure)?;

        let mut attempts = 0u32;
        let mut earlier_conflicts = Vec::new();
        loop {
            attempts += 1;
            let attempt = match self.attempt(repo, trigger, &mut wc).await {
                Ok(attempt) => attempt,
                Err(e) => {
                    if matches!(e, SyncError::VcsState(_)) {
                        wc.mark_for_reclone();
                    }
                    return Err(e);
                }
            };
            match attempt {
                Attempt::Pushed(mut pushed) => {
                    if !earlier_conflicts.is_empty() {
                        // A reviewer may have resolved some in the meantime.
                        let open: HashSet<(String, String)> = self
                            .db
                            .list_conflicts(&repo.id, Some(ConflictStatus::Open))?
                            .into_iter()
                            .map(|c| (c.file_path, c.unit_key))
                            .collect();
                        earlier_conflicts.retain(|c: &ConflictRecord| {
                            open.contains(&(c.file_path.clone(), c.unit_key.clone()))
                        });
                        pushed.plan.carry_forward(earlier_conflicts);
                    }
                    let pushes = attempts - 1 + u32::from(pushed.committed);
                    return self.finish(repo, trigger, &wc, pushed, pushes, started_at).await;
                }
                Attempt::Rejected { detail, conflicts } => {
                    earlier_conflicts.extend(conflicts);
                    if attempts > self.config.sync.max_push_retries {
                        return Err(SyncError::PushConflict { attempts, detail });
                    }
                    warn!(
                        repository = %repo.id,
                        attempt = attempts,
                        %detail,
                        "push rejected, restarting from fetch"
                    );
                }
            }
        }
    }

    /// One pass from `Fetching` to the end of `Pushing`.
    async fn attempt(
        &self,
        repo: &RepositoryConfig,
        trigger: &SyncTrigger,
        wc: &mut WorkingCopy,
    ) -> Result<Attempt, SyncError> {
        self.enter(&repo.id, SyncState::Fetching);
        let remote = self.fetch(&repo.id, wc.vcs()).await.map_err(vcs_failure)?;
        let points = self.sync_points(repo, wc.vcs(), &remote).await?;

        self.enter(&repo.id, SyncState::ExtractingRemoteChanges);
        let changes = self.extract(repo, wc.vcs(), &points, &remote).await?;

        self.enter(&repo.id, SyncState::ApplyingConflictPolicy);
        let plan = self.plan(repo, changes)?;
        if !plan.conflicts.is_empty() {
            self.db.record_conflicts(&plan.conflicts)?;
        }
        // Held edits never reach the plan, so conflicts left open by earlier
        // cycles block the commit as well.
        if self.config.sync.commit_policy == CommitPolicy::AllOrNothing {
            let open = self.db.count_open_conflicts(&repo.id)?;
            if open > 0 {
                return Err(SyncError::MergeConflict {
                    count: usize::try_from(open).unwrap_or(usize::MAX),
                });
            }
        }

        self.enter(&repo.id, SyncState::Committing);
        let commit = self.commit(trigger, wc, &remote, &plan).await?;

        if let Some(rev) = &commit {
            self.enter(&repo.id, SyncState::Pushing);
            // Lets the next cycle recognise this commit if bookkeeping
            // never happens.
            self.db.set_state(&unconfirmed_push_key(&repo.id), rev.as_str())?;
            match self.network("push", wc.vcs().push()).await {
                Ok(()) => debug!(repository = %repo.id, revision = %rev.short(), "pushed"),
                Err(VcsError::PushRejected { detail, .. }) => {
                    return Ok(Attempt::Rejected {
                        detail,
                        conflicts: plan.conflicts,
                    })
                }
                Err(e) => return Err(vcs_failure(e)),
            }
        }

        Ok(Attempt::Pushed(Pushed {
            revision: commit.clone().unwrap_or_else(|| remote.clone()),
            committed: commit.is_some(),
            remote,
            points,
            plan,
        }))
    }

    /// Fetch with exponential backoff on transient failures.
    async fn fetch(&self, repository_id: &str, vcs: &dyn VcsBackend) -> Result<Revision, VcsError> {
        let max_attempts = self.config.sync.max_fetch_attempts.max(1);
        let mut attempt = 1;
        loop {
            tokio::time::sleep(self.config.sync.backoff_delay(attempt)).await;
            match self.network("fetch", vcs.fetch()).await {
                Ok(rev) => {
                    debug!(repository = repository_id, remote = %rev.short(), "fetched");
                    return Ok(rev);
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    warn!(
                        repository = repository_id,
                        attempt,
                        max_attempts,
                        error = %e,
                        "fetch failed, retrying"
                    );
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Bound a network operation by the configured timeout.
    async fn network<T>(
        &self,
        operation: &str,
        fut: impl Future<Output = Result<T, VcsError>>,
    ) -> Result<T, VcsError> {
        match tokio::time::timeout(self.config.sync.network_timeout(), fut).await {
            Ok(result) => result,
            Err(_) => Err(VcsError::Unavailable(format!(
                "{operation} timed out after {}s",
                self.config.sync.network_timeout_secs
            ))),
        }
    }

    /// Derive the sync point of every tracked file.
    ///
    /// A file without one starts at the remote head. A stored point is
    /// replaced by the checkout's HEAD only when HEAD is a commit this engine
    /// pushed whose bookkeeping never completed.
    async fn sync_points(
        &self,
        repo: &RepositoryConfig,
        vcs: &dyn VcsBackend,
        remote: &Revision,
    ) -> Result<HashMap<String, Revision>, SyncError> {
        let head = vcs.current_revision().await.map_err(vcs_failure)?;
        let unconfirmed = self
            .db
            .get_state(&unconfirmed_push_key(&repo.id))?
            .map(Revision::new);
        let pushed_head = match unconfirmed {
            Some(rev) if rev == head => {
                if vcs.is_ancestor(&head, remote).await.map_err(vcs_failure)? {
                    Some(head)
                } else {
                    None
                }
            }
            _ => None,
        };

        let mut points = HashMap::with_capacity(repo.files.len());
        for file in &repo.files {
            let point = match self.db.get_sync_point(&repo.id, &file.path)? {
                None => {
                    info!(
                        repository = %repo.id,
                        path = %file.path,
                        remote = %remote.short(),
                        "initializing sync point"
                    );
                    remote.clone()
                }
                Some(stored) => match &pushed_head {
                    Some(head)
                        if *head != stored
                            && vcs.is_ancestor(&stored, head).await.map_err(vcs_failure)? =>
                    {
                        warn!(
                            repository = %repo.id,
                            path = %file.path,
                            stored = %stored.short(),
                            adopted = %head.short(),
                            "adopting pushed commit as sync point"
                        );
                        head.clone()
                    }
                    _ => stored,
                },
            };

            if !vcs.is_ancestor(&point, remote).await.map_err(vcs_failure)? {
                return Err(SyncError::DivergedHistory {
                    sync_point: point.to_string(),
                    remote: remote.to_string(),
                });
            }
            points.insert(file.path.clone(), point);
        }
        Ok(points)
    }

    async fn extract(
        &self,
        repo: &RepositoryConfig,
        vcs: &dyn VcsBackend,
        points: &HashMap<String, Revision>,
        remote: &Revision,
    ) -> Result<Vec<(Arc<dyn TranslationFormat>, FileChanges)>, SyncError> {
        let mut touched_by_point: HashMap<&Revision, HashSet<String>> = HashMap::new();
        let mut extracted = Vec::with_capacity(repo.files.len());

        for file in &repo.files {
            let format = self.formats.get(&file.format)?;
            let Some(point) = points.get(&file.path) else {
                continue;
            };
            if !touched_by_point.contains_key(point) {
                let touched = if point == remote {
                    HashSet::new()
                } else {
                    vcs.list_changed_paths(point, remote)
                        .await
                        .map_err(vcs_failure)?
                        .into_iter()
                        .collect()
                };
                touched_by_point.insert(point, touched);
            }
            let touched = &touched_by_point[point];
            let changes =
                extractor::extract_file(vcs, format.as_ref(), &file.path, point, remote, touched)
                    .await
                    .map_err(extract_failure)?;
            extracted.push((format, changes));
        }
        Ok(extracted)
    }

    /// Apply the conflict policy to every unit that has an upstream change
    /// or a pending edit.
    fn plan(
        &self,
        repo: &RepositoryConfig,
        changes: Vec<(Arc<dyn TranslationFormat>, FileChanges)>,
    ) -> Result<MergePlan, SyncError> {
        let held: HashSet<(String, String)> = self
            .db
            .list_conflicts(&repo.id, Some(ConflictStatus::Open))?
            .into_iter()
            .map(|c| (c.file_path, c.unit_key))
            .collect();

        let mut edits_by_file: HashMap<String, HashMap<String, PendingEdit>> = HashMap::new();
        for edit in self.db.snapshot(&repo.id)? {
            if held.contains(&(edit.file_path.clone(), edit.unit_key.clone())) {
                debug!(path = %edit.file_path, key = %edit.unit_key, "edit held by open conflict");
                continue;
            }
            if repo.tracked_file(&edit.file_path).is_none() {
                warn!(
                    repository = %repo.id,
                    path = %edit.file_path,
                    "pending edit for an untracked file, ignoring"
                );
                continue;
            }
            edits_by_file
                .entry(edit.file_path.clone())
                .or_default()
                .insert(edit.unit_key.clone(), edit);
        }

        let mut plan = MergePlan::default();
        for (format, file) in changes {
            let edits = edits_by_file.remove(&file.path).unwrap_or_default();
            let merge = merge_file(format, &file, edits, &mut plan);
            plan.files.push(merge);
        }
        Ok(plan)
    }

    /// Write the merged files on top of the remote head and commit them.
    /// Returns `None` when the merged tree equals upstream.
    async fn commit(
        &self,
        trigger: &SyncTrigger,
        wc: &mut WorkingCopy,
        remote: &Revision,
        plan: &MergePlan,
    ) -> Result<Option<Revision>, SyncError> {
        wc.begin_mutation().map_err(working_copy_failure)?;
        wc.vcs().checkout(remote).await.map_err(vcs_failure)?;

        let mut written = Vec::new();
        for file in plan.files.iter().filter(|f| f.report.rewritten) {
            let bytes = file.format.serialize(&file.path, &file.merged)?;
            wc.write_file(&file.path, &bytes)
                .map_err(working_copy_failure)?;
            written.push(file.path.clone());
        }

        let revision = if written.is_empty() {
            None
        } else {
            let authors: Vec<String> = plan.authors.iter().cloned().collect();
            let message = self.formatter.format(&CommitSummary {
                units: plan.applied.len(),
                files: written.len(),
                trigger,
                authors: &authors,
            });
            wc.vcs()
                .commit(&message, self.formatter.author(), &written)
                .await
                .map_err(vcs_failure)?
        };
        wc.end_mutation().map_err(working_copy_failure)?;

        match &revision {
            Some(rev) => debug!(revision = %rev.short(), files = written.len(), "committed"),
            None => debug!("merged tree equals upstream, nothing to commit"),
        }
        Ok(revision)
    }

    /// Check monotonicity and persist the cycle.
    async fn finish(
        &self,
        repo: &RepositoryConfig,
        trigger: &SyncTrigger,
        wc: &WorkingCopy,
        pushed: Pushed,
        push_attempts: u32,
        started_at: DateTime<Utc>,
    ) -> Result<SyncReport, SyncError> {
        let vcs = wc.vcs();
        for point in pushed.points.values() {
            if !vcs.is_ancestor(point, &pushed.revision).await.map_err(vcs_failure)? {
                return Err(SyncError::DivergedHistory {
                    sync_point: point.to_string(),
                    remote: pushed.revision.to_string(),
                });
            }
        }

        let mut upstream_commits = HashSet::new();
        let distinct_points: HashSet<&Revision> = pushed.points.values().collect();
        for point in distinct_points {
            if *point == pushed.remote {
                continue;
            }
            for commit in vcs.log(point, &pushed.remote).await.map_err(vcs_failure)? {
                if commit.author != self.formatter.author().name {
                    upstream_commits.insert(commit.revision);
                }
            }
        }

        let completed_at = Utc::now();
        let plan = pushed.plan;
        let files: Vec<FileReport> = plan.files.into_iter().map(|f| f.report).collect();
        let report = SyncReport {
            repository_id: repo.id.clone(),
            revision: pushed.revision.clone(),
            committed: pushed.committed,
            upstream_commits: upstream_commits.len(),
            push_attempts,
            files,
            started_at,
            completed_at,
        };

        let details = format!(
            "{} upstream change(s), {} local edit(s) applied, {} conflict(s)",
            report.upstream_changes(),
            report.local_applied(),
            report.conflicts()
        );
        let mut consumed = plan.applied;
        consumed.extend(plan.converged);

        self.db.commit_cycle(&CycleCommit {
            repository_id: repo.id.clone(),
            revision: pushed.revision.clone(),
            files: repo.files.iter().map(|f| f.path.clone()).collect(),
            consumed_edits: consumed,
            conflicts: plan.conflicts,
            stats: report
                .files
                .iter()
                .map(|f| (f.path.clone(), f.stats.clone()))
                .collect(),
            cycle: SyncCycleEntry {
                id: 0,
                repository_id: repo.id.clone(),
                trigger: trigger.name().to_string(),
                actor: trigger.actor().to_string(),
                outcome: "done".into(),
                revision: Some(pushed.revision.to_string()),
                details: Some(details.clone()),
                started_at: started_at.to_rfc3339(),
                completed_at: completed_at.to_rfc3339(),
            },
            audit: AuditEntry::success("sync", Some(&repo.id), &details),
        })?;
        Ok(report)
    }

    fn record_failure(
        &self,
        repository_id: &str,
        trigger: &SyncTrigger,
        started_at: DateTime<Utc>,
        error: &SyncError,
    ) {
        let details = format!("{}: {error}", error.reason());
        let entry = SyncCycleEntry {
            id: 0,
            repository_id: repository_id.to_string(),
            trigger: trigger.name().to_string(),
            actor: trigger.actor().to_string(),
            outcome: "failed".into(),
            revision: None,
            details: Some(details.clone()),
            started_at: started_at.to_rfc3339(),
            completed_at: Utc::now().to_rfc3339(),
        };
        if let Err(e) = self.db.insert_sync_cycle(&entry) {
            warn!(repository = repository_id, error = %e, "failed to record sync cycle");
        }
        if let Err(e) = self
            .db
            .insert_audit_entry(&AuditEntry::failure("sync", Some(repository_id), &details))
        {
            warn!(repository = repository_id, error = %e, "failed to write audit entry");
        }
    }

    fn enter(&self, repository_id: &str, state: SyncState) {
        debug!(repository = repository_id, %state, "sync state");
    }

    // -----------------------------------------------------------------------
    // Queries and reviewer operations
    // -----------------------------------------------------------------------

    /// Open conflicts of a repository, newest first.
    pub fn get_conflicts(&self, repository_id: &str) -> Result<Vec<ConflictRecord>, DatabaseError> {
        self.db.list_conflicts(repository_id, Some(ConflictStatus::Open))
    }

    /// Apply a reviewer's decision to an open conflict. The outcome reaches
    /// the repository with the next cycle.
    pub fn resolve_conflict(
        &self,
        conflict_id: &str,
        choice: ResolutionChoice,
        resolved_by: &str,
    ) -> Result<ConflictRecord, ConflictError> {
        let record = self
            .db
            .get_conflict(conflict_id)?
            .ok_or_else(|| ConflictError::NotFound(conflict_id.to_string()))?;
        if record.status == ConflictStatus::Resolved {
            return Err(ConflictError::AlreadyResolved(conflict_id.to_string()));
        }
        let invalid = |detail: &str| ConflictError::InvalidResolution {
            id: conflict_id.to_string(),
            detail: detail.to_string(),
        };
        match &choice {
            ResolutionChoice::KeepRemote => {}
            ResolutionChoice::Custom(text) if text.trim().is_empty() => {
                return Err(invalid("custom translation is empty"));
            }
            ResolutionChoice::KeepLocal | ResolutionChoice::Custom(_) if record.remote.is_none() => {
                return Err(invalid("unit no longer exists upstream, only keep_remote applies"));
            }
            ResolutionChoice::KeepLocal | ResolutionChoice::Custom(_) => {}
        }

        if !self.db.resolve_conflict(&record, &choice, resolved_by)? {
            return Err(ConflictError::AlreadyResolved(conflict_id.to_string()));
        }
        info!(
            conflict = conflict_id,
            repository = %record.repository_id,
            key = %record.unit_key,
            choice = choice.as_str(),
            resolved_by,
            "conflict resolved"
        );
        self.db.insert_audit_entry(&AuditEntry::success(
            "conflict_resolved",
            Some(&record.repository_id),
            &format!(
                "{}:{} resolved as {} by {resolved_by}",
                record.file_path,
                record.unit_key,
                choice.as_str()
            ),
        ))?;

        self.db
            .get_conflict(conflict_id)?
            .ok_or_else(|| ConflictError::NotFound(conflict_id.to_string()))
    }

    /// Queue a translator edit for the next cycle.
    pub fn submit_edit(&self, edit: &PendingEdit) -> Result<(), CoreError> {
        let repo = self
            .config
            .repository(&edit.repository_id)
            .ok_or_else(|| SyncError::UnknownRepository(edit.repository_id.clone()))?;
        if repo.tracked_file(&edit.file_path).is_none() {
            return Err(ConfigError::InvalidValue {
                field: "file_path".into(),
                detail: format!("'{}' is not tracked in repository '{}'", edit.file_path, repo.id),
            }
            .into());
        }
        self.db.add(edit)?;
        Ok(())
    }

    /// Whether a cycle of `repository_id` would currently answer busy.
    pub fn is_locked(&self, repository_id: &str) -> bool {
        self.locks.is_locked(repository_id)
    }

    pub fn sync_point(
        &self,
        repository_id: &str,
        file_path: &str,
    ) -> Result<Option<Revision>, DatabaseError> {
        self.db.get_sync_point(repository_id, file_path)
    }

    /// Put a repository in or out of maintenance. Cycles answer busy while
    /// it is in maintenance.
    pub fn set_maintenance(&self, repository_id: &str, reason: Option<String>) {
        match &reason {
            Some(reason) => info!(repository = repository_id, %reason, "entering maintenance"),
            None => info!(repository = repository_id, "leaving maintenance"),
        }
        self.locks.set_maintenance(repository_id, reason);
    }
}

/// Merge the pending edits of one file into its upstream units.
fn merge_file(
    format: Arc<dyn TranslationFormat>,
    file: &FileChanges,
    mut edits: HashMap<String, PendingEdit>,
    plan: &mut MergePlan,
) -> FileMerge {
    let mut merged = Vec::with_capacity(file.remote.len());
    let mut seen = HashSet::new();
    let (mut local_applied, mut auto_merged, mut conflicts) = (0, 0, 0);

    for unit in &file.remote {
        if !seen.insert(unit.key.as_str()) {
            merged.push(unit.clone());
            continue;
        }
        let change = file.changes.get(&unit.key).unwrap_or(&UnitChange::Unchanged);
        let base = file.base_unit(&unit.key);
        let edit = edits.remove(&unit.key);

        match (policy::decide(change, edit.as_ref(), base), edit) {
            (Decision::ApplyLocal(resolution), Some(edit)) => {
                merged.push(policy::merge_unit(unit, &edit));
                local_applied += 1;
                if resolution == Resolution::AutoMerged {
                    auto_merged += 1;
                }
                if !edit.author.is_empty() {
                    plan.authors.insert(edit.author.clone());
                }
                plan.applied.push(edit.id);
            }
            (Decision::Converged, Some(edit)) => {
                merged.push(unit.clone());
                auto_merged += 1;
                plan.converged.push(edit.id);
            }
            (Decision::Conflict, Some(edit)) => {
                merged.push(unit.clone());
                conflicts += 1;
                plan.conflicts.push(ConflictRecord::new(
                    &edit,
                    base,
                    Some(unit),
                    Resolution::NeedsManualReview,
                ));
            }
            _ => merged.push(unit.clone()),
        }
    }

    // Edits of units upstream does not have (removed, or never existed).
    let mut orphans: Vec<PendingEdit> = edits.into_values().collect();
    orphans.sort_by(|a, b| a.unit_key.cmp(&b.unit_key));
    for edit in orphans {
        conflicts += 1;
        plan.conflicts.push(ConflictRecord::new(
            &edit,
            file.base_unit(&edit.unit_key),
            None,
            Resolution::NeedsManualReview,
        ));
    }

    let rewritten = merged != file.remote;
    let report = FileReport {
        path: file.path.clone(),
        upstream_changes: file.changed_count(),
        local_applied,
        auto_merged,
        conflicts,
        rewritten,
        stats: TranslationStats::from_units(&merged),
    };
    FileMerge {
        path: file.path.clone(),
        format,
        merged,
        report,
    }
}

fn unconfirmed_push_key(repository_id: &str) -> String {
    format!("unconfirmed_push:{repository_id}")
}

fn vcs_failure(e: VcsError) -> SyncError {
    match e {
        VcsError::Unavailable(detail) => SyncError::VcsUnavailable(detail),
        VcsError::Auth(detail) => SyncError::VcsAuth(detail),
        VcsError::State(detail) => SyncError::VcsState(detail),
        VcsError::BinaryNotFound(binary) => {
            SyncError::VcsUnavailable(format!("{binary} is not installed"))
        }
        VcsError::PushRejected { detail, .. } => SyncError::PushConflict {
            attempts: 1,
            detail,
        },
        VcsError::Aborted => SyncError::Cancelled,
    }
}

fn working_copy_failure(e: WorkingCopyError) -> SyncError {
    match e {
        WorkingCopyError::Vcs(e) => vcs_failure(e),
        WorkingCopyError::Io { path, source } => SyncError::Io(format!("{path}: {source}")),
    }
}

fn extract_failure(e: ExtractError) -> SyncError {
    match e {
        ExtractError::Vcs(e) => vcs_failure(e),
        ExtractError::Format(e) => SyncError::Format(e),
    }
}
