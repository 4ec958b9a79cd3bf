//! Sync scheduler that runs a synchronization cycle for every configured
//! repository on a fixed interval.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use lingosync_core::errors::FailureKind;
use lingosync_core::{MergeCoordinator, SyncOutcome, SyncTrigger};

/// Tracks aggregate statistics across sync cycles.
#[derive(Default)]
pub struct SchedulerStats {
    pub total_cycles: AtomicU64,
    pub total_commits: AtomicU64,
    pub total_conflicts: AtomicU64,
    pub total_busy: AtomicU64,
    pub total_errors: AtomicU64,
    pub consecutive_errors: AtomicU64,
}

/// The sync scheduler.
///
/// Each tick synchronizes all repositories concurrently. A repository whose
/// previous cycle is still running reports busy and is picked up again on
/// the next tick.
pub struct Scheduler {
    coordinator: Arc<MergeCoordinator>,
    poll_interval: Duration,
    stats: Arc<SchedulerStats>,
}

impl Scheduler {
    pub fn new(coordinator: Arc<MergeCoordinator>, poll_interval: Duration) -> Self {
        Self {
            coordinator,
            poll_interval,
            stats: Arc::new(SchedulerStats::default()),
        }
    }

    /// Main scheduler loop. Returns once `shutdown` is cancelled and every
    /// in-flight cycle has observed it.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            "scheduler started"
        );

        let mut interval = time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
        let mut cycles: JoinSet<(String, SyncOutcome)> = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.spawn_cycles(&mut cycles, &shutdown);
                }
                Some(joined) = cycles.join_next() => {
                    match joined {
                        Ok((repository_id, outcome)) => self.record(&repository_id, outcome),
                        Err(e) => {
                            self.stats.total_errors.fetch_add(1, Ordering::SeqCst);
                            error!(error = %e, "sync task panicked");
                        }
                    }
                }
            }
        }

        // Cycles share the shutdown token, so they finish promptly.
        while let Some(joined) = cycles.join_next().await {
            if let Ok((repository_id, outcome)) = joined {
                self.record(&repository_id, outcome);
            }
        }

        info!(
            cycles = self.stats.total_cycles.load(Ordering::SeqCst),
            commits = self.stats.total_commits.load(Ordering::SeqCst),
            conflicts = self.stats.total_conflicts.load(Ordering::SeqCst),
            errors = self.stats.total_errors.load(Ordering::SeqCst),
            "scheduler stopped"
        );
    }

    fn spawn_cycles(
        &self,
        cycles: &mut JoinSet<(String, SyncOutcome)>,
        shutdown: &CancellationToken,
    ) {
        for repo in &self.coordinator.config().repositories {
            if self.coordinator.is_locked(&repo.id) {
                warn!(
                    repository = %repo.id,
                    "skipping sync cycle: previous cycle still running"
                );
                continue;
            }
            let coordinator = Arc::clone(&self.coordinator);
            let repository_id = repo.id.clone();
            let cancel = shutdown.child_token();
            cycles.spawn(async move {
                let outcome = coordinator
                    .synchronize(&repository_id, SyncTrigger::Scheduled, cancel)
                    .await;
                (repository_id, outcome)
            });
        }
    }

    fn record(&self, repository_id: &str, outcome: SyncOutcome) {
        let cycle_num = self.stats.total_cycles.fetch_add(1, Ordering::SeqCst) + 1;
        match outcome {
            SyncOutcome::Done(report) => {
                self.stats.consecutive_errors.store(0, Ordering::SeqCst);
                if report.committed {
                    self.stats.total_commits.fetch_add(1, Ordering::SeqCst);
                }
                self.stats
                    .total_conflicts
                    .fetch_add(report.conflicts() as u64, Ordering::SeqCst);
                info!(
                    cycle = cycle_num,
                    repository = repository_id,
                    revision = report.revision.short(),
                    committed = report.committed,
                    upstream_changes = report.upstream_changes(),
                    local_applied = report.local_applied(),
                    conflicts = report.conflicts(),
                    "sync cycle completed"
                );
            }
            SyncOutcome::Busy => {
                self.stats.total_busy.fetch_add(1, Ordering::SeqCst);
                info!(
                    cycle = cycle_num,
                    repository = repository_id,
                    "repository busy, cycle skipped"
                );
            }
            SyncOutcome::Failed(err) => {
                self.stats.total_errors.fetch_add(1, Ordering::SeqCst);
                let consecutive =
                    self.stats.consecutive_errors.fetch_add(1, Ordering::SeqCst) + 1;
                match err.kind() {
                    FailureKind::Transient | FailureKind::Contention => warn!(
                        cycle = cycle_num,
                        repository = repository_id,
                        reason = err.reason(),
                        consecutive_errors = consecutive,
                        "sync cycle failed, will retry next tick: {}",
                        err
                    ),
                    FailureKind::DataConflict => warn!(
                        cycle = cycle_num,
                        repository = repository_id,
                        "sync cycle held back, units need review: {}",
                        err
                    ),
                    FailureKind::Fatal => error!(
                        cycle = cycle_num,
                        repository = repository_id,
                        reason = err.reason(),
                        consecutive_errors = consecutive,
                        "sync cycle failed, operator action required: {}",
                        err
                    ),
                }
            }
        }
    }
}
