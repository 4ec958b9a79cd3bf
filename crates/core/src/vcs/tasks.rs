//! Bookkeeping for VCS work that runs off the caller's future.
//!
//! libgit2 calls block and `hg` runs as a child process, so dropping the
//! future that asked for them does not stop them. Every such operation is
//! spawned through [`VcsTasks`]: dropping the caller's future signals the
//! operation to stop at its next checkpoint, and [`VcsTasks::settle`]
//! waits until nothing spawned for the working copy is still running.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

use crate::errors::VcsError;

/// Operations in flight against one working copy.
#[derive(Debug, Clone, Default)]
pub struct VcsTasks {
    tracker: TaskTracker,
    abort: CancellationToken,
    /// Blocking operations on one checkout never overlap.
    serial: Arc<Mutex<()>>,
}

impl VcsTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether [`settle`](Self::settle) was called.
    pub fn is_aborted(&self) -> bool {
        self.abort.is_cancelled()
    }

    /// Run `f` on the blocking pool.
    ///
    /// The token handed to `f` is cancelled once the returned future is
    /// dropped; long operations poll it to give up early.
    pub async fn run_blocking<T, F>(&self, f: F) -> Result<T, VcsError>
    where
        T: Send + 'static,
        F: FnOnce(&CancellationToken) -> Result<T, VcsError> + Send + 'static,
    {
        let op = self.abort.child_token();
        let _cancel_on_drop = op.clone().drop_guard();
        let serial = Arc::clone(&self.serial);
        self.tracker
            .spawn_blocking(move || {
                let _serial = serial.lock().unwrap_or_else(PoisonError::into_inner);
                if op.is_cancelled() {
                    return Err(VcsError::Aborted);
                }
                f(&op)
            })
            .await
            .map_err(|e| VcsError::State(format!("vcs task failed: {e}")))?
    }

    /// Run the future built by `make` as a tracked task.
    ///
    /// The task is dropped as soon as the returned future is, which kills
    /// any child process it owns.
    pub async fn run<T, Fut, M>(&self, make: M) -> Result<T, VcsError>
    where
        T: Send + 'static,
        Fut: Future<Output = Result<T, VcsError>> + Send + 'static,
        M: FnOnce() -> Fut,
    {
        let op = self.abort.child_token();
        let _cancel_on_drop = op.clone().drop_guard();
        if op.is_cancelled() {
            return Err(VcsError::Aborted);
        }
        let work = make();
        self.tracker
            .spawn(async move {
                tokio::select! {
                    biased;
                    _ = op.cancelled() => Err(VcsError::Aborted),
                    result = work => result,
                }
            })
            .await
            .map_err(|e| VcsError::State(format!("vcs task failed: {e}")))?
    }

    /// Stop accepting work and wait for everything already spawned.
    pub async fn settle(&self) {
        self.abort.cancel();
        self.tracker.close();
        if !self.tracker.is_empty() {
            debug!(tasks = self.tracker.len(), "waiting for abandoned vcs operations");
        }
        self.tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_settle_waits_for_abandoned_blocking_work() {
        let tasks = VcsTasks::new();
        let finished = Arc::new(AtomicBool::new(false));
        let saw_cancel = Arc::new(AtomicBool::new(false));

        let (done, cancelled) = (finished.clone(), saw_cancel.clone());
        let work = tasks.run_blocking(move |op| {
            std::thread::sleep(Duration::from_millis(200));
            cancelled.store(op.is_cancelled(), Ordering::SeqCst);
            done.store(true, Ordering::SeqCst);
            Ok(())
        });
        assert!(tokio::time::timeout(Duration::from_millis(20), work)
            .await
            .is_err());
        assert!(!finished.load(Ordering::SeqCst));

        tasks.settle().await;
        assert!(finished.load(Ordering::SeqCst));
        assert!(saw_cancel.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_no_work_starts_after_settle() {
        let tasks = VcsTasks::new();
        tasks.settle().await;
        assert!(tasks.is_aborted());

        let blocking = tasks.run_blocking(|_| Ok(1)).await;
        assert!(matches!(blocking, Err(VcsError::Aborted)));
        let spawned = tasks.run(|| async { Ok(2) }).await;
        assert!(matches!(spawned, Err(VcsError::Aborted)));
    }

    #[tokio::test]
    async fn test_blocking_operations_do_not_overlap() {
        let tasks = VcsTasks::new();
        let busy = Arc::new(AtomicBool::new(false));
        let step = |busy: Arc<AtomicBool>| {
            move |_: &CancellationToken| {
                if busy.swap(true, Ordering::SeqCst) {
                    return Err(VcsError::State("overlapping operation".into()));
                }
                std::thread::sleep(Duration::from_millis(50));
                busy.store(false, Ordering::SeqCst);
                Ok(())
            }
        };
        let (a, b) = tokio::join!(
            tasks.run_blocking(step(busy.clone())),
            tasks.run_blocking(step(busy.clone()))
        );
        assert!(a.is_ok() && b.is_ok());
    }
}
