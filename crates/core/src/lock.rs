//! Process-wide, per-repository locks.
//!
//! Each repository has at most one lock entry. Acquisition is a single
//! atomic entry operation on a sharded map, so repositories never contend
//! with each other. An entry older than the maximum hold duration is stale
//! and is force-released the next time anyone looks at it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug)]
struct LockEntry {
    token: Uuid,
    acquired_at: Instant,
}

#[derive(Debug)]
struct LockTable {
    locks: DashMap<String, LockEntry>,
    maintenance: DashMap<String, String>,
    max_hold: Duration,
}

/// Proof of holding the lock of one repository.
#[derive(Debug, PartialEq, Eq)]
pub struct LockToken {
    repository_id: String,
    id: Uuid,
    acquired_at: Instant,
}

impl LockToken {
    pub fn repository_id(&self) -> &str {
        &self.repository_id
    }

    /// Time since the lock was acquired.
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

/// Shared lock table. Cloning yields another handle to the same table.
#[derive(Debug, Clone)]
pub struct LockManager {
    inner: Arc<LockTable>,
}

impl LockManager {
    pub fn new(max_hold: Duration) -> Self {
        Self {
            inner: Arc::new(LockTable {
                locks: DashMap::new(),
                maintenance: DashMap::new(),
                max_hold,
            }),
        }
    }

    pub fn max_hold(&self) -> Duration {
        self.inner.max_hold
    }

    /// Take the lock of `repository_id`, or `None` if it is held by a live
    /// owner or the repository is in maintenance.
    pub fn try_acquire(&self, repository_id: &str) -> Option<LockToken> {
        if self.inner.maintenance.contains_key(repository_id) {
            debug!(repository = repository_id, "repository in maintenance");
            return None;
        }

        let now = Instant::now();
        let token = Uuid::new_v4();
        let fresh = || LockEntry {
            token,
            acquired_at: now,
        };

        match self.inner.locks.entry(repository_id.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(fresh());
            }
            Entry::Occupied(mut slot) => {
                let held = slot.get().acquired_at.elapsed();
                if held < self.inner.max_hold {
                    return None;
                }
                warn!(
                    repository = repository_id,
                    held_secs = held.as_secs(),
                    "force-releasing stale lock"
                );
                slot.insert(fresh());
            }
        }

        debug!(repository = repository_id, "lock acquired");
        Some(LockToken {
            repository_id: repository_id.to_string(),
            id: token,
            acquired_at: now,
        })
    }

    /// Release a lock. A token whose lock was force-released and taken by
    /// someone else releases nothing. Returns whether a lock was released.
    pub fn release(&self, token: &LockToken) -> bool {
        let released = self
            .inner
            .locks
            .remove_if(&token.repository_id, |_, entry| entry.token == token.id)
            .is_some();
        if released {
            debug!(repository = %token.repository_id, "lock released");
        } else {
            warn!(repository = %token.repository_id, "lock was no longer held by this token");
        }
        released
    }

    /// Whether a synchronization of `repository_id` would currently be
    /// refused.
    pub fn is_locked(&self, repository_id: &str) -> bool {
        if self.inner.maintenance.contains_key(repository_id) {
            return true;
        }
        let max_hold = self.inner.max_hold;
        let stale = self
            .inner
            .locks
            .remove_if(repository_id, |_, entry| entry.acquired_at.elapsed() >= max_hold)
            .is_some();
        if stale {
            warn!(repository = repository_id, "force-released stale lock");
        }
        self.inner.locks.contains_key(repository_id)
    }

    /// Put a repository into maintenance (`Some(reason)`) or take it out
    /// (`None`). Cycles already running are not interrupted.
    pub fn set_maintenance(&self, repository_id: &str, reason: Option<String>) {
        match reason {
            Some(reason) => {
                info!(repository = repository_id, %reason, "repository locked for maintenance");
                self.inner
                    .maintenance
                    .insert(repository_id.to_string(), reason);
            }
            None => {
                if self.inner.maintenance.remove(repository_id).is_some() {
                    info!(repository = repository_id, "repository maintenance ended");
                }
            }
        }
    }

    pub fn maintenance_reason(&self, repository_id: &str) -> Option<String> {
        self.inner
            .maintenance
            .get(repository_id)
            .map(|r| r.value().clone())
    }

    /// Wrap a token so the lock is released when the guard drops.
    pub fn guard(&self, token: LockToken) -> LockGuard {
        LockGuard {
            manager: self.clone(),
            token: Some(token),
        }
    }
}

/// RAII guard that releases its lock on drop, including on panic and on
/// cancellation of the owning future.
#[derive(Debug)]
pub struct LockGuard {
    manager: LockManager,
    token: Option<LockToken>,
}

impl LockGuard {
    pub fn token(&self) -> Option<&LockToken> {
        self.token.as_ref()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.manager.release(&token);
        }
    }
}
