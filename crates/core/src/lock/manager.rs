//! The lock table.

use std::sync::{Arc, Weak};
use std::time::Duration;

use bursar_shared::config::ConcurrencyConfig;
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use super::types::{ActiveLock, ConcurrencyStatus, LockInfo, LockKey};

/// Shortest sweep period accepted by [`LockManager::spawn_sweeper`].
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
struct LockRecord {
    holder: String,
    locked_at: DateTime<Utc>,
}

/// How a successful acquisition obtained the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquisition {
    /// No lock existed for the key.
    Fresh,
    /// The holder already owned a live lock; its timestamp was refreshed.
    Reentered,
    /// An expired lock was replaced.
    Reclaimed,
}

impl Acquisition {
    /// Returns true if this acquisition created the lock and is therefore
    /// responsible for releasing it.
    #[must_use]
    pub const fn is_owner(self) -> bool {
        matches!(self, Self::Fresh | Self::Reclaimed)
    }
}

/// Registry of resource locks with timeout-based expiry.
///
/// Acquisition is non-blocking and atomic per key. A lock older than the
/// timeout is treated as absent: lookups purge it lazily and the background
/// sweeper removes it eventually even when nobody asks.
pub struct LockManager {
    locks: DashMap<LockKey, LockRecord>,
    timeout: TimeDelta,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("locks", &self.locks.len())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl LockManager {
    /// Creates a manager on the system clock.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self::with_clock(timeout, Arc::new(SystemClock))
    }

    /// Creates a manager on the given clock.
    #[must_use]
    pub fn with_clock(timeout: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            locks: DashMap::new(),
            timeout: TimeDelta::from_std(timeout).unwrap_or(TimeDelta::MAX),
            clock,
        }
    }

    /// Creates a manager from the concurrency configuration section.
    #[must_use]
    pub fn from_config(config: &ConcurrencyConfig) -> Self {
        Self::new(config.lock_timeout())
    }

    /// Lock timeout.
    #[must_use]
    pub fn timeout(&self) -> TimeDelta {
        self.timeout
    }

    fn is_expired(&self, record: &LockRecord, now: DateTime<Utc>) -> bool {
        now - record.locked_at > self.timeout
    }

    /// Tries to take `key` for `holder`.
    ///
    /// Returns the current lock's details when a different holder owns a live
    /// lock on the key.
    pub fn try_acquire(&self, key: &LockKey, holder: &str) -> Result<Acquisition, LockInfo> {
        let now = self.clock.now();
        let fresh = || LockRecord {
            holder: holder.to_string(),
            locked_at: now,
        };

        match self.locks.entry(key.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(fresh());
                debug!(%key, holder, "Lock acquired");
                Ok(Acquisition::Fresh)
            }
            Entry::Occupied(mut slot) => {
                let record = slot.get_mut();
                if self.is_expired(record, now) {
                    warn!(%key, previous_holder = %record.holder, holder, "Reclaimed expired lock");
                    *record = fresh();
                    Ok(Acquisition::Reclaimed)
                } else if record.holder == holder {
                    record.locked_at = now;
                    debug!(%key, holder, "Lock re-entered");
                    Ok(Acquisition::Reentered)
                } else {
                    Err(LockInfo {
                        key: key.clone(),
                        holder: record.holder.clone(),
                        locked_at: record.locked_at,
                    })
                }
            }
        }
    }

    /// Takes `key` for `holder`. Returns false if another holder owns a live
    /// lock on it.
    pub fn acquire(&self, key: &LockKey, holder: &str) -> bool {
        self.try_acquire(key, holder).is_ok()
    }

    /// Takes `key` for `holder` and returns a guard that releases it on drop.
    ///
    /// A re-entered lock belongs to the outer acquisition, so its guard does
    /// not release it.
    pub fn lock(self: &Arc<Self>, key: LockKey, holder: &str) -> Result<LockGuard, LockInfo> {
        let acquisition = self.try_acquire(&key, holder)?;
        Ok(LockGuard {
            manager: Arc::clone(self),
            key,
            holder: holder.to_string(),
            acquisition,
        })
    }

    /// Releases `key` if `holder` owns it. Returns true if a lock was removed.
    pub fn release(&self, key: &LockKey, holder: &str) -> bool {
        let released = self
            .locks
            .remove_if(key, |_, record| record.holder == holder)
            .is_some();
        if released {
            debug!(%key, holder, "Lock released");
        }
        released
    }

    /// Returns the live lock on `key`, purging it first if it has expired.
    pub fn is_locked(&self, key: &LockKey) -> Option<LockInfo> {
        let now = self.clock.now();
        if self
            .locks
            .remove_if(key, |_, record| self.is_expired(record, now))
            .is_some()
        {
            debug!(%key, "Purged expired lock");
            return None;
        }
        self.locks.get(key).map(|record| LockInfo {
            key: key.clone(),
            holder: record.holder.clone(),
            locked_at: record.locked_at,
        })
    }

    /// Removes every expired lock. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut removed = 0;
        self.locks.retain(|_, record| {
            let keep = !self.is_expired(record, now);
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    /// Returns a snapshot of the live locks.
    pub fn status(&self) -> ConcurrencyStatus {
        let now = self.clock.now();
        let mut cleanup_needed = false;
        let mut locks: Vec<ActiveLock> = Vec::new();

        for entry in &self.locks {
            let record = entry.value();
            if self.is_expired(record, now) {
                cleanup_needed = true;
                continue;
            }
            locks.push(ActiveLock {
                key: entry.key().clone(),
                holder: record.holder.clone(),
                locked_at: record.locked_at,
                age_ms: (now - record.locked_at).num_milliseconds(),
            });
        }
        locks.sort_by(|a, b| a.key.cmp(&b.key));

        ConcurrencyStatus {
            total_locks: locks.len(),
            locks,
            cleanup_needed,
        }
    }

    /// Starts a background task that sweeps expired locks every `interval`.
    ///
    /// The task stops when the returned handle is dropped or when the last
    /// strong reference to the manager goes away.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> SweeperHandle {
        let manager: Weak<Self> = Arc::downgrade(self);
        let period = interval.max(MIN_SWEEP_INTERVAL);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                let removed = manager.sweep_expired();
                if removed > 0 {
                    info!(removed, "Swept expired locks");
                }
            }
        });

        info!(interval_secs = period.as_secs(), "Lock sweeper started");
        SweeperHandle { task }
    }
}

/// A held lock. Releases the lock on drop when this guard created it.
#[derive(Debug)]
pub struct LockGuard {
    manager: Arc<LockManager>,
    key: LockKey,
    holder: String,
    acquisition: Acquisition,
}

impl LockGuard {
    /// The locked resource.
    #[must_use]
    pub fn key(&self) -> &LockKey {
        &self.key
    }

    /// How the lock was obtained.
    #[must_use]
    pub fn acquisition(&self) -> Acquisition {
        self.acquisition
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.acquisition.is_owner() {
            self.manager.release(&self.key, &self.holder);
        }
    }
}

/// Handle to the background sweeper. Aborts the task on drop.
#[derive(Debug)]
pub struct SweeperHandle {
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Returns true once the sweeper task has stopped.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
