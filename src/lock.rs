//! Cross-thread display serialization.
//!
//! Only one thread may hold an open handle to a given display at a
//! time. Locks key on the I/O path rather than any display identity,
//! so two paths to the same panel are (knowingly) not unified.

use std::collections::HashMap;
use std::sync::{Condvar, Mutex, MutexGuard, OnceLock};
use std::thread::{self, ThreadId};
use std::time::Duration;

use log::debug;

use crate::error::{DdcError, Result};
use crate::DisplayPath;

/// Interval between acquisition polls when not waiting indefinitely.
pub const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Number of acquisition polls before giving up.
pub const LOCK_MAX_POLLS: u32 = 20;

/// How to behave when a display lock is already held elsewhere.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LockMode {
    /// Block until the lock becomes available.
    Wait,
    /// Poll a bounded number of times, then fail with
    /// [`DdcError::DisplayLocked`].
    Poll,
}

#[derive(Debug, Default)]
struct LockRecord {
    owner: Mutex<Option<ThreadId>>,
    released: Condvar,
}

/// Registry of per-display locks.
///
/// Records are created on first use and never removed; the handful of
/// displays on a machine makes reclamation pointless. The registry map
/// is guarded by its own mutex, distinct from every record's mutex, so
/// looking up one display never contends with a thread blocked on
/// another.
#[derive(Debug, Default)]
pub struct DisplayLockRegistry {
    records: Mutex<HashMap<DisplayPath, &'static LockRecord>>,
}

static GLOBAL: OnceLock<DisplayLockRegistry> = OnceLock::new();

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl DisplayLockRegistry {
    /// A fresh registry, useful for tests; production code shares
    /// [`DisplayLockRegistry::global`].
    pub fn new() -> Self {
        Default::default()
    }

    /// The process-wide registry.
    pub fn global() -> &'static Self {
        GLOBAL.get_or_init(Default::default)
    }

    fn record(&self, path: &DisplayPath) -> &'static LockRecord {
        let mut records = lock_unpoisoned(&self.records);
        *records
            .entry(path.clone())
            .or_insert_with(|| Box::leak(Box::default()))
    }

    /// Acquire the lock for `path` on behalf of the calling thread.
    ///
    /// A thread that already holds the lock gets
    /// [`DdcError::AlreadyLockedByThread`] rather than deadlocking.
    pub fn lock(&self, path: &DisplayPath, mode: LockMode) -> Result<()> {
        let me = thread::current().id();
        let record = self.record(path);
        let mut owner = lock_unpoisoned(&record.owner);

        if *owner == Some(me) {
            return Err(DdcError::AlreadyLockedByThread(path.clone()));
        }

        match mode {
            LockMode::Wait => {
                while owner.is_some() {
                    owner = record
                        .released
                        .wait(owner)
                        .unwrap_or_else(|e| e.into_inner());
                }
            }
            LockMode::Poll => {
                let mut polls = 0;
                while owner.is_some() {
                    if polls >= LOCK_MAX_POLLS {
                        debug!("display {} still locked after {} polls", path, polls);
                        return Err(DdcError::DisplayLocked(path.clone()));
                    }
                    polls += 1;
                    let (guard, _) = record
                        .released
                        .wait_timeout(owner, LOCK_POLL_INTERVAL)
                        .unwrap_or_else(|e| e.into_inner());
                    owner = guard;
                }
            }
        }

        *owner = Some(me);
        debug!("locked display {}", path);
        Ok(())
    }

    /// Release the lock for `path`.
    ///
    /// Fails with [`DdcError::NotLockOwner`] when the calling thread
    /// does not hold it, including when it is not held at all.
    pub fn unlock(&self, path: &DisplayPath) -> Result<()> {
        let me = thread::current().id();
        let record = self.record(path);
        let mut owner = lock_unpoisoned(&record.owner);

        if *owner != Some(me) {
            return Err(DdcError::NotLockOwner(path.clone()));
        }

        *owner = None;
        record.released.notify_one();
        debug!("unlocked display {}", path);
        Ok(())
    }

    /// Whether any thread currently holds the lock for `path`.
    pub fn is_locked(&self, path: &DisplayPath) -> bool {
        lock_unpoisoned(&self.record(path).owner).is_some()
    }
}
