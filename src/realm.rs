// ============================================================================
// spark-observables - Realm
// Single-threaded confinement domain for observable state
// ============================================================================
//
// Every observable belongs to exactly one realm. Reads, writes and listener
// dispatch must happen while the realm is current; listener registration may
// happen anywhere. How a realm hops onto its thread is up to the realm, the
// stock `ThreadRealm` parks foreign tasks until its owner flushes them.
// ============================================================================

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use crate::error::{ObservableError, Result};

/// A unit of work handed to a realm.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Shared handle to a realm.
pub type RealmRef = Arc<dyn Realm>;

// =============================================================================
// REALM TRAIT
// =============================================================================

/// A single-threaded execution context that observables are confined to.
pub trait Realm: Send + Sync + 'static {
    /// Returns true when the caller is running inside this realm.
    fn is_current(&self) -> bool;

    /// Hand a task to the realm's execution context without running it now.
    fn schedule(&self, task: Task);

    /// Run `task` right away if this realm is current, otherwise schedule it.
    fn exec(&self, task: Task) {
        if self.is_current() {
            task();
        } else {
            self.schedule(task);
        }
    }
}

/// Fail with [`ObservableError::RealmViolation`] unless `realm` is current.
pub fn check_current(realm: &dyn Realm) -> Result<()> {
    if realm.is_current() {
        Ok(())
    } else {
        tracing::debug!("observable.realm_violation");
        Err(ObservableError::RealmViolation)
    }
}

// =============================================================================
// THREAD REALM
// =============================================================================

/// A realm bound to one OS thread.
///
/// Tasks scheduled from other threads wait in a FIFO until the owning
/// thread calls [`ThreadRealm::run_pending`].
///
/// # Example
///
/// ```
/// use spark_observables::realm::{Realm, ThreadRealm};
///
/// let realm = ThreadRealm::new();
/// assert!(realm.is_current());
///
/// let remote = realm.clone();
/// std::thread::spawn(move || {
///     assert!(!remote.is_current());
///     remote.exec(Box::new(|| println!("runs on the owner thread")));
/// })
/// .join()
/// .unwrap();
///
/// assert_eq!(realm.pending(), 1);
/// assert_eq!(realm.run_pending().unwrap(), 1);
/// ```
pub struct ThreadRealm {
    owner: ThreadId,
    pending: Mutex<VecDeque<Task>>,
}

impl ThreadRealm {
    /// Create a realm owned by the calling thread.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            owner: thread::current().id(),
            pending: Mutex::new(VecDeque::new()),
        })
    }

    /// Create a realm owned by the calling thread as a type-erased handle.
    pub fn current() -> RealmRef {
        Self::new()
    }

    /// Number of tasks waiting for the owner thread.
    pub fn pending(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Run every parked task, including tasks parked while draining.
    ///
    /// Returns the number of tasks run. Must be called on the owner thread.
    pub fn run_pending(&self) -> Result<usize> {
        check_current(self)?;

        let mut ran = 0;
        loop {
            // Release the lock before running so tasks can schedule more work
            let next = lock(&self.pending).pop_front();
            match next {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => break,
            }
        }

        if ran > 0 {
            tracing::trace!(tasks = ran, "realm.run_pending");
        }
        Ok(ran)
    }
}

impl Realm for ThreadRealm {
    fn is_current(&self) -> bool {
        thread::current().id() == self.owner
    }

    fn schedule(&self, task: Task) {
        lock(&self.pending).push_back(task);
    }
}

impl fmt::Debug for ThreadRealm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadRealm")
            .field("owner", &self.owner)
            .field("pending", &self.pending())
            .finish()
    }
}

/// Lock a mutex, recovering the data if a listener panicked while it was held.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn owner_thread_is_current() {
        let realm = ThreadRealm::new();
        assert!(realm.is_current());
        assert!(check_current(&*realm).is_ok());
    }

    #[test]
    fn other_threads_are_not_current() {
        let realm = ThreadRealm::new();
        let remote = realm.clone();
        let result = thread::spawn(move || check_current(&*remote))
            .join()
            .unwrap();
        assert_eq!(result, Err(ObservableError::RealmViolation));
    }

    #[test]
    fn exec_runs_inline_when_current() {
        let realm = ThreadRealm::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        realm.exec(Box::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(realm.pending(), 0);
    }

    #[test]
    fn exec_parks_foreign_tasks_until_flushed() {
        let realm = ThreadRealm::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let remote = realm.clone();
        let h = hits.clone();
        thread::spawn(move || {
            remote.exec(Box::new(move || {
                h.fetch_add(1, Ordering::SeqCst);
            }));
        })
        .join()
        .unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(realm.pending(), 1);

        assert_eq!(realm.run_pending().unwrap(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(realm.pending(), 0);
    }

    #[test]
    fn run_pending_off_thread_is_a_violation() {
        let realm = ThreadRealm::new();
        let remote = realm.clone();
        let result = thread::spawn(move || remote.run_pending()).join().unwrap();
        assert_eq!(result, Err(ObservableError::RealmViolation));
    }

    #[test]
    fn tasks_scheduled_while_draining_also_run() {
        let realm = ThreadRealm::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let inner_realm = realm.clone();
        let h = hits.clone();
        realm.schedule(Box::new(move || {
            let h2 = h.clone();
            inner_realm.schedule(Box::new(move || {
                h2.fetch_add(1, Ordering::SeqCst);
            }));
            h.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(realm.run_pending().unwrap(), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
