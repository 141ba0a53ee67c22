// ============================================================================
// spark-observables - Event Queue
// Reentrancy guard that serializes listener dispatch per observable
// ============================================================================
//
// A listener may mutate the observable that is currently notifying it. The
// nested mutation commits its state right away, but its dispatch is parked
// here and replayed once the outer dispatch returns, so every listener sees
// the observable's events in commit order.
// ============================================================================

use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

use crate::realm::lock;

/// A pending listener dispatch.
pub type Dispatch = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct QueueState {
    firing: bool,
    pending: VecDeque<Dispatch>,
}

/// FIFO of dispatches for a single observable.
#[derive(Default)]
pub struct EventQueue {
    state: Mutex<QueueState>,
}

impl EventQueue {
    /// Create an idle queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true while a dispatch is running.
    pub fn is_firing(&self) -> bool {
        lock(&self.state).firing
    }

    /// Number of dispatches waiting behind the running one.
    pub fn pending(&self) -> usize {
        lock(&self.state).pending.len()
    }

    /// Run `dispatch` now, or park it if a dispatch is already running.
    ///
    /// When this call is the outermost one it also drains every dispatch
    /// parked while it ran.
    pub fn dispatch(&self, dispatch: Dispatch) {
        {
            let mut state = lock(&self.state);
            if state.firing {
                state.pending.push_back(dispatch);
                tracing::trace!(pending = state.pending.len(), "observable.dispatch_queued");
                return;
            }
            state.firing = true;
        }

        // Resets the queue even if a listener panics
        struct FiringGuard<'a> {
            queue: &'a EventQueue,
        }

        impl Drop for FiringGuard<'_> {
            fn drop(&mut self) {
                let mut state = lock(&self.queue.state);
                if state.firing {
                    state.firing = false;
                    state.pending.clear();
                }
            }
        }

        let _guard = FiringGuard { queue: self };
        dispatch();

        loop {
            let next = {
                let mut state = lock(&self.state);
                match state.pending.pop_front() {
                    Some(next) => next,
                    None => {
                        state.firing = false;
                        break;
                    }
                }
            };
            next();
        }
    }
}

impl fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("EventQueue")
            .field("firing", &state.firing)
            .field("pending", &state.pending.len())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::Arc;

    fn recorder() -> Arc<Mutex<Vec<&'static str>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[test]
    fn idle_queue_runs_immediately() {
        let queue = EventQueue::new();
        let log = recorder();
        let l = log.clone();
        queue.dispatch(Box::new(move || l.lock().unwrap().push("a")));
        assert_eq!(*log.lock().unwrap(), vec!["a"]);
        assert!(!queue.is_firing());
    }

    #[test]
    fn nested_dispatch_runs_after_outer() {
        let queue = Arc::new(EventQueue::new());
        let log = recorder();

        let q = queue.clone();
        let l = log.clone();
        queue.dispatch(Box::new(move || {
            l.lock().unwrap().push("outer-start");
            let l2 = l.clone();
            q.dispatch(Box::new(move || l2.lock().unwrap().push("nested")));
            assert_eq!(q.pending(), 1);
            l.lock().unwrap().push("outer-end");
        }));

        assert_eq!(
            *log.lock().unwrap(),
            vec!["outer-start", "outer-end", "nested"]
        );
        assert_eq!(queue.pending(), 0);
        assert!(!queue.is_firing());
    }

    #[test]
    fn queued_dispatches_keep_fifo_order() {
        let queue = Arc::new(EventQueue::new());
        let log = recorder();

        let q = queue.clone();
        let l = log.clone();
        queue.dispatch(Box::new(move || {
            let (l1, l2) = (l.clone(), l.clone());
            q.dispatch(Box::new(move || l1.lock().unwrap().push("first")));
            q.dispatch(Box::new(move || l2.lock().unwrap().push("second")));
        }));

        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn panic_resets_the_queue() {
        let queue = Arc::new(EventQueue::new());

        let q = queue.clone();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            queue.dispatch(Box::new(move || {
                q.dispatch(Box::new(|| {}));
                panic!("listener failure");
            }));
        }));
        assert!(result.is_err());
        assert!(!queue.is_firing());
        assert_eq!(queue.pending(), 0);

        let log = recorder();
        let l = log.clone();
        queue.dispatch(Box::new(move || l.lock().unwrap().push("after")));
        assert_eq!(*log.lock().unwrap(), vec!["after"]);
    }
}
