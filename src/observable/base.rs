// ============================================================================
// spark-observables - Observable Base
// State every observable shares: identity, realm, flags, listeners, queue
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::event::{ChangeEvent, DiffEvent, DisposeEvent, ObservableId, StaleEvent};
use crate::error::{ObservableError, Result};
use crate::listeners::{Listener, ListenerRegistry};
use crate::queue::EventQueue;
use crate::realm::{RealmRef, check_current, lock};

/// Transition between observed and unobserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Observation {
    FirstListenerAdded,
    LastListenerRemoved,
}

pub(crate) type ObservationHook = Arc<dyn Fn(Observation) + Send + Sync>;

/// Identity, realm, staleness, generic listener channels and the event queue
/// of one observable.
///
/// Typed observables embed a base and keep their own structural-diff
/// registries next to it.
pub struct ObservableBase {
    id: ObservableId,
    realm: RealmRef,
    stale: AtomicBool,
    disposed: AtomicBool,
    change_listeners: ListenerRegistry<Listener<ChangeEvent>>,
    stale_listeners: ListenerRegistry<Listener<StaleEvent>>,
    dispose_listeners: ListenerRegistry<Listener<DisposeEvent>>,
    /// Listeners across every channel, including typed ones. Also serializes
    /// registration so transitions are detected exactly once.
    listener_count: Mutex<usize>,
    hook: Mutex<Option<ObservationHook>>,
    queue: EventQueue,
}

impl ObservableBase {
    /// Create a live, fresh base confined to `realm`.
    pub fn new(realm: &RealmRef) -> Self {
        Self {
            id: ObservableId::next(),
            realm: realm.clone(),
            stale: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            change_listeners: ListenerRegistry::new(),
            stale_listeners: ListenerRegistry::new(),
            dispose_listeners: ListenerRegistry::new(),
            listener_count: Mutex::new(0),
            hook: Mutex::new(None),
            queue: EventQueue::new(),
        }
    }

    pub fn id(&self) -> ObservableId {
        self.id
    }

    pub fn realm(&self) -> &RealmRef {
        &self.realm
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Returns true while at least one listener of any kind is registered.
    pub fn is_observed(&self) -> bool {
        *lock(&self.listener_count) > 0
    }

    // =========================================================================
    // ACCESS CHECKS
    // =========================================================================

    pub(crate) fn check_live(&self) -> Result<()> {
        if self.is_disposed() {
            Err(ObservableError::UseAfterDispose)
        } else {
            Ok(())
        }
    }

    /// Liveness and realm check for reads and writes.
    pub(crate) fn check_access(&self) -> Result<()> {
        self.check_live()?;
        check_current(&*self.realm)
    }

    /// Checked read; also the hook point for read tracking.
    pub(crate) fn record_read(&self) -> Result<()> {
        self.check_access()?;
        tracing::trace!(observable = self.id.get(), "observable.read");
        Ok(())
    }

    // =========================================================================
    // LISTENERS
    // =========================================================================

    pub(crate) fn set_hook(&self, hook: ObservationHook) {
        *lock(&self.hook) = Some(hook);
    }

    fn observe(&self, observation: Observation) {
        let Some(hook) = lock(&self.hook).clone() else {
            return;
        };
        tracing::debug!(observable = self.id.get(), ?observation, "observable.observation");
        self.realm.exec(Box::new(move || hook(observation)));
    }

    /// Add `listener` to `registry`, tracking the observed transition.
    pub(crate) fn register<E: 'static>(
        &self,
        registry: &ListenerRegistry<Listener<E>>,
        listener: Listener<E>,
    ) -> Result<()> {
        self.check_live()?;
        let first = {
            let mut count = lock(&self.listener_count);
            if !registry.add(listener) {
                return Ok(());
            }
            *count += 1;
            *count == 1
        };
        if first {
            self.observe(Observation::FirstListenerAdded);
        }
        Ok(())
    }

    /// Remove `listener` from `registry`, tracking the unobserved transition.
    pub(crate) fn unregister<E: 'static>(
        &self,
        registry: &ListenerRegistry<Listener<E>>,
        listener: &Listener<E>,
    ) {
        let last = {
            let mut count = lock(&self.listener_count);
            if !registry.remove(listener) {
                return;
            }
            *count = count.saturating_sub(1);
            *count == 0
        };
        if last && !self.is_disposed() {
            self.observe(Observation::LastListenerRemoved);
        }
    }

    pub fn add_change_listener(&self, listener: Listener<ChangeEvent>) -> Result<()> {
        self.register(&self.change_listeners, listener)
    }

    pub fn remove_change_listener(&self, listener: &Listener<ChangeEvent>) {
        self.unregister(&self.change_listeners, listener);
    }

    pub fn add_stale_listener(&self, listener: Listener<StaleEvent>) -> Result<()> {
        self.register(&self.stale_listeners, listener)
    }

    pub fn remove_stale_listener(&self, listener: &Listener<StaleEvent>) {
        self.unregister(&self.stale_listeners, listener);
    }

    pub fn add_dispose_listener(&self, listener: Listener<DisposeEvent>) -> Result<()> {
        self.register(&self.dispose_listeners, listener)
    }

    pub fn remove_dispose_listener(&self, listener: &Listener<DisposeEvent>) {
        self.unregister(&self.dispose_listeners, listener);
    }

    // =========================================================================
    // FIRING
    // =========================================================================

    /// Fire the generic change event, then the typed diff event.
    ///
    /// Listener sets are snapshotted now; delivery goes through the queue.
    pub(crate) fn fire_diff<D>(&self, diff_listeners: &ListenerRegistry<Listener<DiffEvent<D>>>, diff: D)
    where
        D: Send + 'static,
    {
        let changes = self.change_listeners.snapshot();
        let diffs = diff_listeners.snapshot();
        if changes.is_empty() && diffs.is_empty() {
            return;
        }

        let source = self.id;
        tracing::trace!(
            observable = source.get(),
            listeners = changes.len() + diffs.len(),
            "observable.fire_change"
        );

        self.queue.dispatch(Box::new(move || {
            let event = ChangeEvent { source };
            for listener in changes.iter() {
                listener(&event);
            }
            let event = DiffEvent { source, diff };
            for listener in diffs.iter() {
                listener(&event);
            }
        }));
    }

    pub(crate) fn fire_stale(&self) {
        let listeners = self.stale_listeners.snapshot();
        if listeners.is_empty() {
            return;
        }

        let source = self.id;
        tracing::trace!(observable = source.get(), "observable.fire_stale");
        self.queue.dispatch(Box::new(move || {
            let event = StaleEvent { source };
            for listener in listeners.iter() {
                listener(&event);
            }
        }));
    }

    // =========================================================================
    // STALENESS
    // =========================================================================

    pub(crate) fn is_marked_stale(&self) -> bool {
        self.stale.load(Ordering::SeqCst)
    }

    /// Set the stale flag, returning true if it changed.
    pub(crate) fn mark_stale(&self, stale: bool) -> bool {
        self.stale.swap(stale, Ordering::SeqCst) != stale
    }

    // =========================================================================
    // DISPOSE
    // =========================================================================

    /// Flip to disposed. Returns false if already disposed.
    ///
    /// The caller releases its own resources after this and then calls
    /// [`ObservableBase::finish_dispose`].
    pub(crate) fn begin_dispose(&self) -> Result<bool> {
        if self.is_disposed() {
            return Ok(false);
        }
        check_current(&*self.realm)?;
        Ok(!self.disposed.swap(true, Ordering::SeqCst))
    }

    /// Clear every generic channel and send the dispose event to the
    /// listeners that were registered up to now.
    pub(crate) fn finish_dispose(&self) {
        let listeners = {
            let mut count = lock(&self.listener_count);
            *count = 0;
            self.change_listeners.clear();
            self.stale_listeners.clear();
            self.dispose_listeners.clear()
        };
        lock(&self.hook).take();

        let source = self.id;
        tracing::debug!(observable = source.get(), "observable.dispose");
        self.queue.dispatch(Box::new(move || {
            let event = DisposeEvent { source };
            for listener in listeners.iter() {
                listener(&event);
            }
        }));
    }
}

impl fmt::Debug for ObservableBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableBase")
            .field("id", &self.id)
            .field("stale", &self.is_marked_stale())
            .field("disposed", &self.is_disposed())
            .field("listeners", &*lock(&self.listener_count))
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listeners::listener;
    use crate::realm::ThreadRealm;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn ids_are_unique() {
        let realm = ThreadRealm::current();
        let a = ObservableBase::new(&realm);
        let b = ObservableBase::new(&realm);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn hook_fires_on_observed_transitions() {
        let realm = ThreadRealm::current();
        let base = ObservableBase::new(&realm);
        let log = Arc::new(Mutex::new(Vec::new()));

        let l = log.clone();
        base.set_hook(Arc::new(move |o: Observation| l.lock().unwrap().push(o)));

        let change = listener(|_: &ChangeEvent| {});
        let stale = listener(|_: &StaleEvent| {});

        base.add_change_listener(change.clone()).unwrap();
        base.add_stale_listener(stale.clone()).unwrap();
        base.add_change_listener(change.clone()).unwrap();
        assert!(base.is_observed());

        base.remove_change_listener(&change);
        base.remove_stale_listener(&stale);
        base.remove_stale_listener(&stale);
        assert!(!base.is_observed());

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                Observation::FirstListenerAdded,
                Observation::LastListenerRemoved
            ]
        );
    }

    #[test]
    fn dispose_fires_once_and_rejects_registration() {
        let realm = ThreadRealm::current();
        let base = ObservableBase::new(&realm);
        let hits = Arc::new(AtomicUsize::new(0));

        let h = hits.clone();
        base.add_dispose_listener(listener(move |_: &DisposeEvent| {
            h.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();

        assert!(base.begin_dispose().unwrap());
        base.finish_dispose();
        assert!(!base.begin_dispose().unwrap());

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(base.is_disposed());
        assert!(!base.is_observed());
        assert_eq!(
            base.add_change_listener(listener(|_: &ChangeEvent| {})),
            Err(ObservableError::UseAfterDispose)
        );
        assert_eq!(base.check_access(), Err(ObservableError::UseAfterDispose));
    }

    #[test]
    fn mark_stale_reports_transitions() {
        let realm = ThreadRealm::current();
        let base = ObservableBase::new(&realm);
        assert!(base.mark_stale(true));
        assert!(!base.mark_stale(true));
        assert!(base.is_marked_stale());
        assert!(base.mark_stale(false));
    }
}
