// ============================================================================
// spark-observables - Computed Value
// A read-only value derived from explicit upstream dependencies
// ============================================================================
//
// Unobserved, every read runs the computation. Observed, the value listens to
// each dependency, caches the last result and fires a value diff when a
// recomputation produces something different.
// ============================================================================

use std::fmt;
use std::sync::{Arc, Mutex};

use super::staleness::StalenessTracker;
use crate::diff::ValueDiff;
use crate::equality::{EqualsFn, equals};
use crate::error::Result;
use crate::listeners::{Listener, ListenerRegistry, listener};
use crate::observable::{
    ChangeEvent, Observable, ObservableBase, ObservableValue, Observation, ValueChangeEvent,
};
use crate::realm::{RealmRef, lock};

/// The computation behind a [`ComputedValue`].
pub type ComputeFn<T> = Arc<dyn Fn() -> Result<T> + Send + Sync>;

struct Subscription<T> {
    /// Last successful result. Kept after a failed computation so the next
    /// success can report what it replaced.
    cached: Option<T>,
    /// False while the latest computation failed.
    valid: bool,
    registered: Vec<Arc<dyn Observable>>,
    on_change: Listener<ChangeEvent>,
    staleness: Option<StalenessTracker>,
}

struct ComputedInner<T> {
    base: ObservableBase,
    /// Emptied on dispose.
    dependencies: Mutex<Vec<Arc<dyn Observable>>>,
    compute: ComputeFn<T>,
    equals: EqualsFn<T>,
    value_listeners: ListenerRegistry<Listener<ValueChangeEvent<T>>>,
    subscription: Mutex<Option<Subscription<T>>>,
}

/// A value computed from other observables.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use spark_observables::combinators::ComputedValue;
/// use spark_observables::observable::{Observable, WritableValue};
/// use spark_observables::realm::ThreadRealm;
///
/// let realm = ThreadRealm::current();
/// let width = WritableValue::new(&realm, 3);
/// let height = WritableValue::new(&realm, 4);
///
/// let (w, h) = (width.clone(), height.clone());
/// let deps: Vec<Arc<dyn Observable>> = vec![Arc::new(width.clone()), Arc::new(height.clone())];
/// let area = ComputedValue::new(&realm, deps, move || Ok(w.get()? * h.get()?));
///
/// assert_eq!(area.get().unwrap(), 12);
/// width.set(5).unwrap();
/// assert_eq!(area.get().unwrap(), 20);
/// ```
pub struct ComputedValue<T> {
    inner: Arc<ComputedInner<T>>,
}

impl<T> ComputedInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn on_observation(self: &Arc<Self>, observation: Observation) {
        match observation {
            Observation::FirstListenerAdded => self.subscribe(),
            Observation::LastListenerRemoved => self.unsubscribe(),
        }
    }

    /// Listen to every live dependency, then compute.
    ///
    /// A failed first computation still leaves the value subscribed. The
    /// next dependency change computes again.
    fn subscribe(self: &Arc<Self>) {
        if lock(&self.subscription).is_some() {
            return;
        }
        let id = self.base.id().get();

        let weak = Arc::downgrade(self);
        let on_change = listener(move |_: &ChangeEvent| {
            if let Some(computed) = weak.upgrade() {
                computed.recompute();
            }
        });
        let dependencies = lock(&self.dependencies).clone();
        let mut registered = Vec::with_capacity(dependencies.len());
        for dependency in dependencies {
            match dependency.add_change_listener(on_change.clone()) {
                Ok(()) => registered.push(dependency),
                Err(err) => tracing::debug!(observable = id, %err, "computed.dependency_skipped"),
            }
        }

        let weak = Arc::downgrade(self);
        let staleness = StalenessTracker::new(
            registered.clone(),
            Arc::new(move |stale: bool| {
                if let Some(computed) = weak.upgrade() {
                    computed.staleness_changed(stale);
                }
            }),
        );
        let staleness = match staleness {
            Ok(tracker) => {
                self.base.mark_stale(tracker.is_stale());
                Some(tracker)
            }
            Err(err) => {
                tracing::warn!(observable = id, %err, "computed.staleness_untracked");
                None
            }
        };

        let cached = match (self.compute)() {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(observable = id, %err, "computed.compute_failed");
                None
            }
        };
        let valid = cached.is_some();

        *lock(&self.subscription) = Some(Subscription {
            cached,
            valid,
            registered,
            on_change,
            staleness,
        });
    }

    fn unsubscribe(&self) {
        let Some(subscription) = lock(&self.subscription).take() else {
            return;
        };
        for dependency in &subscription.registered {
            dependency.remove_change_listener(&subscription.on_change);
        }
        if let Some(staleness) = &subscription.staleness {
            staleness.dispose();
        }
        self.base.mark_stale(false);
    }

    /// Compute again after a dependency changed.
    ///
    /// The first success after a failure always fires; with no earlier value
    /// to report, its diff has equal old and new values.
    fn recompute(&self) {
        let result = (self.compute)();

        let diff = {
            let mut subscription = lock(&self.subscription);
            let Some(subscription) = subscription.as_mut() else {
                return;
            };
            let next = match result {
                Ok(next) => next,
                Err(err) => {
                    subscription.valid = false;
                    tracing::warn!(observable = self.base.id().get(), %err, "computed.compute_failed");
                    return;
                }
            };
            let was_valid = std::mem::replace(&mut subscription.valid, true);
            let old = match subscription.cached.take() {
                Some(old) if was_valid && (self.equals)(&old, &next) => {
                    subscription.cached = Some(old);
                    return;
                }
                Some(old) => old,
                None => next.clone(),
            };
            subscription.cached = Some(next.clone());
            ValueDiff::new(old, next)
        };
        self.base.fire_diff(&self.value_listeners, diff);
    }

    fn staleness_changed(&self, stale: bool) {
        if !self.base.mark_stale(stale) {
            return;
        }
        if stale {
            self.base.fire_stale();
            return;
        }
        let current = lock(&self.subscription)
            .as_ref()
            .filter(|s| s.valid)
            .and_then(|s| s.cached.clone());
        if let Some(current) = current {
            self.base
                .fire_diff(&self.value_listeners, ValueDiff::new(current.clone(), current));
        }
    }
}

impl<T> ComputedValue<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a computed value compared with `PartialEq`.
    pub fn new(
        realm: &RealmRef,
        dependencies: Vec<Arc<dyn Observable>>,
        compute: impl Fn() -> Result<T> + Send + Sync + 'static,
    ) -> Self
    where
        T: PartialEq,
    {
        Self::with_equals(realm, dependencies, compute, equals)
    }

    pub fn with_equals(
        realm: &RealmRef,
        dependencies: Vec<Arc<dyn Observable>>,
        compute: impl Fn() -> Result<T> + Send + Sync + 'static,
        equals: EqualsFn<T>,
    ) -> Self {
        let inner = Arc::new(ComputedInner {
            base: ObservableBase::new(realm),
            dependencies: Mutex::new(dependencies),
            compute: Arc::new(compute),
            equals,
            value_listeners: ListenerRegistry::new(),
            subscription: Mutex::new(None),
        });

        let weak = Arc::downgrade(&inner);
        inner.base.set_hook(Arc::new(move |observation: Observation| {
            if let Some(inner) = weak.upgrade() {
                inner.on_observation(observation);
            }
        }));

        Self { inner }
    }

    /// The cached result while observed, a fresh computation otherwise.
    ///
    /// While observed, a failed latest computation is retried here so the
    /// caller sees its error.
    pub fn get(&self) -> Result<T> {
        self.inner.base.record_read()?;
        let cached = lock(&self.inner.subscription)
            .as_ref()
            .filter(|s| s.valid)
            .and_then(|s| s.cached.clone());
        match cached {
            Some(value) => Ok(value),
            None => (self.inner.compute)(),
        }
    }

    pub fn add_value_change_listener(&self, listener: Listener<ValueChangeEvent<T>>) -> Result<()> {
        self.inner.base.register(&self.inner.value_listeners, listener)
    }

    pub fn remove_value_change_listener(&self, listener: &Listener<ValueChangeEvent<T>>) {
        self.inner.base.unregister(&self.inner.value_listeners, listener);
    }
}

impl<T> Observable for ComputedValue<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn base(&self) -> &ObservableBase {
        &self.inner.base
    }

    fn is_stale(&self) -> Result<bool> {
        let base = &self.inner.base;
        base.check_access()?;
        if lock(&self.inner.subscription).is_some() {
            return Ok(base.is_marked_stale());
        }
        let dependencies = lock(&self.inner.dependencies).clone();
        for dependency in &dependencies {
            if dependency.is_stale()? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn dispose(&self) -> Result<()> {
        if self.inner.base.begin_dispose()? {
            self.inner.unsubscribe();
            lock(&self.inner.dependencies).clear();
            self.inner.value_listeners.clear();
            self.inner.base.finish_dispose();
        }
        Ok(())
    }
}

impl<T> ObservableValue<T> for ComputedValue<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn get(&self) -> Result<T> {
        ComputedValue::get(self)
    }

    fn add_value_change_listener(&self, listener: Listener<ValueChangeEvent<T>>) -> Result<()> {
        ComputedValue::add_value_change_listener(self, listener)
    }

    fn remove_value_change_listener(&self, listener: &Listener<ValueChangeEvent<T>>) {
        ComputedValue::remove_value_change_listener(self, listener);
    }
}

impl<T> Clone for ComputedValue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for ComputedValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedValue")
            .field("id", &self.inner.base.id())
            .field("dependencies", &lock(&self.inner.dependencies).len())
            .field("observed", &lock(&self.inner.subscription).is_some())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observable::{StaleEvent, WritableList, WritableValue};
    use crate::realm::ThreadRealm;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sum_of(realm: &RealmRef, list: &WritableList<i32>, runs: &Arc<AtomicUsize>) -> ComputedValue<i32> {
        let (l, r) = (list.clone(), runs.clone());
        let deps: Vec<Arc<dyn Observable>> = vec![Arc::new(list.clone())];
        ComputedValue::new(realm, deps, move || {
            r.fetch_add(1, Ordering::SeqCst);
            l.with(|items| items.iter().sum())
        })
    }

    #[test]
    fn unobserved_reads_recompute_every_time() {
        let realm = ThreadRealm::current();
        let list = WritableList::from_vec(&realm, vec![1, 2]);
        let runs = Arc::new(AtomicUsize::new(0));
        let sum = sum_of(&realm, &list, &runs);

        assert_eq!(sum.get().unwrap(), 3);
        assert_eq!(sum.get().unwrap(), 3);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert!(!list.base().is_observed());
    }

    #[test]
    fn observed_value_caches_and_fires_on_change() {
        let realm = ThreadRealm::current();
        let list = WritableList::from_vec(&realm, vec![1, 2]);
        let runs = Arc::new(AtomicUsize::new(0));
        let sum = sum_of(&realm, &list, &runs);

        let diffs = Arc::new(Mutex::new(Vec::new()));
        let d = diffs.clone();
        sum.add_value_change_listener(listener(move |e: &ValueChangeEvent<i32>| {
            d.lock().unwrap().push((*e.diff.old(), *e.diff.new_value()));
        }))
        .unwrap();

        assert_eq!(sum.get().unwrap(), 3);
        list.push(4).unwrap();
        list.move_element(0, 2).unwrap();
        assert_eq!(sum.get().unwrap(), 7);

        assert_eq!(*diffs.lock().unwrap(), vec![(3, 7)]);
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn staleness_comes_from_dependencies() {
        let realm = ThreadRealm::current();
        let input = WritableValue::new(&realm, 2);
        let i = input.clone();
        let deps: Vec<Arc<dyn Observable>> = vec![Arc::new(input.clone())];
        let doubled = ComputedValue::new(&realm, deps, move || Ok(i.get()? * 2));

        input.set_stale(true).unwrap();
        assert!(doubled.is_stale().unwrap());
        input.set_stale(false).unwrap();

        let stale = Arc::new(AtomicUsize::new(0));
        let s = stale.clone();
        doubled
            .add_stale_listener(listener(move |_: &StaleEvent| {
                s.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        input.set_stale(true).unwrap();
        assert!(doubled.is_stale().unwrap());
        assert_eq!(stale.load(Ordering::SeqCst), 1);

        input.set(5).unwrap();
        input.set_stale(false).unwrap();
        assert!(!doubled.is_stale().unwrap());
        assert_eq!(doubled.get().unwrap(), 10);
    }

    #[test]
    fn releases_dependencies_when_unobserved() {
        let realm = ThreadRealm::current();
        let input = WritableValue::new(&realm, 1);
        let i = input.clone();
        let deps: Vec<Arc<dyn Observable>> = vec![Arc::new(input.clone())];
        let same = ComputedValue::new(&realm, deps, move || i.get());

        let on_change = listener(|_: &ChangeEvent| {});
        same.add_change_listener(on_change.clone()).unwrap();
        assert!(input.base().is_observed());

        same.remove_change_listener(&on_change);
        assert!(!input.base().is_observed());

        same.dispose().unwrap();
        assert!(same.get().is_err());
    }

    #[test]
    fn first_failed_computation_keeps_the_subscription() {
        let realm = ThreadRealm::current();
        let list: WritableList<i32> = WritableList::new(&realm);
        let l = list.clone();
        let deps: Vec<Arc<dyn Observable>> = vec![Arc::new(list.clone())];
        let head = ComputedValue::new(&realm, deps, move || l.get(0));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        head.add_value_change_listener(listener(move |e: &ValueChangeEvent<i32>| {
            s.lock().unwrap().push((*e.diff.old(), *e.diff.new_value()));
        }))
        .unwrap();
        assert!(list.base().is_observed());
        assert!(head.get().is_err());

        list.push(7).unwrap();
        list.set(0, 8).unwrap();
        assert_eq!(head.get().unwrap(), 8);
        assert_eq!(*seen.lock().unwrap(), vec![(7, 7), (7, 8)]);
    }

    #[test]
    fn recovers_after_a_later_failure() {
        let realm = ThreadRealm::current();
        let list = WritableList::from_vec(&realm, vec![1]);
        let l = list.clone();
        let deps: Vec<Arc<dyn Observable>> = vec![Arc::new(list.clone())];
        let head = ComputedValue::new(&realm, deps, move || l.get(0));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        head.add_value_change_listener(listener(move |e: &ValueChangeEvent<i32>| {
            s.lock().unwrap().push((*e.diff.old(), *e.diff.new_value()));
        }))
        .unwrap();

        list.clear().unwrap();
        assert!(head.get().is_err());
        list.push(1).unwrap();
        assert_eq!(head.get().unwrap(), 1);
        assert_eq!(*seen.lock().unwrap(), vec![(1, 1)]);
    }

    #[test]
    fn dispose_releases_dependencies() {
        let realm = ThreadRealm::current();
        let input = WritableValue::new(&realm, 1);
        let i = input.clone();
        let dependency: Arc<dyn Observable> = Arc::new(input.clone());
        let same = ComputedValue::new(&realm, vec![dependency.clone()], move || i.get());
        same.add_change_listener(listener(|_: &ChangeEvent| {})).unwrap();
        assert!(Arc::strong_count(&dependency) > 1);

        same.dispose().unwrap();
        assert_eq!(Arc::strong_count(&dependency), 1);
        assert!(!input.base().is_observed());
    }
}
