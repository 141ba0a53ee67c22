// ============================================================================
// spark-observables - Union Set
// A read-only set containing every element of several upstream sets
// ============================================================================
//
// While observed, the union keeps a reference count per element: how many
// upstream sets currently contain it. Upstream diffs adjust the counts and
// the union only reports elements whose count crossed zero. While nobody
// listens the counts are dropped and every read goes to the sources.
// ============================================================================

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, Weak};

use super::staleness::StalenessTracker;
use crate::diff::SetDiff;
use crate::error::{ObservableError, Result};
use crate::listeners::{Listener, ListenerRegistry, listener};
use crate::observable::{
    Observable, ObservableBase, ObservableSet, Observation, SetChangeEvent,
};
use crate::realm::{RealmRef, lock};

/// An upstream set as the union sees it.
pub type SourceSet<T> = Arc<dyn ObservableSet<T>>;

struct Subscription<T>
where
    T: Eq + Hash,
{
    counts: HashMap<T, usize>,
    listeners: Vec<(SourceSet<T>, Listener<SetChangeEvent<T>>)>,
    staleness: Option<StalenessTracker>,
}

struct UnionInner<T>
where
    T: Eq + Hash,
{
    base: ObservableBase,
    /// Emptied on dispose.
    sources: Mutex<Vec<SourceSet<T>>>,
    set_listeners: ListenerRegistry<Listener<SetChangeEvent<T>>>,
    subscription: Mutex<Option<Subscription<T>>>,
}

/// The union of several observable sets.
///
/// # Example
///
/// ```
/// use std::collections::HashSet;
/// use std::sync::Arc;
/// use spark_observables::combinators::{SourceSet, UnionSet};
/// use spark_observables::observable::WritableSet;
/// use spark_observables::realm::ThreadRealm;
///
/// let realm = ThreadRealm::current();
/// let a = WritableSet::from_set(&realm, HashSet::from([1, 2]));
/// let b = WritableSet::from_set(&realm, HashSet::from([2, 3]));
/// let sources: Vec<SourceSet<i32>> = vec![Arc::new(a.clone()), Arc::new(b)];
/// let union = UnionSet::new(&realm, sources);
///
/// assert_eq!(union.to_set().unwrap(), HashSet::from([1, 2, 3]));
/// assert_eq!(union.reference_count(&2).unwrap(), 2);
/// assert!(union.insert(4).is_err());
/// ```
pub struct UnionSet<T>
where
    T: Eq + Hash,
{
    inner: Arc<UnionInner<T>>,
}

impl<T> UnionInner<T>
where
    T: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn on_observation(self: &Arc<Self>, observation: Observation) {
        match observation {
            Observation::FirstListenerAdded => self.subscribe(),
            Observation::LastListenerRemoved => self.unsubscribe(),
        }
    }

    fn sources(&self) -> Vec<SourceSet<T>> {
        lock(&self.sources).clone()
    }

    /// Listen to every source, then count its elements.
    ///
    /// A disposed source contributes nothing. A source that cannot be read
    /// stays subscribed and its later diffs are still counted.
    fn subscribe(self: &Arc<Self>) {
        if lock(&self.subscription).is_some() {
            return;
        }
        let id = self.base.id().get();

        let mut counts = HashMap::new();
        let mut listeners = Vec::new();
        for source in self.sources() {
            let weak = Arc::downgrade(self);
            let on_diff = listener(move |event: &SetChangeEvent<T>| {
                if let Some(union) = weak.upgrade() {
                    union.apply_upstream(&event.diff);
                }
            });
            if let Err(err) = source.add_set_change_listener(on_diff.clone()) {
                tracing::debug!(observable = id, %err, "union.source_skipped");
                continue;
            }
            match source.to_set() {
                Ok(items) => {
                    for item in items {
                        *counts.entry(item).or_insert(0) += 1;
                    }
                }
                Err(err) => tracing::warn!(observable = id, %err, "union.source_unreadable"),
            }
            listeners.push((source, on_diff));
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let staleness = StalenessTracker::new(
            listeners
                .iter()
                .map(|(source, _)| -> Arc<dyn Observable> { Arc::new(SetAsObservable(source.clone())) })
                .collect(),
            Arc::new(move |stale: bool| {
                if let Some(union) = weak.upgrade() {
                    union.staleness_changed(stale);
                }
            }),
        );
        let staleness = match staleness {
            Ok(tracker) => {
                self.base.mark_stale(tracker.is_stale());
                Some(tracker)
            }
            Err(err) => {
                tracing::warn!(observable = id, %err, "union.staleness_untracked");
                None
            }
        };

        tracing::debug!(observable = id, elements = counts.len(), "union.subscribed");
        *lock(&self.subscription) = Some(Subscription {
            counts,
            listeners,
            staleness,
        });
    }

    fn unsubscribe(&self) {
        let Some(subscription) = lock(&self.subscription).take() else {
            return;
        };
        for (source, on_diff) in &subscription.listeners {
            source.remove_set_change_listener(on_diff);
        }
        if let Some(staleness) = &subscription.staleness {
            staleness.dispose();
        }
        self.base.mark_stale(false);
        tracing::debug!(observable = self.base.id().get(), "union.unsubscribed");
    }

    fn apply_upstream(&self, diff: &SetDiff<T>) {
        let mut additions = HashSet::new();
        let mut removals = HashSet::new();
        {
            let mut subscription = lock(&self.subscription);
            let Some(subscription) = subscription.as_mut() else {
                return;
            };
            let counts = &mut subscription.counts;

            for item in diff.additions() {
                let count = counts.entry(item.clone()).or_insert(0);
                *count += 1;
                if *count == 1 {
                    additions.insert(item.clone());
                }
            }
            for item in diff.removals() {
                if let Some(count) = counts.get_mut(item) {
                    *count -= 1;
                    if *count == 0 {
                        counts.remove(item);
                        removals.insert(item.clone());
                    }
                }
            }
        }

        let diff = SetDiff::new(additions, removals);
        if !diff.is_empty() {
            self.base.fire_diff(&self.set_listeners, diff);
        }
    }

    fn staleness_changed(&self, stale: bool) {
        if !self.base.mark_stale(stale) {
            return;
        }
        if stale {
            self.base.fire_stale();
        } else {
            self.base.fire_diff(&self.set_listeners, SetDiff::empty());
        }
    }

    /// Run `cached` against the counts while observed, else `fallback`.
    fn read<R>(
        &self,
        cached: impl FnOnce(&HashMap<T, usize>) -> R,
        fallback: impl FnOnce() -> Result<R>,
    ) -> Result<R> {
        self.base.record_read()?;
        let hit = lock(&self.subscription).as_ref().map(|s| cached(&s.counts));
        match hit {
            Some(result) => Ok(result),
            None => fallback(),
        }
    }
}

impl<T> UnionSet<T>
where
    T: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// Create the union of `sources`. Sources stay owned by the caller.
    pub fn new(realm: &RealmRef, sources: Vec<SourceSet<T>>) -> Self {
        let inner = Arc::new(UnionInner {
            base: ObservableBase::new(realm),
            sources: Mutex::new(sources),
            set_listeners: ListenerRegistry::new(),
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

    pub fn contains(&self, item: &T) -> Result<bool> {
        self.inner.read(
            |counts| counts.contains_key(item),
            || {
                for source in self.inner.sources() {
                    if source.contains(item)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            },
        )
    }

    pub fn len(&self) -> Result<usize> {
        self.inner
            .read(|counts| counts.len(), || Ok(self.collect()?.len()))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn to_set(&self) -> Result<HashSet<T>> {
        self.inner
            .read(|counts| counts.keys().cloned().collect(), || self.collect())
    }

    /// How many sources currently contain `item`.
    pub fn reference_count(&self, item: &T) -> Result<usize> {
        self.inner.read(
            |counts| counts.get(item).copied().unwrap_or(0),
            || {
                let mut count = 0;
                for source in self.inner.sources() {
                    if source.contains(item)? {
                        count += 1;
                    }
                }
                Ok(count)
            },
        )
    }

    fn collect(&self) -> Result<HashSet<T>> {
        let mut union = HashSet::new();
        for source in self.inner.sources() {
            union.extend(source.to_set()?);
        }
        Ok(union)
    }

    pub fn insert(&self, _item: T) -> Result<bool> {
        Err(ObservableError::UnsupportedMutation("union sets are read-only"))
    }

    pub fn remove(&self, _item: &T) -> Result<bool> {
        Err(ObservableError::UnsupportedMutation("union sets are read-only"))
    }

    pub fn clear(&self) -> Result<()> {
        Err(ObservableError::UnsupportedMutation("union sets are read-only"))
    }

    pub fn add_set_change_listener(&self, listener: Listener<SetChangeEvent<T>>) -> Result<()> {
        self.inner.base.register(&self.inner.set_listeners, listener)
    }

    pub fn remove_set_change_listener(&self, listener: &Listener<SetChangeEvent<T>>) {
        self.inner.base.unregister(&self.inner.set_listeners, listener);
    }
}

impl<T> Observable for UnionSet<T>
where
    T: Eq + Hash + Clone + Send + Sync + 'static,
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
        for source in self.inner.sources() {
            if source.is_stale()? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn dispose(&self) -> Result<()> {
        if self.inner.base.begin_dispose()? {
            self.inner.unsubscribe();
            lock(&self.inner.sources).clear();
            self.inner.set_listeners.clear();
            self.inner.base.finish_dispose();
        }
        Ok(())
    }
}

impl<T> ObservableSet<T> for UnionSet<T>
where
    T: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn contains(&self, item: &T) -> Result<bool> {
        UnionSet::contains(self, item)
    }

    fn len(&self) -> Result<usize> {
        UnionSet::len(self)
    }

    fn to_set(&self) -> Result<HashSet<T>> {
        UnionSet::to_set(self)
    }

    fn add_set_change_listener(&self, listener: Listener<SetChangeEvent<T>>) -> Result<()> {
        UnionSet::add_set_change_listener(self, listener)
    }

    fn remove_set_change_listener(&self, listener: &Listener<SetChangeEvent<T>>) {
        UnionSet::remove_set_change_listener(self, listener);
    }
}

impl<T> Clone for UnionSet<T>
where
    T: Eq + Hash,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for UnionSet<T>
where
    T: Eq + Hash,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnionSet")
            .field("id", &self.inner.base.id())
            .field("sources", &lock(&self.inner.sources).len())
            .field("observed", &lock(&self.inner.subscription).is_some())
            .finish()
    }
}

/// Views a typed source set through the type-erased `Observable` surface.
struct SetAsObservable<T>(SourceSet<T>)
where
    T: Eq + Hash;

impl<T> Observable for SetAsObservable<T>
where
    T: Eq + Hash,
{
    fn base(&self) -> &ObservableBase {
        self.0.base()
    }

    fn is_stale(&self) -> Result<bool> {
        self.0.is_stale()
    }

    fn dispose(&self) -> Result<()> {
        self.0.dispose()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observable::WritableSet;
    use crate::realm::ThreadRealm;

    fn set(items: &[i32]) -> HashSet<i32> {
        items.iter().copied().collect()
    }

    fn source(realm: &RealmRef, items: &[i32]) -> (WritableSet<i32>, SourceSet<i32>) {
        let s = WritableSet::from_set(realm, set(items));
        let erased: SourceSet<i32> = Arc::new(s.clone());
        (s, erased)
    }

    fn recorded(union: &UnionSet<i32>) -> Arc<Mutex<Vec<SetDiff<i32>>>> {
        let diffs = Arc::new(Mutex::new(Vec::new()));
        let d = diffs.clone();
        union
            .add_set_change_listener(listener(move |e: &SetChangeEvent<i32>| {
                d.lock().unwrap().push(e.diff.clone());
            }))
            .unwrap();
        diffs
    }

    #[test]
    fn shared_element_leaves_only_with_its_last_source() {
        let realm = ThreadRealm::current();
        let (a, a_erased) = source(&realm, &[1, 2]);
        let (b, b_erased) = source(&realm, &[2, 3]);
        let union = UnionSet::new(&realm, vec![a_erased, b_erased]);
        let diffs = recorded(&union);

        assert_eq!(union.to_set().unwrap(), set(&[1, 2, 3]));
        assert_eq!(union.reference_count(&2).unwrap(), 2);

        a.remove(&2).unwrap();
        assert_eq!(union.to_set().unwrap(), set(&[1, 2, 3]));
        assert_eq!(union.reference_count(&2).unwrap(), 1);
        assert!(diffs.lock().unwrap().is_empty());

        b.remove(&2).unwrap();
        assert_eq!(union.to_set().unwrap(), set(&[1, 3]));
        let diffs = diffs.lock().unwrap();
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].removals(), &set(&[2]));
        assert!(diffs[0].additions().is_empty());
    }

    #[test]
    fn element_already_present_elsewhere_fires_nothing() {
        let realm = ThreadRealm::current();
        let (a, a_erased) = source(&realm, &[1]);
        let (b, b_erased) = source(&realm, &[]);
        let union = UnionSet::new(&realm, vec![a_erased, b_erased]);
        let diffs = recorded(&union);

        b.insert(1).unwrap();
        assert!(diffs.lock().unwrap().is_empty());
        assert_eq!(union.reference_count(&1).unwrap(), 2);

        a.insert(5).unwrap();
        assert_eq!(diffs.lock().unwrap()[0].additions(), &set(&[5]));
    }

    #[test]
    fn unobserved_union_reads_through_to_sources() {
        let realm = ThreadRealm::current();
        let (a, a_erased) = source(&realm, &[1, 2]);
        let (_b, b_erased) = source(&realm, &[2, 3]);
        let union = UnionSet::new(&realm, vec![a_erased, b_erased]);

        assert!(!union.base().is_observed());
        a.insert(9).unwrap();
        assert!(union.contains(&9).unwrap());
        assert_eq!(union.len().unwrap(), 4);
        assert_eq!(union.reference_count(&2).unwrap(), 2);
        assert_eq!(union.reference_count(&7).unwrap(), 0);
    }

    #[test]
    fn counts_are_dropped_when_the_last_listener_leaves() {
        let realm = ThreadRealm::current();
        let (a, a_erased) = source(&realm, &[1]);
        let union = UnionSet::new(&realm, vec![a_erased]);

        let on_diff = listener(|_: &SetChangeEvent<i32>| {});
        union.add_set_change_listener(on_diff.clone()).unwrap();
        assert!(a.base().is_observed());

        union.remove_set_change_listener(&on_diff);
        assert!(!a.base().is_observed());
        assert!(lock(&union.inner.subscription).is_none());
    }

    #[test]
    fn mutation_is_rejected() {
        let realm = ThreadRealm::current();
        let union: UnionSet<i32> = UnionSet::new(&realm, Vec::new());
        assert!(matches!(
            union.insert(1),
            Err(ObservableError::UnsupportedMutation(_))
        ));
        assert!(union.remove(&1).is_err());
        assert!(union.clear().is_err());
    }

    #[test]
    fn staleness_follows_sources() {
        let realm = ThreadRealm::current();
        let (a, a_erased) = source(&realm, &[1]);
        let union = UnionSet::new(&realm, vec![a_erased]);

        a.set_stale(true).unwrap();
        assert!(union.is_stale().unwrap());
        a.set_stale(false).unwrap();

        let stale_events = Arc::new(Mutex::new(0));
        let s = stale_events.clone();
        union
            .add_stale_listener(listener(move |_: &crate::observable::StaleEvent| {
                *s.lock().unwrap() += 1;
            }))
            .unwrap();

        a.set_stale(true).unwrap();
        assert!(union.is_stale().unwrap());
        assert_eq!(*stale_events.lock().unwrap(), 1);
        a.set_stale(false).unwrap();
        assert!(!union.is_stale().unwrap());
    }

    #[test]
    fn dispose_releases_sources() {
        let realm = ThreadRealm::current();
        let (a, a_erased) = source(&realm, &[1]);
        let union = UnionSet::new(&realm, vec![a_erased.clone()]);
        let _diffs = recorded(&union);
        assert!(Arc::strong_count(&a_erased) > 2);

        union.dispose().unwrap();
        assert!(!a.base().is_observed());
        assert_eq!(Arc::strong_count(&a_erased), 1);
        assert_eq!(union.contains(&1), Err(ObservableError::UseAfterDispose));
    }

    #[test]
    fn disposed_source_does_not_block_subscription() {
        let realm = ThreadRealm::current();
        let (a, a_erased) = source(&realm, &[1]);
        let (b, b_erased) = source(&realm, &[2]);
        b.dispose().unwrap();
        let union = UnionSet::new(&realm, vec![a_erased, b_erased]);
        let diffs = recorded(&union);

        assert_eq!(union.to_set().unwrap(), set(&[1]));
        a.insert(3).unwrap();
        assert_eq!(diffs.lock().unwrap()[0].additions(), &set(&[3]));
    }
}
