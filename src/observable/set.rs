// ============================================================================
// spark-observables - Writable Set
// An unordered realm-confined set firing addition/removal diffs
// ============================================================================

use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use super::{Observable, ObservableBase, ObservableSet, SetChangeEvent};
use crate::diff::{SetDiff, compute_set_diff};
use crate::error::Result;
use crate::listeners::{Listener, ListenerRegistry};
use crate::realm::{RealmRef, lock};

struct SetInner<T>
where
    T: Eq + Hash,
{
    base: ObservableBase,
    items: Mutex<HashSet<T>>,
    set_listeners: ListenerRegistry<Listener<SetChangeEvent<T>>>,
}

/// A mutable observable set.
///
/// A mutation that leaves the contents unchanged fires nothing.
pub struct WritableSet<T>
where
    T: Eq + Hash,
{
    inner: Arc<SetInner<T>>,
}

impl<T> WritableSet<T>
where
    T: Eq + Hash + Clone + Send + Sync + 'static,
{
    pub fn new(realm: &RealmRef) -> Self {
        Self::from_set(realm, HashSet::new())
    }

    pub fn from_set(realm: &RealmRef, items: HashSet<T>) -> Self {
        Self {
            inner: Arc::new(SetInner {
                base: ObservableBase::new(realm),
                items: Mutex::new(items),
                set_listeners: ListenerRegistry::new(),
            }),
        }
    }

    fn fire(&self, diff: SetDiff<T>) {
        if !diff.is_empty() {
            self.inner.base.fire_diff(&self.inner.set_listeners, diff);
        }
    }

    // =========================================================================
    // READS
    // =========================================================================

    pub fn contains(&self, item: &T) -> Result<bool> {
        self.inner.base.record_read()?;
        Ok(lock(&self.inner.items).contains(item))
    }

    pub fn len(&self) -> Result<usize> {
        self.inner.base.record_read()?;
        Ok(lock(&self.inner.items).len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn to_set(&self) -> Result<HashSet<T>> {
        self.inner.base.record_read()?;
        Ok(lock(&self.inner.items).clone())
    }

    // =========================================================================
    // MUTATIONS
    // =========================================================================

    /// Add an element. Returns true if it was not already present.
    pub fn insert(&self, item: T) -> Result<bool> {
        self.inner.base.check_access()?;
        if !lock(&self.inner.items).insert(item.clone()) {
            return Ok(false);
        }
        self.fire(SetDiff::new(HashSet::from([item]), HashSet::new()));
        Ok(true)
    }

    /// Remove an element. Returns true if it was present.
    pub fn remove(&self, item: &T) -> Result<bool> {
        self.inner.base.check_access()?;
        let Some(removed) = lock(&self.inner.items).take(item) else {
            return Ok(false);
        };
        self.fire(SetDiff::new(HashSet::new(), HashSet::from([removed])));
        Ok(true)
    }

    /// Add every element of `iter`, firing one diff with the new ones.
    pub fn extend(&self, iter: impl IntoIterator<Item = T>) -> Result<bool> {
        self.inner.base.check_access()?;
        let additions: HashSet<T> = {
            let mut items = lock(&self.inner.items);
            iter.into_iter()
                .filter(|item| items.insert(item.clone()))
                .collect()
        };
        let changed = !additions.is_empty();
        self.fire(SetDiff::new(additions, HashSet::new()));
        Ok(changed)
    }

    /// Remove every element of `iter`, firing one diff with those present.
    pub fn remove_all<'a>(&self, iter: impl IntoIterator<Item = &'a T>) -> Result<bool>
    where
        T: 'a,
    {
        self.inner.base.check_access()?;
        let removals: HashSet<T> = {
            let mut items = lock(&self.inner.items);
            iter.into_iter().filter_map(|item| items.take(item)).collect()
        };
        let changed = !removals.is_empty();
        self.fire(SetDiff::new(HashSet::new(), removals));
        Ok(changed)
    }

    /// Keep only the elements matching `keep`.
    pub fn retain(&self, mut keep: impl FnMut(&T) -> bool) -> Result<bool> {
        self.inner.base.check_access()?;
        let removals: HashSet<T> = {
            let mut items = lock(&self.inner.items);
            let removals: HashSet<T> = items.iter().filter(|&x| !keep(x)).cloned().collect();
            items.retain(|x| !removals.contains(x));
            removals
        };
        let changed = !removals.is_empty();
        self.fire(SetDiff::new(HashSet::new(), removals));
        Ok(changed)
    }

    pub fn clear(&self) -> Result<()> {
        self.inner.base.check_access()?;
        let removals = std::mem::take(&mut *lock(&self.inner.items));
        self.fire(SetDiff::new(HashSet::new(), removals));
        Ok(())
    }

    /// Replace the whole contents.
    pub fn set_all(&self, items: HashSet<T>) -> Result<()> {
        self.inner.base.check_access()?;
        let diff = {
            let mut current = lock(&self.inner.items);
            let diff = compute_set_diff(&current, &items);
            *current = items;
            diff
        };
        self.fire(diff);
        Ok(())
    }

    /// Mark the set stale or fresh. Becoming fresh fires an empty diff.
    pub fn set_stale(&self, stale: bool) -> Result<()> {
        let base = &self.inner.base;
        base.check_access()?;
        if base.mark_stale(stale) {
            if stale {
                base.fire_stale();
            } else {
                base.fire_diff(&self.inner.set_listeners, SetDiff::empty());
            }
        }
        Ok(())
    }

    pub fn add_set_change_listener(&self, listener: Listener<SetChangeEvent<T>>) -> Result<()> {
        self.inner.base.register(&self.inner.set_listeners, listener)
    }

    pub fn remove_set_change_listener(&self, listener: &Listener<SetChangeEvent<T>>) {
        self.inner.base.unregister(&self.inner.set_listeners, listener);
    }
}

impl<T> Observable for WritableSet<T>
where
    T: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn base(&self) -> &ObservableBase {
        &self.inner.base
    }

    fn dispose(&self) -> Result<()> {
        if self.inner.base.begin_dispose()? {
            self.inner.set_listeners.clear();
            self.inner.base.finish_dispose();
        }
        Ok(())
    }
}

impl<T> ObservableSet<T> for WritableSet<T>
where
    T: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn contains(&self, item: &T) -> Result<bool> {
        WritableSet::contains(self, item)
    }

    fn len(&self) -> Result<usize> {
        WritableSet::len(self)
    }

    fn to_set(&self) -> Result<HashSet<T>> {
        WritableSet::to_set(self)
    }

    fn add_set_change_listener(&self, listener: Listener<SetChangeEvent<T>>) -> Result<()> {
        WritableSet::add_set_change_listener(self, listener)
    }

    fn remove_set_change_listener(&self, listener: &Listener<SetChangeEvent<T>>) {
        WritableSet::remove_set_change_listener(self, listener);
    }
}

impl<T> Clone for WritableSet<T>
where
    T: Eq + Hash,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for WritableSet<T>
where
    T: Eq + Hash + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WritableSet")
            .field("id", &self.inner.base.id())
            .field("items", &*lock(&self.inner.items))
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ObservableError;
    use crate::listeners::listener;
    use crate::realm::{ThreadRealm, Realm};
    use std::thread;

    fn set(items: &[i32]) -> HashSet<i32> {
        items.iter().copied().collect()
    }

    fn recorded(s: &WritableSet<i32>) -> Arc<Mutex<Vec<SetDiff<i32>>>> {
        let diffs = Arc::new(Mutex::new(Vec::new()));
        let d = diffs.clone();
        s.add_set_change_listener(listener(move |e: &SetChangeEvent<i32>| {
            d.lock().unwrap().push(e.diff.clone());
        }))
        .unwrap();
        diffs
    }

    #[test]
    fn insert_and_remove_fire_single_element_diffs() {
        let realm = ThreadRealm::current();
        let s = WritableSet::new(&realm);
        let diffs = recorded(&s);

        assert!(s.insert(1).unwrap());
        assert!(!s.insert(1).unwrap());
        assert!(s.remove(&1).unwrap());
        assert!(!s.remove(&1).unwrap());

        let diffs = diffs.lock().unwrap();
        assert_eq!(diffs.len(), 2);
        assert_eq!(diffs[0].additions(), &set(&[1]));
        assert_eq!(diffs[1].removals(), &set(&[1]));
    }

    #[test]
    fn bulk_mutations_report_only_real_changes() {
        let realm = ThreadRealm::current();
        let s = WritableSet::from_set(&realm, set(&[1, 2]));
        let diffs = recorded(&s);

        assert!(s.extend([2, 3, 4]).unwrap());
        assert!(s.remove_all(&[1, 9]).unwrap());
        assert!(s.retain(|x| x % 2 == 0).unwrap());
        assert!(!s.retain(|_| true).unwrap());

        assert_eq!(s.to_set().unwrap(), set(&[2, 4]));
        let diffs = diffs.lock().unwrap();
        assert_eq!(diffs.len(), 3);
        assert_eq!(diffs[0].additions(), &set(&[3, 4]));
        assert_eq!(diffs[1].removals(), &set(&[1]));
        assert_eq!(diffs[2].removals(), &set(&[3]));
    }

    #[test]
    fn set_all_fires_the_set_difference() {
        let realm = ThreadRealm::current();
        let s = WritableSet::from_set(&realm, set(&[1, 2, 3]));
        let diffs = recorded(&s);

        s.set_all(set(&[2, 3, 4])).unwrap();
        s.set_all(set(&[2, 3, 4])).unwrap();
        s.clear().unwrap();

        let diffs = diffs.lock().unwrap();
        assert_eq!(diffs.len(), 2);
        assert_eq!(diffs[0].additions(), &set(&[4]));
        assert_eq!(diffs[0].removals(), &set(&[1]));
        assert_eq!(diffs[1].removals(), &set(&[2, 3, 4]));
    }

    #[test]
    fn reads_from_another_thread_are_rejected() {
        let realm = ThreadRealm::new();
        let handle: RealmRef = realm.clone();
        let s = WritableSet::from_set(&handle, set(&[1]));

        let remote = s.clone();
        let result = thread::spawn(move || remote.contains(&1)).join().unwrap();
        assert_eq!(result, Err(ObservableError::RealmViolation));
        assert!(realm.is_current());
        assert!(s.contains(&1).unwrap());
    }

    #[test]
    fn dispose_clears_listeners() {
        let realm = ThreadRealm::current();
        let s = WritableSet::new(&realm);
        let diffs = recorded(&s);

        s.dispose().unwrap();
        assert_eq!(s.insert(1), Err(ObservableError::UseAfterDispose));
        assert!(diffs.lock().unwrap().is_empty());
        assert!(!s.base().is_observed());
    }
}
