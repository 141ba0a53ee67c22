// ============================================================================
// spark-observables - Writable Map
// A realm-confined key/value map firing added/removed/changed diffs
// ============================================================================

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use super::{MapChangeEvent, Observable, ObservableBase, ObservableMap};
use crate::diff::{MapDiff, compute_map_diff};
use crate::error::Result;
use crate::listeners::{Listener, ListenerRegistry};
use crate::realm::{RealmRef, lock};

struct MapInner<K, V>
where
    K: Eq + Hash,
{
    base: ObservableBase,
    entries: Mutex<HashMap<K, V>>,
    map_listeners: ListenerRegistry<Listener<MapChangeEvent<K, V>>>,
}

/// A mutable observable map.
///
/// # Example
///
/// ```
/// use std::sync::{Arc, Mutex};
/// use spark_observables::listeners::listener;
/// use spark_observables::observable::{MapChangeEvent, WritableMap};
/// use spark_observables::realm::ThreadRealm;
///
/// let realm = ThreadRealm::current();
/// let prices = WritableMap::new(&realm);
/// prices.insert("apple", 3).unwrap();
///
/// let changed = Arc::new(Mutex::new(Vec::new()));
/// let c = changed.clone();
/// prices
///     .add_map_change_listener(listener(move |e: &MapChangeEvent<&str, i32>| {
///         c.lock().unwrap().extend(e.diff.changed_keys().iter().copied());
///     }))
///     .unwrap();
///
/// assert_eq!(prices.insert("apple", 4).unwrap(), Some(3));
/// assert_eq!(*changed.lock().unwrap(), vec!["apple"]);
/// ```
pub struct WritableMap<K, V>
where
    K: Eq + Hash,
{
    inner: Arc<MapInner<K, V>>,
}

impl<K, V> WritableMap<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: PartialEq + Clone + Send + Sync + 'static,
{
    pub fn new(realm: &RealmRef) -> Self {
        Self::from_map(realm, HashMap::new())
    }

    pub fn from_map(realm: &RealmRef, entries: HashMap<K, V>) -> Self {
        Self {
            inner: Arc::new(MapInner {
                base: ObservableBase::new(realm),
                entries: Mutex::new(entries),
                map_listeners: ListenerRegistry::new(),
            }),
        }
    }

    fn fire(&self, diff: MapDiff<K, V>) {
        if !diff.is_empty() {
            self.inner.base.fire_diff(&self.inner.map_listeners, diff);
        }
    }

    // =========================================================================
    // READS
    // =========================================================================

    pub fn get(&self, key: &K) -> Result<Option<V>> {
        self.inner.base.record_read()?;
        Ok(lock(&self.inner.entries).get(key).cloned())
    }

    pub fn contains_key(&self, key: &K) -> Result<bool> {
        self.inner.base.record_read()?;
        Ok(lock(&self.inner.entries).contains_key(key))
    }

    pub fn len(&self) -> Result<usize> {
        self.inner.base.record_read()?;
        Ok(lock(&self.inner.entries).len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn to_map(&self) -> Result<HashMap<K, V>> {
        self.inner.base.record_read()?;
        Ok(lock(&self.inner.entries).clone())
    }

    // =========================================================================
    // MUTATIONS
    // =========================================================================

    /// Insert or replace the value for `key`, returning the previous value.
    ///
    /// Replacing a value with an equal one fires nothing.
    pub fn insert(&self, key: K, value: V) -> Result<Option<V>> {
        self.inner.base.check_access()?;
        let previous = lock(&self.inner.entries).insert(key.clone(), value.clone());
        match &previous {
            None => self.fire(MapDiff::added(key, value)),
            Some(old) if *old != value => self.fire(MapDiff::changed(key, old.clone(), value)),
            Some(_) => {}
        }
        Ok(previous)
    }

    /// Remove `key`, returning its value if it was present.
    pub fn remove(&self, key: &K) -> Result<Option<V>> {
        self.inner.base.check_access()?;
        let removed = lock(&self.inner.entries).remove_entry(key);
        Ok(removed.map(|(key, value)| {
            self.fire(MapDiff::removed(key, value.clone()));
            value
        }))
    }

    /// Insert every entry of `iter`, firing one combined diff.
    pub fn extend(&self, iter: impl IntoIterator<Item = (K, V)>) -> Result<()> {
        self.inner.base.check_access()?;
        let diff = {
            let mut entries = lock(&self.inner.entries);
            let mut before = HashMap::new();
            let mut after = HashMap::new();
            for (key, value) in iter {
                let old = entries.insert(key.clone(), value.clone());
                if let (false, Some(old)) = (after.contains_key(&key), old) {
                    before.insert(key.clone(), old);
                }
                after.insert(key, value);
            }
            compute_map_diff(&before, &after)
        };
        self.fire(diff);
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        self.inner.base.check_access()?;
        let removed = std::mem::take(&mut *lock(&self.inner.entries));
        self.fire(compute_map_diff(&removed, &HashMap::new()));
        Ok(())
    }

    /// Replace the whole contents.
    pub fn set_all(&self, entries: HashMap<K, V>) -> Result<()> {
        self.inner.base.check_access()?;
        let diff = {
            let mut current = lock(&self.inner.entries);
            let diff = compute_map_diff(&current, &entries);
            *current = entries;
            diff
        };
        self.fire(diff);
        Ok(())
    }

    /// Mark the map stale or fresh. Becoming fresh fires an empty diff.
    pub fn set_stale(&self, stale: bool) -> Result<()> {
        let base = &self.inner.base;
        base.check_access()?;
        if base.mark_stale(stale) {
            if stale {
                base.fire_stale();
            } else {
                base.fire_diff(&self.inner.map_listeners, MapDiff::empty());
            }
        }
        Ok(())
    }

    pub fn add_map_change_listener(&self, listener: Listener<MapChangeEvent<K, V>>) -> Result<()> {
        self.inner.base.register(&self.inner.map_listeners, listener)
    }

    pub fn remove_map_change_listener(&self, listener: &Listener<MapChangeEvent<K, V>>) {
        self.inner.base.unregister(&self.inner.map_listeners, listener);
    }
}

impl<K, V> Observable for WritableMap<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: PartialEq + Clone + Send + Sync + 'static,
{
    fn base(&self) -> &ObservableBase {
        &self.inner.base
    }

    fn dispose(&self) -> Result<()> {
        if self.inner.base.begin_dispose()? {
            self.inner.map_listeners.clear();
            self.inner.base.finish_dispose();
        }
        Ok(())
    }
}

impl<K, V> ObservableMap<K, V> for WritableMap<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: PartialEq + Clone + Send + Sync + 'static,
{
    fn get(&self, key: &K) -> Result<Option<V>> {
        WritableMap::get(self, key)
    }

    fn contains_key(&self, key: &K) -> Result<bool> {
        WritableMap::contains_key(self, key)
    }

    fn len(&self) -> Result<usize> {
        WritableMap::len(self)
    }

    fn to_map(&self) -> Result<HashMap<K, V>> {
        WritableMap::to_map(self)
    }

    fn add_map_change_listener(&self, listener: Listener<MapChangeEvent<K, V>>) -> Result<()> {
        WritableMap::add_map_change_listener(self, listener)
    }

    fn remove_map_change_listener(&self, listener: &Listener<MapChangeEvent<K, V>>) {
        WritableMap::remove_map_change_listener(self, listener);
    }
}

impl<K, V> Clone for WritableMap<K, V>
where
    K: Eq + Hash,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V> fmt::Debug for WritableMap<K, V>
where
    K: Eq + Hash + fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WritableMap")
            .field("id", &self.inner.base.id())
            .field("entries", &*lock(&self.inner.entries))
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
