// ============================================================================
// spark-observables - Bidirectional Map
// A writable map that can also answer "which keys hold this value"
// ============================================================================

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use crate::diff::MapDiff;
use crate::error::Result;
use crate::listeners::{Listener, ListenerRegistry, listener};
use crate::observable::{
    MapChangeEvent, Observable, ObservableBase, ObservableMap, Observation, StaleEvent,
    WritableMap,
};
use crate::realm::{RealmRef, lock};

/// Keys sharing one value. Most values belong to a single key, so the set
/// is only allocated on the first collision.
#[derive(Debug, Clone, PartialEq, Eq)]
enum KeySet<K>
where
    K: Eq + Hash,
{
    Single(K),
    Many(HashSet<K>),
}

impl<K> KeySet<K>
where
    K: Eq + Hash + Clone,
{
    fn insert(&mut self, key: K) {
        match self {
            Self::Single(existing) if *existing == key => {}
            Self::Single(existing) => {
                *self = Self::Many(HashSet::from([existing.clone(), key]));
            }
            Self::Many(keys) => {
                keys.insert(key);
            }
        }
    }

    /// Remove `key`. Returns true when no key is left.
    fn remove(&mut self, key: &K) -> bool {
        match self {
            Self::Single(existing) => existing == key,
            Self::Many(keys) => {
                keys.remove(key);
                match keys.len() {
                    0 => true,
                    1 => {
                        if let Some(last) = keys.iter().next().cloned() {
                            *self = Self::Single(last);
                        }
                        false
                    }
                    _ => false,
                }
            }
        }
    }

    fn to_set(&self) -> HashSet<K> {
        match self {
            Self::Single(key) => HashSet::from([key.clone()]),
            Self::Many(keys) => keys.clone(),
        }
    }
}

type InverseIndex<K, V> = HashMap<V, KeySet<K>>;

fn index_insert<K, V>(index: &mut InverseIndex<K, V>, value: V, key: K)
where
    K: Eq + Hash + Clone,
    V: Eq + Hash,
{
    match index.get_mut(&value) {
        Some(keys) => keys.insert(key),
        None => {
            index.insert(value, KeySet::Single(key));
        }
    }
}

fn index_remove<K, V>(index: &mut InverseIndex<K, V>, value: &V, key: &K)
where
    K: Eq + Hash + Clone,
    V: Eq + Hash,
{
    if index.get_mut(value).is_some_and(|keys| keys.remove(key)) {
        index.remove(value);
    }
}

struct Forwarding<K, V>
where
    K: Eq + Hash,
{
    /// `None` while the wrapped map could not be read.
    index: Option<InverseIndex<K, V>>,
    on_diff: Listener<MapChangeEvent<K, V>>,
    on_stale: Listener<StaleEvent>,
}

struct BidiInner<K, V>
where
    K: Eq + Hash,
{
    base: ObservableBase,
    map: WritableMap<K, V>,
    map_listeners: ListenerRegistry<Listener<MapChangeEvent<K, V>>>,
    forwarding: Mutex<Option<Forwarding<K, V>>>,
}

/// A [`WritableMap`] with an inverse value-to-keys index.
///
/// The index is built when the first listener subscribes and kept in sync
/// with every diff of the wrapped map. Unobserved, `keys_for` scans.
///
/// # Example
///
/// ```
/// use std::collections::HashSet;
/// use spark_observables::combinators::BidiObservableMap;
/// use spark_observables::realm::ThreadRealm;
///
/// let realm = ThreadRealm::current();
/// let owners = BidiObservableMap::new(&realm);
/// owners.insert("laptop", "ada").unwrap();
/// owners.insert("phone", "ada").unwrap();
/// owners.insert("tablet", "bob").unwrap();
///
/// assert_eq!(owners.keys_for(&"ada").unwrap(), HashSet::from(["laptop", "phone"]));
/// assert!(owners.contains_value(&"bob").unwrap());
/// ```
pub struct BidiObservableMap<K, V>
where
    K: Eq + Hash,
{
    inner: Arc<BidiInner<K, V>>,
}

impl<K, V> BidiInner<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn on_observation(self: &Arc<Self>, observation: Observation) {
        match observation {
            Observation::FirstListenerAdded => self.start_forwarding(),
            Observation::LastListenerRemoved => self.stop_forwarding(),
        }
    }

    fn build_index(&self) -> Option<InverseIndex<K, V>> {
        match self.map.to_map() {
            Ok(entries) => {
                let mut index = HashMap::new();
                for (key, value) in entries {
                    index_insert(&mut index, value, key);
                }
                Some(index)
            }
            Err(err) => {
                tracing::warn!(observable = self.base.id().get(), %err, "bidi.index_unavailable");
                None
            }
        }
    }

    /// Forward the wrapped map's events, then index it.
    fn start_forwarding(self: &Arc<Self>) {
        if lock(&self.forwarding).is_some() {
            return;
        }
        let id = self.base.id().get();

        let weak = Arc::downgrade(self);
        let on_diff = listener(move |event: &MapChangeEvent<K, V>| {
            if let Some(bidi) = weak.upgrade() {
                bidi.forward_diff(&event.diff);
            }
        });
        let weak = Arc::downgrade(self);
        let on_stale = listener(move |_: &StaleEvent| {
            let Some(bidi) = weak.upgrade() else {
                return;
            };
            if bidi.base.mark_stale(true) {
                bidi.base.fire_stale();
            }
        });

        // Only a disposed map refuses listeners, and it never changes again
        if let Err(err) = self.map.add_map_change_listener(on_diff.clone()) {
            tracing::debug!(observable = id, %err, "bidi.map_disposed");
            return;
        }
        if let Err(err) = self.map.add_stale_listener(on_stale.clone()) {
            tracing::debug!(observable = id, %err, "bidi.map_disposed");
        }
        self.base.mark_stale(matches!(self.map.is_stale(), Ok(true)));

        let index = self.build_index();
        tracing::debug!(
            observable = id,
            values = index.as_ref().map_or(0, HashMap::len),
            "bidi.index_built"
        );
        *lock(&self.forwarding) = Some(Forwarding {
            index,
            on_diff,
            on_stale,
        });
    }

    fn stop_forwarding(&self) {
        let Some(forwarding) = lock(&self.forwarding).take() else {
            return;
        };
        self.map.remove_map_change_listener(&forwarding.on_diff);
        self.map.remove_stale_listener(&forwarding.on_stale);
        self.base.mark_stale(false);
    }

    fn forward_diff(&self, diff: &MapDiff<K, V>) {
        {
            let mut forwarding = lock(&self.forwarding);
            let Some(forwarding) = forwarding.as_mut() else {
                return;
            };
            match forwarding.index.as_mut() {
                Some(index) => apply_to_index(index, diff),
                // The map already holds the post-diff state
                None => {
                    let rebuilt = self.build_index();
                    forwarding.index = rebuilt;
                }
            }
        }

        // An empty diff from the wrapped map means it became fresh again
        if diff.is_empty() {
            self.base.mark_stale(false);
        }
        self.base.fire_diff(&self.map_listeners, diff.clone());
    }
}

fn apply_to_index<K, V>(index: &mut InverseIndex<K, V>, diff: &MapDiff<K, V>)
where
    K: Eq + Hash + Clone,
    V: Eq + Hash + Clone,
{
    for key in diff.removed_keys().iter().chain(diff.changed_keys()) {
        if let Some(old) = diff.old_value(key) {
            index_remove(index, old, key);
        }
    }
    for key in diff.added_keys().iter().chain(diff.changed_keys()) {
        if let Some(new) = diff.new_value(key) {
            index_insert(index, new.clone(), key.clone());
        }
    }
}

impl<K, V> BidiObservableMap<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Eq + Hash + Clone + Send + Sync + 'static,
{
    pub fn new(realm: &RealmRef) -> Self {
        Self::from_map(realm, HashMap::new())
    }

    pub fn from_map(realm: &RealmRef, entries: HashMap<K, V>) -> Self {
        Self::wrap(realm, WritableMap::from_map(realm, entries))
    }

    /// Decorate an existing map. The bidi map takes over disposing it.
    pub fn wrap(realm: &RealmRef, map: WritableMap<K, V>) -> Self {
        let inner = Arc::new(BidiInner {
            base: ObservableBase::new(realm),
            map,
            map_listeners: ListenerRegistry::new(),
            forwarding: Mutex::new(None),
        });

        let weak = Arc::downgrade(&inner);
        inner.base.set_hook(Arc::new(move |observation: Observation| {
            if let Some(inner) = weak.upgrade() {
                inner.on_observation(observation);
            }
        }));

        Self { inner }
    }

    // =========================================================================
    // READS
    // =========================================================================

    pub fn get(&self, key: &K) -> Result<Option<V>> {
        self.inner.base.check_live()?;
        self.inner.map.get(key)
    }

    pub fn contains_key(&self, key: &K) -> Result<bool> {
        self.inner.base.check_live()?;
        self.inner.map.contains_key(key)
    }

    pub fn len(&self) -> Result<usize> {
        self.inner.base.check_live()?;
        self.inner.map.len()
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn to_map(&self) -> Result<HashMap<K, V>> {
        self.inner.base.check_live()?;
        self.inner.map.to_map()
    }

    /// Every key currently mapped to `value`.
    pub fn keys_for(&self, value: &V) -> Result<HashSet<K>> {
        self.inner.base.record_read()?;
        let indexed = lock(&self.inner.forwarding)
            .as_ref()
            .and_then(|f| f.index.as_ref())
            .map(|index| index.get(value).map(KeySet::to_set).unwrap_or_default());
        match indexed {
            Some(keys) => Ok(keys),
            None => Ok(self
                .inner
                .map
                .to_map()?
                .into_iter()
                .filter(|(_, v)| v == value)
                .map(|(k, _)| k)
                .collect()),
        }
    }

    pub fn contains_value(&self, value: &V) -> Result<bool> {
        Ok(!self.keys_for(value)?.is_empty())
    }

    // =========================================================================
    // MUTATIONS
    // =========================================================================

    pub fn insert(&self, key: K, value: V) -> Result<Option<V>> {
        self.inner.base.check_live()?;
        self.inner.map.insert(key, value)
    }

    pub fn remove(&self, key: &K) -> Result<Option<V>> {
        self.inner.base.check_live()?;
        self.inner.map.remove(key)
    }

    pub fn extend(&self, iter: impl IntoIterator<Item = (K, V)>) -> Result<()> {
        self.inner.base.check_live()?;
        self.inner.map.extend(iter)
    }

    pub fn clear(&self) -> Result<()> {
        self.inner.base.check_live()?;
        self.inner.map.clear()
    }

    pub fn set_all(&self, entries: HashMap<K, V>) -> Result<()> {
        self.inner.base.check_live()?;
        self.inner.map.set_all(entries)
    }

    pub fn set_stale(&self, stale: bool) -> Result<()> {
        self.inner.base.check_live()?;
        self.inner.map.set_stale(stale)
    }

    pub fn add_map_change_listener(&self, listener: Listener<MapChangeEvent<K, V>>) -> Result<()> {
        self.inner.base.register(&self.inner.map_listeners, listener)
    }

    pub fn remove_map_change_listener(&self, listener: &Listener<MapChangeEvent<K, V>>) {
        self.inner.base.unregister(&self.inner.map_listeners, listener);
    }
}

impl<K, V> Observable for BidiObservableMap<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn base(&self) -> &ObservableBase {
        &self.inner.base
    }

    fn is_stale(&self) -> Result<bool> {
        self.inner.base.check_live()?;
        self.inner.map.is_stale()
    }

    fn dispose(&self) -> Result<()> {
        if self.inner.base.begin_dispose()? {
            self.inner.stop_forwarding();
            self.inner.map.dispose()?;
            self.inner.map_listeners.clear();
            self.inner.base.finish_dispose();
        }
        Ok(())
    }
}

impl<K, V> ObservableMap<K, V> for BidiObservableMap<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn get(&self, key: &K) -> Result<Option<V>> {
        BidiObservableMap::get(self, key)
    }

    fn contains_key(&self, key: &K) -> Result<bool> {
        BidiObservableMap::contains_key(self, key)
    }

    fn len(&self) -> Result<usize> {
        BidiObservableMap::len(self)
    }

    fn to_map(&self) -> Result<HashMap<K, V>> {
        BidiObservableMap::to_map(self)
    }

    fn add_map_change_listener(&self, listener: Listener<MapChangeEvent<K, V>>) -> Result<()> {
        BidiObservableMap::add_map_change_listener(self, listener)
    }

    fn remove_map_change_listener(&self, listener: &Listener<MapChangeEvent<K, V>>) {
        BidiObservableMap::remove_map_change_listener(self, listener);
    }
}

impl<K, V> Clone for BidiObservableMap<K, V>
where
    K: Eq + Hash,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V> fmt::Debug for BidiObservableMap<K, V>
where
    K: Eq + Hash + fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BidiObservableMap")
            .field("id", &self.inner.base.id())
            .field("map", &self.inner.map)
            .field("indexed", &lock(&self.inner.forwarding).is_some())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
