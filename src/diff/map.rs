// ============================================================================
// spark-observables - Map Diff
// ============================================================================

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// Keys added, removed and changed between two maps, with the values needed
/// to describe each change.
///
/// `old_values` holds an entry for every removed and changed key,
/// `new_values` one for every added and changed key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapDiff<K, V>
where
    K: Eq + Hash,
{
    added_keys: HashSet<K>,
    removed_keys: HashSet<K>,
    changed_keys: HashSet<K>,
    old_values: HashMap<K, V>,
    new_values: HashMap<K, V>,
}

impl<K, V> MapDiff<K, V>
where
    K: Eq + Hash,
{
    /// A diff that changes nothing.
    pub fn empty() -> Self {
        Self {
            added_keys: HashSet::new(),
            removed_keys: HashSet::new(),
            changed_keys: HashSet::new(),
            old_values: HashMap::new(),
            new_values: HashMap::new(),
        }
    }

    /// Keys present only after the change.
    pub fn added_keys(&self) -> &HashSet<K> {
        &self.added_keys
    }

    /// Keys present only before the change.
    pub fn removed_keys(&self) -> &HashSet<K> {
        &self.removed_keys
    }

    /// Keys present on both sides with different values.
    pub fn changed_keys(&self) -> &HashSet<K> {
        &self.changed_keys
    }

    /// The value `key` had before the change (removed and changed keys).
    pub fn old_value(&self, key: &K) -> Option<&V> {
        self.old_values.get(key)
    }

    /// The value `key` has after the change (added and changed keys).
    pub fn new_value(&self, key: &K) -> Option<&V> {
        self.new_values.get(key)
    }

    /// Returns true if no key was added, removed or changed.
    pub fn is_empty(&self) -> bool {
        self.added_keys.is_empty() && self.removed_keys.is_empty() && self.changed_keys.is_empty()
    }
}

impl<K, V> MapDiff<K, V>
where
    K: Eq + Hash + Clone,
{
    /// A diff describing a single new entry.
    pub fn added(key: K, value: V) -> Self {
        let mut diff = Self::empty();
        diff.added_keys.insert(key.clone());
        diff.new_values.insert(key, value);
        diff
    }

    /// A diff describing a single removed entry.
    pub fn removed(key: K, value: V) -> Self {
        let mut diff = Self::empty();
        diff.removed_keys.insert(key.clone());
        diff.old_values.insert(key, value);
        diff
    }

    /// A diff describing a single entry whose value changed.
    pub fn changed(key: K, old: V, new: V) -> Self {
        let mut diff = Self::empty();
        diff.changed_keys.insert(key.clone());
        diff.old_values.insert(key.clone(), old);
        diff.new_values.insert(key, new);
        diff
    }
}

impl<K, V> MapDiff<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Apply this diff to `map` in place.
    pub fn apply_to(&self, map: &mut HashMap<K, V>) {
        for key in &self.removed_keys {
            map.remove(key);
        }
        for key in self.added_keys.iter().chain(&self.changed_keys) {
            if let Some(value) = self.new_values.get(key) {
                map.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Classify every key of `old` and `new` as added, removed or changed.
///
/// Keys present in both maps with equal values are left out entirely.
///
/// # Example
///
/// ```
/// use std::collections::HashMap;
/// use spark_observables::diff::compute_map_diff;
///
/// let old = HashMap::from([("k1", 1), ("k2", 2)]);
/// let new = HashMap::from([("k1", 1), ("k2", 3), ("k3", 4)]);
/// let diff = compute_map_diff(&old, &new);
///
/// assert!(diff.added_keys().contains("k3"));
/// assert!(diff.removed_keys().is_empty());
/// assert!(diff.changed_keys().contains("k2"));
/// assert_eq!(diff.old_value(&"k2"), Some(&2));
/// assert_eq!(diff.new_value(&"k2"), Some(&3));
/// ```
pub fn compute_map_diff<K, V>(old: &HashMap<K, V>, new: &HashMap<K, V>) -> MapDiff<K, V>
where
    K: Eq + Hash + Clone,
    V: PartialEq + Clone,
{
    let mut diff = MapDiff::empty();

    for (key, old_value) in old {
        match new.get(key) {
            None => {
                diff.removed_keys.insert(key.clone());
                diff.old_values.insert(key.clone(), old_value.clone());
            }
            Some(new_value) if new_value != old_value => {
                diff.changed_keys.insert(key.clone());
                diff.old_values.insert(key.clone(), old_value.clone());
                diff.new_values.insert(key.clone(), new_value.clone());
            }
            Some(_) => {}
        }
    }

    for (key, new_value) in new {
        if !old.contains_key(key) {
            diff.added_keys.insert(key.clone());
            diff.new_values.insert(key.clone(), new_value.clone());
        }
    }

    diff
}

// =============================================================================
// TESTS
// =============================================================================
