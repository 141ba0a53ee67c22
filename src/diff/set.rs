// ============================================================================
// spark-observables - Set Diff
// ============================================================================

use std::collections::HashSet;
use std::hash::Hash;

/// Elements added to and removed from a set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetDiff<T>
where
    T: Eq + Hash,
{
    additions: HashSet<T>,
    removals: HashSet<T>,
}

impl<T> SetDiff<T>
where
    T: Eq + Hash,
{
    /// Create a diff from explicit additions and removals.
    pub fn new(additions: HashSet<T>, removals: HashSet<T>) -> Self {
        Self {
            additions,
            removals,
        }
    }

    /// A diff that changes nothing.
    pub fn empty() -> Self {
        Self::new(HashSet::new(), HashSet::new())
    }

    /// Elements present after but not before.
    pub fn additions(&self) -> &HashSet<T> {
        &self.additions
    }

    /// Elements present before but not after.
    pub fn removals(&self) -> &HashSet<T> {
        &self.removals
    }

    /// Returns true if nothing was added or removed.
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.removals.is_empty()
    }

    /// Split into `(additions, removals)`.
    pub fn into_parts(self) -> (HashSet<T>, HashSet<T>) {
        (self.additions, self.removals)
    }
}

impl<T> SetDiff<T>
where
    T: Eq + Hash + Clone,
{
    /// Apply this diff to `set` in place.
    pub fn apply_to(&self, set: &mut HashSet<T>) {
        for item in &self.removals {
            set.remove(item);
        }
        set.extend(self.additions.iter().cloned());
    }
}

/// Compute `new - old` as additions and `old - new` as removals.
///
/// # Example
///
/// ```
/// use std::collections::HashSet;
/// use spark_observables::diff::compute_set_diff;
///
/// let old: HashSet<_> = [1, 2].into_iter().collect();
/// let new: HashSet<_> = [2, 3].into_iter().collect();
/// let diff = compute_set_diff(&old, &new);
///
/// assert!(diff.additions().contains(&3));
/// assert!(diff.removals().contains(&1));
/// ```
pub fn compute_set_diff<T>(old: &HashSet<T>, new: &HashSet<T>) -> SetDiff<T>
where
    T: Eq + Hash + Clone,
{
    let additions = new.difference(old).cloned().collect();
    let removals = old.difference(new).cloned().collect();
    SetDiff::new(additions, removals)
}

// =============================================================================
// TESTS
// =============================================================================
