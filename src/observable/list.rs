// ============================================================================
// spark-observables - Writable List
// An ordered realm-confined list firing positional diffs
// ============================================================================

use std::fmt;
use std::sync::{Arc, Mutex};

use super::{ListChangeEvent, Observable, ObservableBase, ObservableList};
use crate::diff::{ListDiff, ListDiffEntry, compute_list_diff};
use crate::error::{ObservableError, Result};
use crate::listeners::{Listener, ListenerRegistry};
use crate::realm::{RealmRef, lock};

struct ListInner<T> {
    base: ObservableBase,
    items: Mutex<Vec<T>>,
    list_listeners: ListenerRegistry<Listener<ListChangeEvent<T>>>,
}

/// A mutable observable list.
///
/// Every mutation fires a [`ListDiff`] whose entries, replayed on the
/// previous contents, give the new contents.
///
/// # Example
///
/// ```
/// use std::sync::{Arc, Mutex};
/// use spark_observables::listeners::listener;
/// use spark_observables::observable::{ListChangeEvent, WritableList};
/// use spark_observables::realm::ThreadRealm;
///
/// let realm = ThreadRealm::current();
/// let list = WritableList::from_vec(&realm, vec!['a', 'b', 'c']);
///
/// let mirror = Arc::new(Mutex::new(list.to_vec().unwrap()));
/// let m = mirror.clone();
/// list.add_list_change_listener(listener(move |e: &ListChangeEvent<char>| {
///     e.diff.apply_to(&mut m.lock().unwrap());
/// }))
/// .unwrap();
///
/// list.set_all(vec!['b', 'c', 'a']).unwrap();
/// list.push('d').unwrap();
/// assert_eq!(*mirror.lock().unwrap(), list.to_vec().unwrap());
/// ```
pub struct WritableList<T> {
    inner: Arc<ListInner<T>>,
}

impl<T> WritableList<T>
where
    T: PartialEq + Clone + Send + Sync + 'static,
{
    /// Create an empty list.
    pub fn new(realm: &RealmRef) -> Self {
        Self::from_vec(realm, Vec::new())
    }

    /// Create a list with initial contents.
    pub fn from_vec(realm: &RealmRef, items: Vec<T>) -> Self {
        Self {
            inner: Arc::new(ListInner {
                base: ObservableBase::new(realm),
                items: Mutex::new(items),
                list_listeners: ListenerRegistry::new(),
            }),
        }
    }

    fn fire(&self, entries: Vec<ListDiffEntry<T>>) {
        if entries.is_empty() {
            return;
        }
        self.inner
            .base
            .fire_diff(&self.inner.list_listeners, ListDiff::new(entries));
    }

    // =========================================================================
    // READS
    // =========================================================================

    pub fn get(&self, index: usize) -> Result<T> {
        self.inner.base.record_read()?;
        let items = lock(&self.inner.items);
        items
            .get(index)
            .cloned()
            .ok_or(ObservableError::IndexOutOfBounds {
                index,
                len: items.len(),
            })
    }

    pub fn len(&self) -> Result<usize> {
        self.inner.base.record_read()?;
        Ok(lock(&self.inner.items).len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn to_vec(&self) -> Result<Vec<T>> {
        self.inner.base.record_read()?;
        Ok(lock(&self.inner.items).clone())
    }

    pub fn contains(&self, item: &T) -> Result<bool> {
        self.inner.base.record_read()?;
        Ok(lock(&self.inner.items).contains(item))
    }

    pub fn index_of(&self, item: &T) -> Result<Option<usize>> {
        self.inner.base.record_read()?;
        Ok(lock(&self.inner.items).iter().position(|x| x == item))
    }

    /// Access the contents with a closure (avoids cloning).
    pub fn with<R>(&self, f: impl FnOnce(&[T]) -> R) -> Result<R> {
        self.inner.base.record_read()?;
        Ok(f(&lock(&self.inner.items)))
    }

    // =========================================================================
    // MUTATIONS
    // =========================================================================

    /// Append an element.
    pub fn push(&self, item: T) -> Result<()> {
        self.inner.base.check_access()?;
        let entry = {
            let mut items = lock(&self.inner.items);
            items.push(item.clone());
            ListDiffEntry::addition(items.len() - 1, item)
        };
        self.fire(vec![entry]);
        Ok(())
    }

    /// Insert an element at `index`, shifting later elements right.
    pub fn insert(&self, index: usize, item: T) -> Result<()> {
        self.inner.base.check_access()?;
        {
            let mut items = lock(&self.inner.items);
            if index > items.len() {
                return Err(ObservableError::IndexOutOfBounds {
                    index,
                    len: items.len(),
                });
            }
            items.insert(index, item.clone());
        }
        self.fire(vec![ListDiffEntry::addition(index, item)]);
        Ok(())
    }

    /// Remove and return the element at `index`.
    pub fn remove(&self, index: usize) -> Result<T> {
        self.inner.base.check_access()?;
        let removed = {
            let mut items = lock(&self.inner.items);
            if index >= items.len() {
                return Err(ObservableError::IndexOutOfBounds {
                    index,
                    len: items.len(),
                });
            }
            items.remove(index)
        };
        self.fire(vec![ListDiffEntry::removal(index, removed.clone())]);
        Ok(removed)
    }

    /// Remove the first element equal to `item`. Returns true if found.
    pub fn remove_element(&self, item: &T) -> Result<bool> {
        self.inner.base.check_access()?;
        let entry = {
            let mut items = lock(&self.inner.items);
            let Some(index) = items.iter().position(|x| x == item) else {
                return Ok(false);
            };
            ListDiffEntry::removal(index, items.remove(index))
        };
        self.fire(vec![entry]);
        Ok(true)
    }

    /// Replace the element at `index`, returning the previous one.
    ///
    /// Replacing an element with an equal one fires nothing.
    pub fn set(&self, index: usize, item: T) -> Result<T> {
        self.inner.base.check_access()?;
        let old = {
            let mut items = lock(&self.inner.items);
            let len = items.len();
            let Some(slot) = items.get_mut(index) else {
                return Err(ObservableError::IndexOutOfBounds { index, len });
            };
            std::mem::replace(slot, item.clone())
        };
        if old != item {
            self.fire(vec![
                ListDiffEntry::removal(index, old.clone()),
                ListDiffEntry::addition(index, item),
            ]);
        }
        Ok(old)
    }

    /// Move the element at `from` to `to`, returning it.
    pub fn move_element(&self, from: usize, to: usize) -> Result<T> {
        self.inner.base.check_access()?;
        let moved = {
            let mut items = lock(&self.inner.items);
            let len = items.len();
            for index in [from, to] {
                if index >= len {
                    return Err(ObservableError::IndexOutOfBounds { index, len });
                }
            }
            let moved = items.remove(from);
            items.insert(to, moved.clone());
            moved
        };
        if from != to {
            self.fire(vec![
                ListDiffEntry::removal(from, moved.clone()),
                ListDiffEntry::addition(to, moved.clone()),
            ]);
        }
        Ok(moved)
    }

    /// Append every element of `iter`. Returns true if anything was added.
    pub fn extend(&self, iter: impl IntoIterator<Item = T>) -> Result<bool> {
        self.inner.base.check_access()?;
        let entries: Vec<_> = {
            let mut items = lock(&self.inner.items);
            iter.into_iter()
                .map(|item| {
                    items.push(item.clone());
                    ListDiffEntry::addition(items.len() - 1, item)
                })
                .collect()
        };
        let changed = !entries.is_empty();
        self.fire(entries);
        Ok(changed)
    }

    /// Remove every element.
    pub fn clear(&self) -> Result<()> {
        self.inner.base.check_access()?;
        let removed = std::mem::take(&mut *lock(&self.inner.items));
        self.fire(
            removed
                .into_iter()
                .map(|item| ListDiffEntry::removal(0, item))
                .collect(),
        );
        Ok(())
    }

    /// Replace the whole contents, firing the reconciled diff.
    pub fn set_all(&self, items: Vec<T>) -> Result<()> {
        self.inner.base.check_access()?;
        let diff = {
            let mut current = lock(&self.inner.items);
            let diff = compute_list_diff(&current, &items);
            *current = items;
            diff
        };
        if !diff.is_empty() {
            self.inner.base.fire_diff(&self.inner.list_listeners, diff);
        }
        Ok(())
    }

    /// Mark the list stale or fresh. See [`WritableValue::set_stale`].
    ///
    /// [`WritableValue::set_stale`]: super::WritableValue::set_stale
    pub fn set_stale(&self, stale: bool) -> Result<()> {
        let base = &self.inner.base;
        base.check_access()?;
        if base.mark_stale(stale) {
            if stale {
                base.fire_stale();
            } else {
                base.fire_diff(&self.inner.list_listeners, ListDiff::empty());
            }
        }
        Ok(())
    }

    pub fn add_list_change_listener(&self, listener: Listener<ListChangeEvent<T>>) -> Result<()> {
        self.inner.base.register(&self.inner.list_listeners, listener)
    }

    pub fn remove_list_change_listener(&self, listener: &Listener<ListChangeEvent<T>>) {
        self.inner
            .base
            .unregister(&self.inner.list_listeners, listener);
    }
}

impl<T> Observable for WritableList<T>
where
    T: PartialEq + Clone + Send + Sync + 'static,
{
    fn base(&self) -> &ObservableBase {
        &self.inner.base
    }

    fn dispose(&self) -> Result<()> {
        if self.inner.base.begin_dispose()? {
            self.inner.list_listeners.clear();
            self.inner.base.finish_dispose();
        }
        Ok(())
    }
}

impl<T> ObservableList<T> for WritableList<T>
where
    T: PartialEq + Clone + Send + Sync + 'static,
{
    fn get(&self, index: usize) -> Result<T> {
        WritableList::get(self, index)
    }

    fn len(&self) -> Result<usize> {
        WritableList::len(self)
    }

    fn to_vec(&self) -> Result<Vec<T>> {
        WritableList::to_vec(self)
    }

    fn add_list_change_listener(&self, listener: Listener<ListChangeEvent<T>>) -> Result<()> {
        WritableList::add_list_change_listener(self, listener)
    }

    fn remove_list_change_listener(&self, listener: &Listener<ListChangeEvent<T>>) {
        WritableList::remove_list_change_listener(self, listener);
    }
}

impl<T> Clone for WritableList<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for WritableList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WritableList")
            .field("id", &self.inner.base.id())
            .field("items", &*lock(&self.inner.items))
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
