// ============================================================================
// spark-observables - List Diff
// Ordered insert/remove reconciliation with move detection
// ============================================================================
//
// The reconciliation walks the new list left to right against a scratch copy
// of the old list. After step `i` the scratch list agrees with the new list on
// positions `0..=i`; every edit made to the scratch list is recorded as an
// entry, so replaying the entries on the old list yields the new list.
//
// When the element at `i` is wrong but both it and the wanted element exist
// further on, one of them has to move. The choice compares where the old
// element is wanted in the new list with where the new element sits in the
// old list, and moves the old element only when its target lies strictly
// further right. Consumers animate from this shape, so the comparison is
// fixed.
// ============================================================================

use std::any::{Any, type_name};
use std::fmt;
use std::sync::{Mutex, OnceLock};

use crate::error::{ObservableError, Result};
use crate::realm::lock;

// =============================================================================
// ENTRIES
// =============================================================================

/// A single insertion or removal at a position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListDiffEntry<T> {
    position: usize,
    is_addition: bool,
    element: T,
}

impl<T> ListDiffEntry<T> {
    /// An insertion of `element` at `position`.
    pub fn addition(position: usize, element: T) -> Self {
        Self {
            position,
            is_addition: true,
            element,
        }
    }

    /// A removal of `element` from `position`.
    pub fn removal(position: usize, element: T) -> Self {
        Self {
            position,
            is_addition: false,
            element,
        }
    }

    /// Index in the list as it stands when this entry is applied.
    pub fn position(&self) -> usize {
        self.position
    }

    /// True for an insertion, false for a removal.
    pub fn is_addition(&self) -> bool {
        self.is_addition
    }

    /// The element inserted or removed.
    pub fn element(&self) -> &T {
        &self.element
    }
}

// =============================================================================
// VISITOR
// =============================================================================

/// Receives the entries of a [`ListDiff`] with moves and replacements folded.
///
/// A removal directly followed by an addition of an equal element is reported
/// as a move; a removal directly followed by an addition at the same position
/// is reported as a replacement. The defaults split both back into a removal
/// and an addition.
pub trait ListDiffVisitor<T> {
    fn handle_add(&mut self, index: usize, element: &T);

    fn handle_remove(&mut self, index: usize, element: &T);

    fn handle_move(&mut self, old_index: usize, new_index: usize, element: &T) {
        self.handle_remove(old_index, element);
        self.handle_add(new_index, element);
    }

    fn handle_replace(&mut self, index: usize, old_element: &T, new_element: &T) {
        self.handle_remove(index, old_element);
        self.handle_add(index, new_element);
    }
}

// =============================================================================
// LIST DIFF
// =============================================================================

/// An ordered sequence of list edits.
///
/// A diff is either built from known entries or created lazily from two
/// snapshots, in which case reconciliation runs on first access and the
/// result is kept.
pub struct ListDiff<T> {
    entries: OnceLock<Vec<ListDiffEntry<T>>>,
    pending: Mutex<Option<(Vec<T>, Vec<T>)>>,
}

impl<T> ListDiff<T> {
    /// A diff made of the given entries.
    pub fn new(entries: Vec<ListDiffEntry<T>>) -> Self {
        Self {
            entries: OnceLock::from(entries),
            pending: Mutex::new(None),
        }
    }

    /// A diff that changes nothing.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// A diff between `old` and `new` that is only computed when read.
    pub fn lazy(old: Vec<T>, new: Vec<T>) -> Self {
        Self {
            entries: OnceLock::new(),
            pending: Mutex::new(Some((old, new))),
        }
    }

    /// Returns true once the entries are known.
    pub fn is_computed(&self) -> bool {
        self.entries.get().is_some()
    }
}

impl<T> ListDiff<T>
where
    T: PartialEq + Clone,
{
    /// The entries, computing them first if this diff is lazy.
    pub fn entries(&self) -> &[ListDiffEntry<T>] {
        self.entries.get_or_init(|| {
            let (old, new) = lock(&self.pending).take().unwrap_or_default();
            reconcile(old, &new)
        })
    }

    /// Returns true if the diff has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Replay every entry against `list`.
    pub fn apply_to(&self, list: &mut Vec<T>) {
        for entry in self.entries() {
            if entry.is_addition {
                list.insert(entry.position, entry.element.clone());
            } else {
                list.remove(entry.position);
            }
        }
    }

    /// Replay the entries on a copy of `list` and return the result.
    pub fn simulate_on(&self, list: &[T]) -> Vec<T> {
        let mut copy = list.to_vec();
        self.apply_to(&mut copy);
        copy
    }

    /// Walk the entries, folding adjacent remove/add pairs into moves and
    /// replacements.
    pub fn accept<V>(&self, visitor: &mut V)
    where
        V: ListDiffVisitor<T> + ?Sized,
    {
        let entries = self.entries();
        let mut i = 0;
        while i < entries.len() {
            let entry = &entries[i];
            if !entry.is_addition {
                if let Some(next) = entries.get(i + 1).filter(|next| next.is_addition) {
                    if next.element == entry.element {
                        visitor.handle_move(entry.position, next.position, &entry.element);
                        i += 2;
                        continue;
                    }
                    if next.position == entry.position {
                        visitor.handle_replace(entry.position, &entry.element, &next.element);
                        i += 2;
                        continue;
                    }
                }
                visitor.handle_remove(entry.position, &entry.element);
            } else {
                visitor.handle_add(entry.position, &entry.element);
            }
            i += 1;
        }
    }
}

impl<T> Clone for ListDiff<T>
where
    T: PartialEq + Clone,
{
    fn clone(&self) -> Self {
        Self::new(self.entries().to_vec())
    }
}

impl<T> PartialEq for ListDiff<T>
where
    T: PartialEq + Clone,
{
    fn eq(&self, other: &Self) -> bool {
        self.entries() == other.entries()
    }
}

impl<T> fmt::Debug for ListDiff<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.entries.get() {
            Some(entries) => f.debug_struct("ListDiff").field("entries", entries).finish(),
            None => f.debug_struct("ListDiff").field("entries", &"<lazy>").finish(),
        }
    }
}

// =============================================================================
// COMPUTATION
// =============================================================================

/// Compute the edits that turn `old` into `new`.
///
/// # Example
///
/// ```
/// use spark_observables::diff::compute_list_diff;
///
/// let old = vec!["A", "B", "C"];
/// let new = vec!["B", "C", "A"];
/// let diff = compute_list_diff(&old, &new);
///
/// assert_eq!(diff.simulate_on(&old), new);
/// ```
pub fn compute_list_diff<T>(old: &[T], new: &[T]) -> ListDiff<T>
where
    T: PartialEq + Clone,
{
    ListDiff::new(reconcile(old.to_vec(), new))
}

/// Like [`compute_list_diff`] for untyped elements that must all be `E`.
///
/// Both lists are copied into typed buffers first; the first element that is
/// not an `E` fails the whole computation with
/// [`ObservableError::TypeMismatch`].
///
/// # Example
///
/// ```
/// use std::any::Any;
/// use spark_observables::diff::compute_list_diff_cast;
///
/// let old: Vec<&dyn Any> = vec![&1i32, &2i32];
/// let new: Vec<&dyn Any> = vec![&2i32];
/// let diff = compute_list_diff_cast::<i32>(&old, &new).unwrap();
/// assert_eq!(diff.simulate_on(&[1, 2]), vec![2]);
///
/// let bad: Vec<&dyn Any> = vec![&"two"];
/// assert!(compute_list_diff_cast::<i32>(&old, &bad).is_err());
/// ```
pub fn compute_list_diff_cast<E>(old: &[&dyn Any], new: &[&dyn Any]) -> Result<ListDiff<E>>
where
    E: Any + PartialEq + Clone,
{
    let old = typed_copy::<E>(old)?;
    let new = typed_copy::<E>(new)?;
    Ok(ListDiff::new(reconcile(old, &new)))
}

fn typed_copy<E>(items: &[&dyn Any]) -> Result<Vec<E>>
where
    E: Any + Clone,
{
    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            item.downcast_ref::<E>()
                .cloned()
                .ok_or(ObservableError::TypeMismatch {
                    expected: type_name::<E>(),
                    index,
                })
        })
        .collect()
}

fn position_from<T: PartialEq>(list: &[T], value: &T, start: usize) -> Option<usize> {
    list[start..]
        .iter()
        .position(|item| item == value)
        .map(|offset| offset + start)
}

/// Reconcile `scratch` (a private copy of the old list) into `new`.
fn reconcile<T>(mut scratch: Vec<T>, new: &[T]) -> Vec<ListDiffEntry<T>>
where
    T: PartialEq + Clone,
{
    let mut entries = Vec::new();

    for (index, new_value) in new.iter().enumerate() {
        if scratch.len() <= index {
            entries.push(ListDiffEntry::addition(index, new_value.clone()));
            scratch.push(new_value.clone());
            continue;
        }

        loop {
            if scratch[index] == *new_value {
                break;
            }

            let Some(old_index_of_new_value) = position_from(&scratch, new_value, index) else {
                scratch.insert(index, new_value.clone());
                entries.push(ListDiffEntry::addition(index, new_value.clone()));
                break;
            };

            match position_from(new, &scratch[index], index) {
                None => {
                    // The old element is gone from the new list
                    let removed = scratch.remove(index);
                    entries.push(ListDiffEntry::removal(index, removed));
                }
                Some(new_index_of_old_value) if new_index_of_old_value > old_index_of_new_value => {
                    // Move the old element towards its target. The target may
                    // not exist yet; later insertions push it into place.
                    let moved = scratch.remove(index);
                    entries.push(ListDiffEntry::removal(index, moved.clone()));
                    let target = new_index_of_old_value.min(scratch.len());
                    scratch.insert(target, moved.clone());
                    entries.push(ListDiffEntry::addition(target, moved));
                }
                Some(_) => {
                    // Pull the wanted element back to this position
                    let moved = scratch.remove(old_index_of_new_value);
                    entries.push(ListDiffEntry::removal(old_index_of_new_value, moved.clone()));
                    scratch.insert(index, moved.clone());
                    entries.push(ListDiffEntry::addition(index, moved));
                    break;
                }
            }
        }
    }

    // Whatever is left past the end goes, back to front
    while scratch.len() > new.len() {
        let position = scratch.len() - 1;
        if let Some(removed) = scratch.pop() {
            entries.push(ListDiffEntry::removal(position, removed));
        }
    }

    entries
}

// =============================================================================
// TESTS
// =============================================================================
