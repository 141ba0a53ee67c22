// ============================================================================
// spark-observables - Listener Registry
// Copy-on-write listener collection with snapshot-based notification
// ============================================================================
//
// Writers (add/remove) replace the backing vector wholesale; readers grab the
// current `Arc` and iterate it without holding any lock. A snapshot taken for
// one notification therefore never changes underneath the dispatch loop, even
// if listeners are registered or removed from another thread meanwhile.
// ============================================================================

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// A listener for events of type `E`.
pub type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Wrap a closure as a [`Listener`].
///
/// Keep the returned handle around if the listener should be removed later;
/// removal matches by identity.
///
/// # Example
///
/// ```
/// use spark_observables::listeners::{listener, Listener};
///
/// let on_change: Listener<i32> = listener(|n: &i32| println!("got {n}"));
/// on_change(&7);
/// ```
pub fn listener<E, F>(f: F) -> Listener<E>
where
    F: Fn(&E) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// A frozen view of the listeners registered at some point in time.
pub type Snapshot<L> = Arc<Vec<L>>;

// =============================================================================
// EQUALITY MODES
// =============================================================================

/// Identity comparison for listener handles.
pub trait SameListener {
    /// Returns true when both handles refer to the same listener object.
    fn same_listener(&self, other: &Self) -> bool;
}

impl<T: ?Sized> SameListener for Arc<T> {
    fn same_listener(&self, other: &Self) -> bool {
        // Compare data pointers only; vtables may differ across codegen units
        Arc::as_ptr(self) as *const () == Arc::as_ptr(other) as *const ()
    }
}

/// How a registry decides that two listeners are duplicates.
pub enum ListenerEquality<L> {
    /// Same object (pointer identity).
    Identity,
    /// Caller-supplied structural equality.
    Value(fn(&L, &L) -> bool),
}

impl<L> Clone for ListenerEquality<L> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<L> Copy for ListenerEquality<L> {}

impl<L> fmt::Debug for ListenerEquality<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identity => f.write_str("Identity"),
            Self::Value(_) => f.write_str("Value"),
        }
    }
}

// =============================================================================
// LISTENER REGISTRY
// =============================================================================

/// Ordered, de-duplicated, copy-on-write set of listeners.
///
/// # Example
///
/// ```
/// use spark_observables::listeners::{listener, Listener, ListenerRegistry};
///
/// let registry: ListenerRegistry<Listener<u8>> = ListenerRegistry::new();
/// let a = listener(|_: &u8| {});
/// let b = listener(|_: &u8| {});
///
/// registry.add(a.clone());
/// registry.add(b.clone());
/// let snapshot = registry.snapshot();
///
/// registry.remove(&a);
/// assert_eq!(snapshot.len(), 2);
/// assert_eq!(registry.len(), 1);
/// ```
pub struct ListenerRegistry<L> {
    listeners: RwLock<Snapshot<L>>,
    equality: ListenerEquality<L>,
}

impl<L> ListenerRegistry<L>
where
    L: Clone + SameListener,
{
    /// Create an empty registry that de-duplicates by identity.
    pub fn new() -> Self {
        Self::with_equality(ListenerEquality::Identity)
    }
}

impl<L> ListenerRegistry<L>
where
    L: Clone + SameListener,
{
    /// Create an empty registry with the given duplicate detection.
    pub fn with_equality(equality: ListenerEquality<L>) -> Self {
        Self {
            listeners: RwLock::new(Arc::new(Vec::new())),
            equality,
        }
    }

    fn matches(&self, a: &L, b: &L) -> bool {
        match self.equality {
            ListenerEquality::Identity => a.same_listener(b),
            ListenerEquality::Value(eq) => eq(a, b),
        }
    }

    /// Append `listener` unless an equal one is already registered.
    ///
    /// Returns true if the listener was added.
    pub fn add(&self, listener: L) -> bool {
        let mut guard = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if guard.iter().any(|existing| self.matches(existing, &listener)) {
            return false;
        }

        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push(listener);
        *guard = Arc::new(next);
        true
    }

    /// Remove the first listener equal to `listener`.
    ///
    /// Returns true if something was removed.
    pub fn remove(&self, listener: &L) -> bool {
        let mut guard = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let Some(pos) = guard.iter().position(|existing| self.matches(existing, listener)) else {
            return false;
        };

        let mut next = Vec::with_capacity(guard.len() - 1);
        next.extend(guard[..pos].iter().cloned());
        next.extend(guard[pos + 1..].iter().cloned());
        *guard = Arc::new(next);
        true
    }

    /// The current listeners. The returned sequence never changes.
    pub fn snapshot(&self) -> Snapshot<L> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drop every listener, returning what was registered.
    pub fn clear(&self) -> Snapshot<L> {
        let mut guard = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, Arc::new(Vec::new()))
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true if no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<L> Default for ListenerRegistry<L>
where
    L: Clone + SameListener,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<L> fmt::Debug for ListenerRegistry<L>
where
    L: Clone + SameListener,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("len", &self.len())
            .field("equality", &self.equality)
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
