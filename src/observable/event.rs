// ============================================================================
// spark-observables - Events
// One strongly-typed event per listener channel
// ============================================================================

use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::diff::{ListDiff, MapDiff, SetDiff, ValueDiff};

/// Process-unique identity of an observable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObservableId(u64);

impl ObservableId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw id.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObservableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Something about the observable changed; re-read it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeEvent {
    pub source: ObservableId,
}

/// The observable became stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaleEvent {
    pub source: ObservableId,
}

/// The observable was disposed. Sent once, as the last event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisposeEvent {
    pub source: ObservableId,
}

/// A structural change with its diff.
#[derive(Debug, Clone)]
pub struct DiffEvent<D> {
    pub source: ObservableId,
    pub diff: D,
}

pub type ValueChangeEvent<T> = DiffEvent<ValueDiff<T>>;
pub type ListChangeEvent<T> = DiffEvent<ListDiff<T>>;
pub type SetChangeEvent<T> = DiffEvent<SetDiff<T>>;
pub type MapChangeEvent<K, V> = DiffEvent<MapDiff<K, V>>;

/// A proposed value change that listeners may veto before it commits.
#[derive(Debug)]
pub struct ValueChangingEvent<T> {
    pub source: ObservableId,
    pub diff: ValueDiff<T>,
    vetoed: Cell<bool>,
}

impl<T> ValueChangingEvent<T> {
    pub(crate) fn new(source: ObservableId, diff: ValueDiff<T>) -> Self {
        Self {
            source,
            diff,
            vetoed: Cell::new(false),
        }
    }

    /// Reject the proposed change.
    pub fn veto(&self) {
        self.vetoed.set(true);
    }

    /// Returns true if any listener vetoed.
    pub fn is_vetoed(&self) -> bool {
        self.vetoed.get()
    }
}
