// ============================================================================
// spark-observables - Observables
// Realm-confined containers that fire structural diffs to their listeners
// ============================================================================
//
// Every observable has four kinds of listeners:
//
// 1. Change listeners: something changed, no payload beyond the source
// 2. Typed diff listeners: the structural diff of the change
// 3. Stale listeners: the observable became stale
// 4. Dispose listeners: the observable is going away
//
// For one mutation, change listeners always run before diff listeners.
// ============================================================================

mod base;
mod event;
mod list;
mod map;
mod set;
mod value;

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

pub use base::ObservableBase;
pub(crate) use base::Observation;
pub use event::{
    ChangeEvent, DiffEvent, DisposeEvent, ListChangeEvent, MapChangeEvent, ObservableId,
    SetChangeEvent, StaleEvent, ValueChangeEvent, ValueChangingEvent,
};
pub use list::WritableList;
pub use map::WritableMap;
pub use set::WritableSet;
pub use value::{VetoableValue, WritableValue};

use crate::error::Result;
use crate::listeners::Listener;
use crate::realm::RealmRef;

// =============================================================================
// OBSERVABLE
// =============================================================================

/// Type-erased observable interface.
///
/// Listener registration and removal work from any thread. Everything else
/// must run inside the observable's realm.
pub trait Observable: Send + Sync {
    /// The shared base state.
    fn base(&self) -> &ObservableBase;

    /// Dispose the observable. Idempotent.
    fn dispose(&self) -> Result<()>;

    /// Returns true if the observable's current state is known to be outdated.
    fn is_stale(&self) -> Result<bool> {
        let base = self.base();
        base.check_access()?;
        Ok(base.is_marked_stale())
    }

    fn id(&self) -> ObservableId {
        self.base().id()
    }

    fn realm(&self) -> &RealmRef {
        self.base().realm()
    }

    fn is_disposed(&self) -> bool {
        self.base().is_disposed()
    }

    fn add_change_listener(&self, listener: Listener<ChangeEvent>) -> Result<()> {
        self.base().add_change_listener(listener)
    }

    fn remove_change_listener(&self, listener: &Listener<ChangeEvent>) {
        self.base().remove_change_listener(listener);
    }

    fn add_stale_listener(&self, listener: Listener<StaleEvent>) -> Result<()> {
        self.base().add_stale_listener(listener)
    }

    fn remove_stale_listener(&self, listener: &Listener<StaleEvent>) {
        self.base().remove_stale_listener(listener);
    }

    fn add_dispose_listener(&self, listener: Listener<DisposeEvent>) -> Result<()> {
        self.base().add_dispose_listener(listener)
    }

    fn remove_dispose_listener(&self, listener: &Listener<DisposeEvent>) {
        self.base().remove_dispose_listener(listener);
    }
}

// =============================================================================
// TYPED READ INTERFACES
// =============================================================================

/// An observable single value.
pub trait ObservableValue<T>: Observable {
    fn get(&self) -> Result<T>;

    fn add_value_change_listener(&self, listener: Listener<ValueChangeEvent<T>>) -> Result<()>;

    fn remove_value_change_listener(&self, listener: &Listener<ValueChangeEvent<T>>);
}

/// An observable ordered list.
pub trait ObservableList<T>: Observable {
    fn get(&self, index: usize) -> Result<T>;

    fn len(&self) -> Result<usize>;

    fn to_vec(&self) -> Result<Vec<T>>;

    fn add_list_change_listener(&self, listener: Listener<ListChangeEvent<T>>) -> Result<()>;

    fn remove_list_change_listener(&self, listener: &Listener<ListChangeEvent<T>>);
}

/// An observable set.
pub trait ObservableSet<T>: Observable
where
    T: Eq + Hash,
{
    fn contains(&self, item: &T) -> Result<bool>;

    fn len(&self) -> Result<usize>;

    fn to_set(&self) -> Result<HashSet<T>>;

    fn add_set_change_listener(&self, listener: Listener<SetChangeEvent<T>>) -> Result<()>;

    fn remove_set_change_listener(&self, listener: &Listener<SetChangeEvent<T>>);
}

/// An observable map.
pub trait ObservableMap<K, V>: Observable
where
    K: Eq + Hash,
{
    fn get(&self, key: &K) -> Result<Option<V>>;

    fn contains_key(&self, key: &K) -> Result<bool>;

    fn len(&self) -> Result<usize>;

    fn to_map(&self) -> Result<HashMap<K, V>>;

    fn add_map_change_listener(&self, listener: Listener<MapChangeEvent<K, V>>) -> Result<()>;

    fn remove_map_change_listener(&self, listener: &Listener<MapChangeEvent<K, V>>);
}
