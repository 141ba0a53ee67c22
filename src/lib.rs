// ============================================================================
// spark-observables - Observable State, Diffs and Listeners
// ============================================================================
//
// Realm-confined containers (value, list, set, map) that compute structural
// diffs on every mutation and deliver them to listeners in a fixed order:
// generic change first, typed diff second. Derived observables subscribe to
// their sources only while they themselves are observed.
// ============================================================================

//! Observable values and collections with structural diffs.
//!
//! Every observable belongs to a [`Realm`]. Reads and writes must happen inside
//! that realm; listener registration works from anywhere.
//!
//! ```
//! use std::sync::{Arc, Mutex};
//! use spark_observables::{ListChangeEvent, ThreadRealm, WritableList, listener};
//!
//! let realm = ThreadRealm::current();
//! let todo = WritableList::from_vec(&realm, vec!["write", "test"]);
//!
//! let view = Arc::new(Mutex::new(todo.to_vec().unwrap()));
//! let v = view.clone();
//! todo.add_list_change_listener(listener(move |e: &ListChangeEvent<&str>| {
//!     e.diff.apply_to(&mut v.lock().unwrap());
//! }))
//! .unwrap();
//!
//! todo.set_all(vec!["test", "ship", "write"]).unwrap();
//! assert_eq!(*view.lock().unwrap(), vec!["test", "ship", "write"]);
//! ```

pub mod combinators;
pub mod diff;
pub mod equality;
pub mod error;
pub mod listeners;
pub mod observable;
pub mod property;
pub mod queue;
pub mod realm;

// Re-export the everyday surface at crate root
pub use combinators::{BidiObservableMap, ComputedValue, StalenessTracker, UnionSet};
pub use diff::{
    ListDiff, ListDiffEntry, ListDiffVisitor, MapDiff, SetDiff, ValueDiff, compute_list_diff,
    compute_list_diff_cast, compute_map_diff, compute_set_diff, compute_value_diff,
};
pub use equality::{EqualsFn, equals, never_equals, safe_equals_f64};
pub use error::{ObservableError, Result};
pub use listeners::{Listener, ListenerEquality, ListenerRegistry, listener};
pub use observable::{
    ChangeEvent, DisposeEvent, ListChangeEvent, MapChangeEvent, Observable, ObservableBase,
    ObservableId, ObservableList, ObservableMap, ObservableSet, ObservableValue, SetChangeEvent,
    StaleEvent, ValueChangeEvent, ValueChangingEvent, VetoableValue, WritableList, WritableMap,
    WritableSet, WritableValue,
};
pub use property::{NativeNotifier, NativePropertyListener, PropertyObservableValue, ValueProperty};
pub use queue::EventQueue;
pub use realm::{Realm, RealmRef, ThreadRealm};

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    #[test]
    fn handles_are_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<WritableValue<i32>>();
        assert_send_sync::<VetoableValue<String>>();
        assert_send_sync::<WritableList<i32>>();
        assert_send_sync::<WritableSet<i32>>();
        assert_send_sync::<WritableMap<String, i32>>();
        assert_send_sync::<UnionSet<i32>>();
        assert_send_sync::<BidiObservableMap<String, i32>>();
        assert_send_sync::<ComputedValue<i32>>();
        assert_send_sync::<RealmRef>();
    }

    #[test]
    fn trait_objects_serve_heterogeneous_observables() {
        let realm = ThreadRealm::current();
        let value = WritableValue::new(&realm, 1);
        let set = WritableSet::from_set(&realm, HashSet::from([1]));
        let all: Vec<Arc<dyn Observable>> = vec![Arc::new(value.clone()), Arc::new(set.clone())];

        let sources = Arc::new(Mutex::new(Vec::new()));
        for observable in &all {
            let s = sources.clone();
            observable
                .add_change_listener(listener(move |e: &ChangeEvent| s.lock().unwrap().push(e.source)))
                .unwrap();
        }

        value.set(2).unwrap();
        set.insert(2).unwrap();
        assert_eq!(*sources.lock().unwrap(), vec![value.id(), set.id()]);

        for observable in &all {
            observable.dispose().unwrap();
            assert!(observable.is_disposed());
        }
    }
}
