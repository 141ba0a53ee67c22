// ============================================================================
// spark-observables - Writable Value
// A single realm-confined value, plus a vetoable flavour
// ============================================================================

use std::fmt;
use std::mem;
use std::sync::{Arc, Mutex};

use super::{
    Observable, ObservableBase, ObservableValue, ValueChangeEvent, ValueChangingEvent,
};
use crate::diff::ValueDiff;
use crate::equality::{EqualsFn, equals};
use crate::error::{ObservableError, Result};
use crate::listeners::{Listener, ListenerRegistry};
use crate::realm::{RealmRef, lock};

// =============================================================================
// WRITABLE VALUE
// =============================================================================

struct ValueInner<T> {
    base: ObservableBase,
    value: Mutex<T>,
    equals: EqualsFn<T>,
    value_listeners: ListenerRegistry<Listener<ValueChangeEvent<T>>>,
}

/// A mutable observable value.
///
/// Cloning the handle shares the same value.
///
/// # Example
///
/// ```
/// use std::sync::{Arc, Mutex};
/// use spark_observables::listeners::listener;
/// use spark_observables::observable::{ValueChangeEvent, WritableValue};
/// use spark_observables::realm::ThreadRealm;
///
/// let realm = ThreadRealm::current();
/// let name = WritableValue::new(&realm, String::from("a"));
///
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let s = seen.clone();
/// name.add_value_change_listener(listener(move |e: &ValueChangeEvent<String>| {
///     s.lock().unwrap().push(e.diff.new_value().clone());
/// }))
/// .unwrap();
///
/// name.set("b".to_string()).unwrap();
/// name.set("b".to_string()).unwrap(); // equal, nothing fires
/// assert_eq!(*seen.lock().unwrap(), vec!["b"]);
/// ```
pub struct WritableValue<T> {
    inner: Arc<ValueInner<T>>,
}

impl<T> WritableValue<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a value that suppresses writes equal under `PartialEq`.
    pub fn new(realm: &RealmRef, value: T) -> Self
    where
        T: PartialEq,
    {
        Self::with_equals(realm, value, equals)
    }

    /// Create a value with a custom equality function.
    pub fn with_equals(realm: &RealmRef, value: T, equals: EqualsFn<T>) -> Self {
        Self {
            inner: Arc::new(ValueInner {
                base: ObservableBase::new(realm),
                value: Mutex::new(value),
                equals,
                value_listeners: ListenerRegistry::new(),
            }),
        }
    }

    /// Get the current value (cloning).
    pub fn get(&self) -> Result<T> {
        self.inner.base.record_read()?;
        Ok(lock(&self.inner.value).clone())
    }

    /// Access the current value with a closure (avoids cloning).
    ///
    /// The closure must not touch this observable.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        self.inner.base.record_read()?;
        Ok(f(&lock(&self.inner.value)))
    }

    /// Replace the value.
    ///
    /// Writing a value equal to the current one succeeds without firing.
    pub fn set(&self, value: T) -> Result<()> {
        let inner = &self.inner;
        inner.base.check_access()?;

        let diff = {
            let mut current = lock(&inner.value);
            if (inner.equals)(&current, &value) {
                return Ok(());
            }
            let old = mem::replace(&mut *current, value.clone());
            ValueDiff::new(old, value)
        };

        inner.base.fire_diff(&inner.value_listeners, diff);
        Ok(())
    }

    /// Modify a copy of the value with `f` and write it back.
    pub fn update(&self, f: impl FnOnce(&mut T)) -> Result<()> {
        let mut next = self.get()?;
        f(&mut next);
        self.set(next)
    }

    /// Mark the value stale or fresh.
    ///
    /// Becoming stale fires a stale event. Becoming fresh again fires a change
    /// whose diff has equal old and new values, so consumers re-read.
    pub fn set_stale(&self, stale: bool) -> Result<()> {
        let inner = &self.inner;
        inner.base.check_access()?;
        if !inner.base.mark_stale(stale) {
            return Ok(());
        }

        if stale {
            inner.base.fire_stale();
        } else {
            let current = lock(&inner.value).clone();
            inner
                .base
                .fire_diff(&inner.value_listeners, ValueDiff::new(current.clone(), current));
        }
        Ok(())
    }

    pub fn add_value_change_listener(&self, listener: Listener<ValueChangeEvent<T>>) -> Result<()> {
        self.inner.base.register(&self.inner.value_listeners, listener)
    }

    pub fn remove_value_change_listener(&self, listener: &Listener<ValueChangeEvent<T>>) {
        self.inner.base.unregister(&self.inner.value_listeners, listener);
    }

    pub(crate) fn equals_fn(&self) -> EqualsFn<T> {
        self.inner.equals
    }
}

impl<T> Observable for WritableValue<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn base(&self) -> &ObservableBase {
        &self.inner.base
    }

    fn dispose(&self) -> Result<()> {
        if self.inner.base.begin_dispose()? {
            self.inner.value_listeners.clear();
            self.inner.base.finish_dispose();
        }
        Ok(())
    }
}

impl<T> ObservableValue<T> for WritableValue<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn get(&self) -> Result<T> {
        WritableValue::get(self)
    }

    fn add_value_change_listener(&self, listener: Listener<ValueChangeEvent<T>>) -> Result<()> {
        WritableValue::add_value_change_listener(self, listener)
    }

    fn remove_value_change_listener(&self, listener: &Listener<ValueChangeEvent<T>>) {
        WritableValue::remove_value_change_listener(self, listener);
    }
}

impl<T> Clone for WritableValue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for WritableValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WritableValue")
            .field("id", &self.inner.base.id())
            .field("value", &*lock(&self.inner.value))
            .finish()
    }
}

// =============================================================================
// VETOABLE VALUE
// =============================================================================

struct VetoableInner<T> {
    value: WritableValue<T>,
    changing_listeners: ListenerRegistry<Listener<ValueChangingEvent<T>>>,
}

/// A value whose changes can be rejected before they commit.
///
/// Changing listeners see the proposed diff synchronously. If any of them
/// vetoes, [`VetoableValue::set`] fails with
/// [`ObservableError::ChangeVetoed`], the value stays put and no change
/// event fires.
pub struct VetoableValue<T> {
    inner: Arc<VetoableInner<T>>,
}

impl<T> VetoableValue<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(realm: &RealmRef, value: T) -> Self
    where
        T: PartialEq,
    {
        Self::with_equals(realm, value, equals)
    }

    pub fn with_equals(realm: &RealmRef, value: T, equals: EqualsFn<T>) -> Self {
        Self {
            inner: Arc::new(VetoableInner {
                value: WritableValue::with_equals(realm, value, equals),
                changing_listeners: ListenerRegistry::new(),
            }),
        }
    }

    pub fn get(&self) -> Result<T> {
        self.inner.value.get()
    }

    /// Propose `value` to the changing listeners and commit it unless vetoed.
    pub fn set(&self, value: T) -> Result<()> {
        let writable = &self.inner.value;
        let base = writable.base();
        base.check_access()?;

        let current = writable.get()?;
        if (writable.equals_fn())(&current, &value) {
            return Ok(());
        }

        let event = ValueChangingEvent::new(base.id(), ValueDiff::new(current, value.clone()));
        for listener in self.inner.changing_listeners.snapshot().iter() {
            listener(&event);
        }

        if event.is_vetoed() {
            tracing::debug!(observable = base.id().get(), "observable.change_vetoed");
            return Err(ObservableError::ChangeVetoed);
        }

        writable.set(value)
    }

    pub fn set_stale(&self, stale: bool) -> Result<()> {
        self.inner.value.set_stale(stale)
    }

    pub fn add_value_changing_listener(
        &self,
        listener: Listener<ValueChangingEvent<T>>,
    ) -> Result<()> {
        self.inner
            .value
            .base()
            .register(&self.inner.changing_listeners, listener)
    }

    pub fn remove_value_changing_listener(&self, listener: &Listener<ValueChangingEvent<T>>) {
        self.inner
            .value
            .base()
            .unregister(&self.inner.changing_listeners, listener);
    }

    pub fn add_value_change_listener(&self, listener: Listener<ValueChangeEvent<T>>) -> Result<()> {
        self.inner.value.add_value_change_listener(listener)
    }

    pub fn remove_value_change_listener(&self, listener: &Listener<ValueChangeEvent<T>>) {
        self.inner.value.remove_value_change_listener(listener);
    }
}

impl<T> Observable for VetoableValue<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn base(&self) -> &ObservableBase {
        self.inner.value.base()
    }

    fn dispose(&self) -> Result<()> {
        self.inner.value.dispose()?;
        self.inner.changing_listeners.clear();
        Ok(())
    }
}

impl<T> ObservableValue<T> for VetoableValue<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn get(&self) -> Result<T> {
        VetoableValue::get(self)
    }

    fn add_value_change_listener(&self, listener: Listener<ValueChangeEvent<T>>) -> Result<()> {
        VetoableValue::add_value_change_listener(self, listener)
    }

    fn remove_value_change_listener(&self, listener: &Listener<ValueChangeEvent<T>>) {
        VetoableValue::remove_value_change_listener(self, listener);
    }
}

impl<T> Clone for VetoableValue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for VetoableValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VetoableValue")
            .field("value", &self.inner.value)
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equality::never_equals;
    use crate::listeners::listener;
    use crate::observable::{ChangeEvent, DisposeEvent, StaleEvent};
    use crate::realm::ThreadRealm;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_change_listener(counter: &Arc<AtomicUsize>) -> Listener<ChangeEvent> {
        let counter = counter.clone();
        listener(move |_: &ChangeEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn log() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[test]
    fn set_and_get() {
        let realm = ThreadRealm::current();
        let value = WritableValue::new(&realm, 1);
        assert_eq!(value.get().unwrap(), 1);
        value.set(2).unwrap();
        assert_eq!(value.get().unwrap(), 2);
        value.update(|v| *v += 10).unwrap();
        assert_eq!(value.with(|v| *v * 2).unwrap(), 24);
    }

    #[test]
    fn generic_change_fires_before_typed_diff() {
        let realm = ThreadRealm::current();
        let value = WritableValue::new(&realm, 0);
        let events = log();

        let e = events.clone();
        value
            .add_value_change_listener(listener(move |ev: &ValueChangeEvent<i32>| {
                e.lock()
                    .unwrap()
                    .push(format!("diff {}->{}", ev.diff.old(), ev.diff.new_value()));
            }))
            .unwrap();
        let e = events.clone();
        value
            .add_change_listener(listener(move |_: &ChangeEvent| {
                e.lock().unwrap().push("change".into());
            }))
            .unwrap();

        value.set(5).unwrap();
        assert_eq!(*events.lock().unwrap(), vec!["change", "diff 0->5"]);
    }

    #[test]
    fn equal_write_fires_nothing() {
        let realm = ThreadRealm::current();
        let value = WritableValue::new(&realm, "same");
        let hits = Arc::new(AtomicUsize::new(0));
        value.add_change_listener(counting_change_listener(&hits)).unwrap();

        value.set("same").unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn custom_equality_can_force_events() {
        let realm = ThreadRealm::current();
        let value = WritableValue::with_equals(&realm, 7, never_equals);
        let hits = Arc::new(AtomicUsize::new(0));
        value.add_change_listener(counting_change_listener(&hits)).unwrap();

        value.set(7).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn access_off_realm_is_rejected() {
        let realm = ThreadRealm::current();
        let value = WritableValue::new(&realm, 1);
        let remote = value.clone();

        let (get, set) = std::thread::spawn(move || (remote.get(), remote.set(3)))
            .join()
            .unwrap();
        assert_eq!(get, Err(ObservableError::RealmViolation));
        assert_eq!(set, Err(ObservableError::RealmViolation));
        assert_eq!(value.get().unwrap(), 1);
    }

    #[test]
    fn listeners_can_register_from_other_threads() {
        let realm = ThreadRealm::current();
        let value = WritableValue::new(&realm, 1);
        let hits = Arc::new(AtomicUsize::new(0));

        let remote = value.clone();
        let l = counting_change_listener(&hits);
        std::thread::spawn(move || remote.add_change_listener(l).unwrap())
            .join()
            .unwrap();

        value.set(2).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stale_transitions() {
        let realm = ThreadRealm::current();
        let value = WritableValue::new(&realm, 1);
        let events = log();

        let e = events.clone();
        value
            .add_stale_listener(listener(move |_: &StaleEvent| {
                e.lock().unwrap().push("stale".into());
            }))
            .unwrap();
        let e = events.clone();
        value
            .add_change_listener(listener(move |_: &ChangeEvent| {
                e.lock().unwrap().push("change".into());
            }))
            .unwrap();

        value.set_stale(true).unwrap();
        value.set_stale(true).unwrap();
        assert!(value.is_stale().unwrap());
        value.set_stale(false).unwrap();
        assert!(!value.is_stale().unwrap());

        assert_eq!(*events.lock().unwrap(), vec!["stale", "change"]);
    }

    #[test]
    fn dispose_is_terminal() {
        let realm = ThreadRealm::current();
        let value = WritableValue::new(&realm, 1);
        let disposed = Arc::new(AtomicUsize::new(0));

        let d = disposed.clone();
        value
            .add_dispose_listener(listener(move |_: &DisposeEvent| {
                d.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        value.dispose().unwrap();
        value.dispose().unwrap();

        assert_eq!(disposed.load(Ordering::SeqCst), 1);
        assert!(value.is_disposed());
        assert_eq!(value.get(), Err(ObservableError::UseAfterDispose));
        assert_eq!(value.set(2), Err(ObservableError::UseAfterDispose));
        assert_eq!(
            value.add_change_listener(listener(|_: &ChangeEvent| {})),
            Err(ObservableError::UseAfterDispose)
        );
    }

    #[test]
    fn nested_set_is_queued_behind_outer_dispatch() {
        let realm = ThreadRealm::current();
        let value = WritableValue::new(&realm, 0);
        let events = log();

        // First listener bumps 1 -> 2 while the 0 -> 1 dispatch is running
        let v = value.clone();
        value
            .add_value_change_listener(listener(move |ev: &ValueChangeEvent<i32>| {
                if *ev.diff.new_value() == 1 {
                    v.set(2).unwrap();
                }
            }))
            .unwrap();
        let e = events.clone();
        value
            .add_value_change_listener(listener(move |ev: &ValueChangeEvent<i32>| {
                e.lock()
                    .unwrap()
                    .push(format!("{}->{}", ev.diff.old(), ev.diff.new_value()));
            }))
            .unwrap();

        value.set(1).unwrap();
        assert_eq!(*events.lock().unwrap(), vec!["0->1", "1->2"]);
        assert_eq!(value.get().unwrap(), 2);
    }

    #[test]
    fn veto_leaves_value_untouched() {
        let realm = ThreadRealm::current();
        let value = VetoableValue::new(&realm, 10);
        let changes = Arc::new(AtomicUsize::new(0));
        let disposes = Arc::new(AtomicUsize::new(0));

        value.add_change_listener(counting_change_listener(&changes)).unwrap();
        let d = disposes.clone();
        value
            .add_dispose_listener(listener(move |_: &DisposeEvent| {
                d.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        value
            .add_value_changing_listener(listener(|ev: &ValueChangingEvent<i32>| {
                if *ev.diff.new_value() < 0 {
                    ev.veto();
                }
            }))
            .unwrap();

        assert_eq!(value.set(-1), Err(ObservableError::ChangeVetoed));
        assert_eq!(value.get().unwrap(), 10);
        assert_eq!(changes.load(Ordering::SeqCst), 0);
        assert_eq!(disposes.load(Ordering::SeqCst), 0);

        value.set(11).unwrap();
        assert_eq!(value.get().unwrap(), 11);
        assert_eq!(changes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn changing_listeners_see_the_proposal() {
        let realm = ThreadRealm::current();
        let value = VetoableValue::new(&realm, "a".to_string());
        let seen = log();

        let s = seen.clone();
        value
            .add_value_changing_listener(listener(move |ev: &ValueChangingEvent<String>| {
                s.lock()
                    .unwrap()
                    .push(format!("{}->{}", ev.diff.old(), ev.diff.new_value()));
            }))
            .unwrap();

        value.set("b".into()).unwrap();
        value.set("b".into()).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["a->b"]);
    }
}
