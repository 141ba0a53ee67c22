// ============================================================================
// spark-observables - Property Observables
// Observe a field of a plain object through explicit accessors
// ============================================================================
//
// A `ValueProperty` describes how to read (and optionally write) one value
// of some source object `S`, and how to hear about native changes to it.
// Observing the property on a concrete source yields an ordinary observable
// value. The native listener is attached when that value gains its first
// listener and detached when it loses its last one.
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::diff::ValueDiff;
use crate::equality::{EqualsFn, equals};
use crate::error::{ObservableError, Result};
use crate::listeners::{Listener, ListenerRegistry};
use crate::observable::{Observable, ObservableBase, ObservableValue, Observation, ValueChangeEvent};
use crate::realm::{RealmRef, lock};

// =============================================================================
// NATIVE LISTENER SEAM
// =============================================================================

/// Handle the native side calls when the property may have changed.
///
/// Safe to call from any thread; off-realm calls are scheduled onto the
/// realm. Calls after the observable is gone are ignored.
#[derive(Clone)]
pub struct NativeNotifier {
    notify: Arc<dyn Fn() + Send + Sync>,
}

impl NativeNotifier {
    pub fn notify(&self) {
        (self.notify)();
    }
}

impl fmt::Debug for NativeNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeNotifier").finish_non_exhaustive()
    }
}

/// Attaches change notification to a source object.
///
/// Each observed source sees exactly one `add_to` per transition into the
/// observed state and exactly one `remove_from` per transition out of it.
pub trait NativePropertyListener<S>: Send + Sync {
    fn add_to(&self, source: &Arc<S>, notifier: NativeNotifier);

    fn remove_from(&self, source: &Arc<S>);
}

// =============================================================================
// VALUE PROPERTY
// =============================================================================

type Accessor<S, T> = Arc<dyn Fn(&S) -> T + Send + Sync>;
type Mutator<S, T> = Arc<dyn Fn(&S, T) + Send + Sync>;

/// Accessor, optional mutator and optional native listener for one value.
///
/// # Example
///
/// ```
/// use std::sync::{Arc, Mutex};
/// use spark_observables::property::ValueProperty;
/// use spark_observables::realm::ThreadRealm;
///
/// struct Person {
///     name: Mutex<String>,
/// }
///
/// let name = ValueProperty::new(|p: &Person| p.name.lock().unwrap().clone())
///     .with_mutator(|p: &Person, v: String| *p.name.lock().unwrap() = v);
///
/// let realm = ThreadRealm::current();
/// let ada = Arc::new(Person { name: Mutex::new("Ada".into()) });
/// let observed = name.observe(&realm, ada.clone());
///
/// observed.set("Grace".into()).unwrap();
/// assert_eq!(*ada.name.lock().unwrap(), "Grace");
/// ```
pub struct ValueProperty<S, T> {
    accessor: Accessor<S, T>,
    mutator: Option<Mutator<S, T>>,
    native: Option<Arc<dyn NativePropertyListener<S>>>,
    equals: EqualsFn<T>,
}

impl<S, T> ValueProperty<S, T>
where
    S: Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// A read-only property compared with `PartialEq`.
    pub fn new(accessor: impl Fn(&S) -> T + Send + Sync + 'static) -> Self
    where
        T: PartialEq,
    {
        Self::with_equals(accessor, equals)
    }

    pub fn with_equals(accessor: impl Fn(&S) -> T + Send + Sync + 'static, equals: EqualsFn<T>) -> Self {
        Self {
            accessor: Arc::new(accessor),
            mutator: None,
            native: None,
            equals,
        }
    }

    /// Make the property writable.
    pub fn with_mutator(mut self, mutator: impl Fn(&S, T) + Send + Sync + 'static) -> Self {
        self.mutator = Some(Arc::new(mutator));
        self
    }

    /// Hear about changes made to the source outside this crate.
    pub fn with_native_listener(mut self, native: impl NativePropertyListener<S> + 'static) -> Self {
        self.native = Some(Arc::new(native));
        self
    }

    /// Read the property straight from `source`.
    pub fn get_from(&self, source: &S) -> T {
        (self.accessor)(source)
    }

    /// Observe the property on one source object.
    pub fn observe(&self, realm: &RealmRef, source: Arc<S>) -> PropertyObservableValue<S, T> {
        PropertyObservableValue::new(realm, source, self.clone())
    }
}

impl<S, T> Clone for ValueProperty<S, T> {
    fn clone(&self) -> Self {
        Self {
            accessor: self.accessor.clone(),
            mutator: self.mutator.clone(),
            native: self.native.clone(),
            equals: self.equals,
        }
    }
}

impl<S, T> fmt::Debug for ValueProperty<S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueProperty")
            .field("writable", &self.mutator.is_some())
            .field("native", &self.native.is_some())
            .finish()
    }
}

// =============================================================================
// PROPERTY OBSERVABLE VALUE
// =============================================================================

struct PropertyInner<S, T> {
    base: ObservableBase,
    /// Taken on dispose.
    source: Mutex<Option<Arc<S>>>,
    property: ValueProperty<S, T>,
    value_listeners: ListenerRegistry<Listener<ValueChangeEvent<T>>>,
    /// Last value seen while observed; `Some` exactly while attached.
    cached: Mutex<Option<T>>,
    /// Set while our own mutator runs, so its native echo is ignored.
    updating: AtomicBool,
}

/// One property of one source object as an observable value.
pub struct PropertyObservableValue<S, T> {
    inner: Arc<PropertyInner<S, T>>,
}

impl<S, T> PropertyInner<S, T>
where
    S: Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn on_observation(self: &Arc<Self>, observation: Observation) {
        match observation {
            Observation::FirstListenerAdded => self.attach(),
            Observation::LastListenerRemoved => self.detach(),
        }
    }

    fn source(&self) -> Result<Arc<S>> {
        lock(&self.source).clone().ok_or(ObservableError::UseAfterDispose)
    }

    fn attach(self: &Arc<Self>) {
        let Ok(source) = self.source() else {
            return;
        };
        {
            let mut cached = lock(&self.cached);
            if cached.is_some() {
                return;
            }
            *cached = Some(self.property.get_from(&source));
        }

        if let Some(native) = &self.property.native {
            native.add_to(&source, self.notifier());
            tracing::debug!(observable = self.base.id().get(), "property.attached");
        }
    }

    fn detach(&self) {
        if lock(&self.cached).take().is_none() {
            return;
        }
        let Ok(source) = self.source() else {
            return;
        };
        if let Some(native) = &self.property.native {
            native.remove_from(&source);
            tracing::debug!(observable = self.base.id().get(), "property.detached");
        }
    }

    fn notifier(self: &Arc<Self>) -> NativeNotifier {
        let weak: Weak<Self> = Arc::downgrade(self);
        let realm = self.base.realm().clone();
        NativeNotifier {
            notify: Arc::new(move || {
                let weak = weak.clone();
                realm.exec(Box::new(move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.native_changed();
                    }
                }));
            }),
        }
    }

    fn native_changed(&self) {
        if self.updating.load(Ordering::SeqCst) || self.base.is_disposed() {
            return;
        }
        self.refresh();
    }

    /// Re-read the source and fire if the value differs from the cache.
    fn refresh(&self) {
        let Ok(source) = self.source() else {
            return;
        };
        let after = self.property.get_from(&source);
        let diff = {
            let mut cached = lock(&self.cached);
            let Some(before) = cached.as_mut() else {
                return;
            };
            if (self.property.equals)(before, &after) {
                return;
            }
            let before = std::mem::replace(before, after.clone());
            ValueDiff::new(before, after)
        };
        self.base.fire_diff(&self.value_listeners, diff);
    }
}

impl<S, T> PropertyObservableValue<S, T>
where
    S: Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn new(realm: &RealmRef, source: Arc<S>, property: ValueProperty<S, T>) -> Self {
        let inner = Arc::new(PropertyInner {
            base: ObservableBase::new(realm),
            source: Mutex::new(Some(source)),
            property,
            value_listeners: ListenerRegistry::new(),
            cached: Mutex::new(None),
            updating: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&inner);
        inner.base.set_hook(Arc::new(move |observation: Observation| {
            if let Some(inner) = weak.upgrade() {
                inner.on_observation(observation);
            }
        }));

        Self { inner }
    }

    /// The observed object. Released by `dispose`.
    pub fn source(&self) -> Result<Arc<S>> {
        self.inner.base.check_live()?;
        self.inner.source()
    }

    pub fn get(&self) -> Result<T> {
        self.inner.base.record_read()?;
        Ok(self.inner.property.get_from(&*self.inner.source()?))
    }

    /// Write through the mutator, then fire if the value changed.
    pub fn set(&self, value: T) -> Result<()> {
        let inner = &self.inner;
        inner.base.check_access()?;
        let Some(mutator) = &inner.property.mutator else {
            return Err(ObservableError::UnsupportedMutation("property has no mutator"));
        };

        let source = inner.source()?;

        struct UpdatingGuard<'a> {
            flag: &'a AtomicBool,
        }

        impl Drop for UpdatingGuard<'_> {
            fn drop(&mut self) {
                self.flag.store(false, Ordering::SeqCst);
            }
        }

        {
            inner.updating.store(true, Ordering::SeqCst);
            let _guard = UpdatingGuard {
                flag: &inner.updating,
            };
            mutator(&source, value);
        }

        inner.refresh();
        Ok(())
    }

    pub fn add_value_change_listener(&self, listener: Listener<ValueChangeEvent<T>>) -> Result<()> {
        self.inner.base.register(&self.inner.value_listeners, listener)
    }

    pub fn remove_value_change_listener(&self, listener: &Listener<ValueChangeEvent<T>>) {
        self.inner.base.unregister(&self.inner.value_listeners, listener);
    }
}

impl<S, T> Observable for PropertyObservableValue<S, T>
where
    S: Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn base(&self) -> &ObservableBase {
        &self.inner.base
    }

    fn dispose(&self) -> Result<()> {
        if self.inner.base.begin_dispose()? {
            self.inner.detach();
            lock(&self.inner.source).take();
            self.inner.value_listeners.clear();
            self.inner.base.finish_dispose();
        }
        Ok(())
    }
}

impl<S, T> ObservableValue<T> for PropertyObservableValue<S, T>
where
    S: Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn get(&self) -> Result<T> {
        PropertyObservableValue::get(self)
    }

    fn add_value_change_listener(&self, listener: Listener<ValueChangeEvent<T>>) -> Result<()> {
        PropertyObservableValue::add_value_change_listener(self, listener)
    }

    fn remove_value_change_listener(&self, listener: &Listener<ValueChangeEvent<T>>) {
        PropertyObservableValue::remove_value_change_listener(self, listener);
    }
}

impl<S, T> Clone for PropertyObservableValue<S, T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S, T> fmt::Debug for PropertyObservableValue<S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyObservableValue")
            .field("id", &self.inner.base.id())
            .field("property", &self.inner.property)
            .field("attached", &lock(&self.inner.cached).is_some())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
