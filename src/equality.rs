// ============================================================================
// spark-observables - Equality Functions
// Pluggable equality used to decide whether a value actually changed
// ============================================================================

/// Equality function used by value containers to suppress no-op changes.
pub type EqualsFn<T> = fn(&T, &T) -> bool;

/// Default strict equality using PartialEq.
///
/// `Option<T>` gets null-safe semantics for free: `None == None`, and
/// `None` never equals `Some(_)`.
///
/// # Example
/// ```
/// use spark_observables::equality::equals;
///
/// assert!(equals(&42, &42));
/// assert!(equals::<Option<i32>>(&None, &None));
/// assert!(!equals(&None, &Some(1)));
/// ```
pub fn equals<T: PartialEq>(a: &T, b: &T) -> bool {
    a == b
}

/// Equality for f64 where NaN equals NaN, so writing NaN twice is a no-op.
///
/// # Example
/// ```
/// use spark_observables::equality::safe_equals_f64;
///
/// assert!(safe_equals_f64(&f64::NAN, &f64::NAN));
/// assert!(!safe_equals_f64(&f64::NAN, &1.0));
/// ```
pub fn safe_equals_f64(a: &f64, b: &f64) -> bool {
    if a.is_nan() {
        return b.is_nan();
    }
    a == b
}

/// Never equal: every write is reported as a change.
pub fn never_equals<T>(_a: &T, _b: &T) -> bool {
    false
}

// =============================================================================
// TESTS
// =============================================================================
