// ============================================================================
// spark-observables - Value Diff
// ============================================================================

use crate::equality::EqualsFn;

/// The old and new state of a single value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueDiff<T> {
    old: T,
    new: T,
}

impl<T> ValueDiff<T> {
    /// Create a diff from `old` to `new`.
    pub fn new(old: T, new: T) -> Self {
        Self { old, new }
    }

    /// The value before the change.
    pub fn old(&self) -> &T {
        &self.old
    }

    /// The value after the change.
    pub fn new_value(&self) -> &T {
        &self.new
    }

    /// Split into `(old, new)`.
    pub fn into_parts(self) -> (T, T) {
        (self.old, self.new)
    }

    /// Returns true if `old` and `new` are equal under `equals`.
    pub fn is_empty_by(&self, equals: EqualsFn<T>) -> bool {
        equals(&self.old, &self.new)
    }
}

impl<T: PartialEq> ValueDiff<T> {
    /// Returns true if nothing changed.
    pub fn is_empty(&self) -> bool {
        self.old == self.new
    }
}

/// Diff two values, returning `None` when they are equal under `equals`.
///
/// # Example
///
/// ```
/// use spark_observables::diff::compute_value_diff;
/// use spark_observables::equality::equals;
///
/// assert!(compute_value_diff(1, 1, equals).is_none());
///
/// let diff = compute_value_diff(Some("a"), None, equals).unwrap();
/// assert_eq!(diff.old(), &Some("a"));
/// assert_eq!(diff.new_value(), &None);
/// ```
pub fn compute_value_diff<T>(old: T, new: T, equals: EqualsFn<T>) -> Option<ValueDiff<T>> {
    if equals(&old, &new) {
        None
    } else {
        Some(ValueDiff::new(old, new))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equality::{equals, never_equals};

    #[test]
    fn equal_values_produce_no_diff() {
        assert!(compute_value_diff("x", "x", equals).is_none());
        assert!(compute_value_diff::<Option<u8>>(None, None, equals).is_none());
    }

    #[test]
    fn custom_equality_controls_emptiness() {
        let diff = compute_value_diff(3, 3, never_equals).unwrap();
        assert!(diff.is_empty());
        assert!(!diff.is_empty_by(never_equals));
    }

    #[test]
    fn parts_round_out() {
        let diff = ValueDiff::new(1, 2);
        assert_eq!(diff.old(), &1);
        assert_eq!(diff.new_value(), &2);
        assert_eq!(diff.into_parts(), (1, 2));
    }
}
