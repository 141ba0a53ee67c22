// ============================================================================
// spark-observables - Errors
// Failure kinds shared by every observable and diff operation
// ============================================================================

/// Errors returned by observables, diff computations and realms.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ObservableError {
    /// State was accessed from outside the observable's realm.
    #[error("observable accessed outside of its realm")]
    RealmViolation,

    /// A changing listener vetoed a value change; the value is unchanged.
    #[error("value change vetoed by a changing listener")]
    ChangeVetoed,

    /// An element did not have the element type the diff was asked for.
    #[error("element {index} is not a {expected}")]
    TypeMismatch {
        expected: &'static str,
        index: usize,
    },

    /// The observable has already been disposed.
    #[error("observable used after dispose")]
    UseAfterDispose,

    /// The observable is derived or read-only and rejects direct mutation.
    #[error("unsupported mutation: {0}")]
    UnsupportedMutation(&'static str),

    /// A positional list operation received an index past the end.
    #[error("index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: usize, len: usize },
}

/// Convenience alias for observable results.
pub type Result<T> = std::result::Result<T, ObservableError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_problem() {
        let err = ObservableError::TypeMismatch {
            expected: "i32",
            index: 3,
        };
        assert_eq!(err.to_string(), "element 3 is not a i32");

        let err = ObservableError::IndexOutOfBounds { index: 5, len: 2 };
        assert_eq!(err.to_string(), "index 5 out of bounds for length 2");

        let err = ObservableError::UnsupportedMutation("union sets are read-only");
        assert!(err.to_string().contains("read-only"));
    }
}
