// ============================================================================
// spark-observables - Combinators
// Derived observables that recompute from upstream observables
// ============================================================================
//
// Every combinator here is lazy: upstream subscriptions and caches exist only
// while the combinator itself has listeners. The first-listener hook builds
// them, the last-listener hook tears them down, and unobserved reads go
// straight to the sources.
// ============================================================================

mod bidi;
mod computed;
mod staleness;
mod union;

pub use bidi::BidiObservableMap;
pub use computed::{ComputeFn, ComputedValue};
pub use staleness::{StalenessConsumer, StalenessTracker};
pub use union::{SourceSet, UnionSet};
