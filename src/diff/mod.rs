// ============================================================================
// spark-observables - Diff Engine
// Pure functions computing structural diffs between two snapshots
// ============================================================================
//
// Each observable kind has its own diff type. Diffs are immutable values that
// are computed once per mutation and shared by every listener of that event.
// ============================================================================

mod list;
mod map;
mod set;
mod value;

pub use list::{
    ListDiff, ListDiffEntry, ListDiffVisitor, compute_list_diff, compute_list_diff_cast,
};
pub use map::{MapDiff, compute_map_diff};
pub use set::{SetDiff, compute_set_diff};
pub use value::{ValueDiff, compute_value_diff};
