//! Reading the raw Bridge dataset tree.
//!
//! - [`walker`] finds every `raw/<group>/<trajectory>` directory.
//! - [`entry`] classifies what sits inside a trajectory directory.

pub mod entry;
pub mod walker;

pub use entry::{classify, EntryKind};
pub use walker::{find_trajectories, TrajectoryWalk, WalkSummary};
