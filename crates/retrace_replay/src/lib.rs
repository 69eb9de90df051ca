//! RETRACE replay engine
//!
//! The algorithmic core of the record-and-replay debugger: aligning two
//! traces' steps for comparison, computing which downstream steps a
//! re-run invalidates, deterministically regenerating a replay trace, and
//! three-way-merging two replay branches back together.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod diff;
pub mod engine;
pub mod graph;
pub mod merge;

pub use diff::{AlignedPair, DiffEngine, TraceDelta};
pub use engine::{ReplayEngine, checkpoint_signatures};
pub use graph::DependencyGraph;
pub use merge::merge_replays;
