//! RETRACE trace data model
//!
//! Value types for recorded agent executions: steps, traces, replay
//! metadata, and the storage collaborator interface. The recorder and the
//! persistence layer live elsewhere; these types are the in-memory
//! currency of the replay, diff, merge, and job components.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod replay_info;
pub mod step;
pub mod store;
pub mod trace;

pub use replay_info::{MergeStrategy, ReplayInfo, ReplayStrategy, SystemMeta};
pub use step::{Step, StepIo, StepMetrics, StepPreview, StepStatus, StepType};
pub use store::{MemoryTraceStore, TraceStore};
pub use trace::{Trace, TraceMetadata, TraceStatus};
