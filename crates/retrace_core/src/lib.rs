//! RETRACE core types
//!
//! Errors, canonical JSON digests, and ISO-8601 millisecond timestamps
//! shared by every RETRACE crate.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod digest;
pub mod error;
pub mod iso;
pub mod num;

pub use digest::{Digest, canonical_json};
pub use error::{CoreError, CoreResult};
pub use num::round_dp;
