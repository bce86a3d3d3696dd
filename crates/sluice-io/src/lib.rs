#![forbid(unsafe_code)]
//! sluice-io: the source and sink collaborators stages read from and write to.
//!
//! Only an abstract iterator/collector pair is required by the engine; the
//! memory tap backs tests and the JSON-lines tap is the one durable format.

pub mod error;
pub mod jsonl;
pub mod memory;
pub mod tap;

pub use error::{Error, Result};
pub use jsonl::JsonlTap;
pub use memory::MemoryTap;
pub use tap::{Tap, TupleCollector, TupleIterator};
