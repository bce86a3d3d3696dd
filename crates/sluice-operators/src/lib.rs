#![forbid(unsafe_code)]
//! sluice-operators: operation contracts, joiners and built-in operations.
//!
//! Design intent:
//! - Operations are plain synchronous objects; they never see graph wiring.
//! - Arguments arrive as borrowed views and results leave through an
//!   `OutputCollector`, so an operation never owns a record it did not make.

pub mod error;
pub mod traits;

pub mod aggregate;
pub mod assertion;
pub mod buffer;
pub mod filter;
pub mod function;

pub mod join;

pub use error::{OperationError, OperationResult};
pub use join::{JoinCursor, JoinKind, Joiner, JoinerClosure};
pub use traits::{
    Aggregator, Buffer, BufferCall, BufferContext, Filter, Function, GroupAssertion, Operation,
    OperationKind, OutputCollector, ValueAssertion,
};
