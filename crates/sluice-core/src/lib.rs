#![forbid(unsafe_code)]
//! sluice-core: values, tuples, fields and the view algebra shared by every
//! other sluice crate.
//!
//! Design intent:
//! - No I/O and no logging in core; exec owns both.
//! - Everything a stage needs per record (layouts, positions, comparators) is
//!   computed once from `Fields` and replayed without allocation.

pub mod builder;
pub mod comparator;
pub mod config;
pub mod entry;
pub mod error;
pub mod fields;
pub mod id;
pub mod prelude;
pub mod process;
pub mod tuple;
pub mod value;
pub mod view;

pub use error::{Error, Result};
