//! Convenient re-exports for downstream crates.

pub use crate::builder::{ArgumentsBuilder, KeyBuilder, OutgoingBuilder, ValueBuilder};
pub use crate::comparator::{FieldComparator, KeyComparator};
pub use crate::config::{AssertionLevel, FlowConfig};
pub use crate::entry::{Entry, EntryView, TupleEntry};
pub use crate::error::{Error, Result};
pub use crate::fields::{Comparable, Fields, Kind};
pub use crate::id::{DuctId, ElementId};
pub use crate::process::{Counter, FlowProcess};
pub use crate::tuple::{Row, Tuple};
pub use crate::value::Value;
pub use crate::view::{Layout, RowCow, View};
