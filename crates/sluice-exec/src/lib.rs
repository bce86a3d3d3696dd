#![forbid(unsafe_code)]
//! sluice-exec: the duct graph, its stages and gates, and trap diversion.
//!
//! An [`ElementGraph`] describes a pipe assembly; [`StreamGraph::build`]
//! compiles it into an arena of ducts and [`StreamGraph::execute`] pushes
//! every source through it on the calling thread.
//!
//! Design intent:
//! - Ducts reach each other only by id through [`Flow`]; no duct owns another.
//! - The stage wrapping an operation is chosen once, when the graph is built.
//! - Groupings are borrowed views over a gate's maps and are never copied.
//! - A failed record goes to its branch's trap; everything else fails the run.

pub mod countdown;
pub mod duct;
pub mod element;
pub mod error;
pub mod fork;
pub mod gate;
pub mod graph;
pub mod process;
pub mod stage;
pub mod trap;
pub mod window;

#[cfg(test)]
pub(crate) mod testing;

pub use duct::{Duct, DuctState, Flow, GroupValues, Grouping, Incoming, Links, Pred};
pub use element::{CoGroup, Element, ElementGraph, ElementKind, GroupBy, GroupScope, Scope, SourceOrder};
pub use error::{ExecError, ExecResult};
pub use graph::StreamGraph;
pub use process::LocalFlowProcess;
pub use trap::{TrapHandler, TrapRegistry};
