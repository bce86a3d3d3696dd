//! The context a task runs in: configuration lookup, counters, liveness.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::FlowConfig;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Counter {
    TuplesRead,
    TuplesWritten,
    TuplesTrapped,
    Custom { group: String, name: String },
}

impl Counter {
    pub fn custom(group: impl Into<String>, name: impl Into<String>) -> Self {
        Counter::Custom {
            group: group.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Counter::TuplesRead => f.write_str("tuples_read"),
            Counter::TuplesWritten => f.write_str("tuples_written"),
            Counter::TuplesTrapped => f.write_str("tuples_trapped"),
            Counter::Custom { group, name } => write!(f, "{group}.{name}"),
        }
    }
}

/// Implemented by whatever hosts a task. Every call happens on the task's
/// own thread, so implementations only need interior mutability.
pub trait FlowProcess: Send + Sync {
    fn config(&self) -> &FlowConfig;

    fn property(&self, key: &str) -> Option<String> {
        self.config().property(key).map(str::to_string)
    }

    fn increment(&self, counter: Counter, amount: i64);

    fn counter(&self, counter: &Counter) -> i64;

    /// Signal the host that the task is making progress.
    fn keep_alive(&self) {}
}
