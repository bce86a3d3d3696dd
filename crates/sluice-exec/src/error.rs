//! Execution errors.

use sluice_operators::OperationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecError {
    /// An operation failed and no trap took the record.
    #[error("operation '{element}' failed: {source}")]
    Operation {
        element: String,
        #[source]
        source: OperationError,
    },

    /// Never trapped.
    #[error("fatal failure in '{element}': {message}")]
    Fatal { element: String, message: String },

    /// Raised while building, binding or initializing the graph.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("lifecycle violation in {duct}: {message}")]
    Lifecycle { duct: String, message: String },

    #[error(transparent)]
    Io(#[from] sluice_io::Error),

    #[error(transparent)]
    Core(#[from] sluice_core::Error),
}

impl ExecError {
    pub fn config(msg: impl Into<String>) -> Self {
        ExecError::Config(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        ExecError::Invariant(msg.into())
    }

    /// Wrap an operation failure that is not going to a trap.
    pub fn operation(element: &str, source: OperationError) -> Self {
        match source {
            OperationError::Fatal(message) => ExecError::Fatal {
                element: element.to_string(),
                message,
            },
            source => ExecError::Operation {
                element: element.to_string(),
                source,
            },
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ExecError::Fatal { .. } | ExecError::Invariant(_))
    }
}

pub type ExecResult<T> = std::result::Result<T, ExecError>;
