use sluice_core::tuple::Tuple;
use thiserror::Error;

pub type OperationResult<T = ()> = std::result::Result<T, OperationError>;

#[derive(Debug, Error)]
pub enum OperationError {
    /// A domain failure on the current record.
    #[error("operation failed: {0}")]
    Failed(String),

    #[error("assertion failed: {0}")]
    Assertion(String),

    /// A domain failure that names the record to divert instead of the input.
    #[error("{message}")]
    WithPayload { message: String, payload: Tuple },

    #[error("operation panicked: {0}")]
    Panicked(String),

    /// Never diverted; always fails the task.
    #[error("fatal: {0}")]
    Fatal(String),

    /// Raised by an output collector when a duct further down failed. The
    /// collector keeps the real error; stages propagate it unchanged.
    #[error("failure downstream of this operation")]
    Downstream,

    #[error(transparent)]
    Core(#[from] sluice_core::Error),
}

impl OperationError {
    pub fn failed(msg: impl Into<String>) -> Self {
        OperationError::Failed(msg.into())
    }

    pub fn with_payload(msg: impl Into<String>, payload: Tuple) -> Self {
        OperationError::WithPayload {
            message: msg.into(),
            payload,
        }
    }

    /// Whether the failure may be diverted to a trap.
    pub fn is_trappable(&self) -> bool {
        match self {
            OperationError::Fatal(_) | OperationError::Downstream => false,
            OperationError::Core(e) => !matches!(e, sluice_core::Error::Invariant(_)),
            _ => true,
        }
    }

    pub fn payload(&self) -> Option<&Tuple> {
        match self {
            OperationError::WithPayload { payload, .. } => Some(payload),
            _ => None,
        }
    }
}
