use thiserror::Error;

/// Canonical result for core.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A selector names fields that none of the declared field sets contain.
    #[error("could not select fields: [{selector}], from: [{declared}], missing: [{missing}]")]
    FieldsResolver {
        selector: String,
        declared: String,
        missing: String,
    },

    #[error("fields error: {0}")]
    Fields(String),

    #[error("tuple error: {0}")]
    Tuple(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("Internal invariant failed: {0}")]
    Invariant(String),
}

impl Error {
    /// Resolution failures indicate a malformed topology rather than bad data.
    pub fn is_resolution(&self) -> bool {
        matches!(self, Error::FieldsResolver { .. } | Error::Fields(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Config(e.to_string())
    }
}
