//! Parse errors for typed identifiers.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("empty identifier")]
    Empty,

    /// Well-formed, but an identifier of another kind (a worker id where a
    /// host id was expected, for example).
    #[error("expected a '{expected}' identifier, found prefix '{found}'")]
    WrongKind {
        expected: &'static str,
        found: String,
    },

    #[error("identifier has no '_' between prefix and ULID")]
    MissingSeparator,

    #[error("malformed ULID: {0}")]
    InvalidUlid(String),
}

impl IdError {
    pub fn is_wrong_kind(&self) -> bool {
        matches!(self, IdError::WrongKind { .. })
    }
}
