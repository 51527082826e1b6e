//! Model error type.

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// Failure to construct or parse a model value.
///
/// Transport and storage failures live in the session crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Rejected input, such as a blank token or an unknown capability name.
    #[error("invalid value: {0}")]
    Validation(String),

    /// A numeric identifier that does not parse.
    #[error("malformed id: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
