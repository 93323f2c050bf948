//! Error types shared by the field store, the expire machinery and the
//! configuration layer.
//!
//! Messages follow Redis reply conventions so a command layer can forward
//! them to clients unchanged.

use thiserror::Error;

/// Errors returned by field and container operations.
///
/// Every validation error is produced before any state is touched, so a
/// failed call leaves the container exactly as it was.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HashError {
    /// Conflicting or malformed option combination.
    #[error("ERR syntax error")]
    Syntax,

    /// The key holds a value that is not a hash container.
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    TypeMismatch,

    /// A `MATCH` or `GT` version check failed.
    #[error("ERR update version is stale")]
    VersionConflict,

    /// Integer overflow, bound violation, NaN or infinity.
    #[error("ERR increment or decrement would overflow")]
    Overflow,

    /// The field or container does not exist (or has expired).
    #[error("ERR no such field")]
    NotFound,

    /// The stored value cannot be parsed as a 64-bit integer.
    #[error("ERR value is not an integer")]
    NotInteger,

    /// The stored value cannot be parsed as a float.
    #[error("ERR value is not a valid float")]
    NotFloat,

    /// The database number is outside the configured range.
    #[error("ERR DB index is out of range")]
    InvalidDb(usize),

    /// A serialized container could not be decoded.
    #[error("ERR corrupt container payload: {0}")]
    Corrupt(String),

    /// An internal invariant was violated. Structures can no longer be trusted.
    #[error("ERR internal error: {0}")]
    Internal(String),
}

impl HashError {
    /// Returns true for errors that mean the process state is broken.
    pub fn is_fatal(&self) -> bool {
        matches!(self, HashError::Internal(_))
    }
}

/// Result alias for field and container operations.
pub type Result<T> = std::result::Result<T, HashError>;

/// Errors produced while parsing [`crate::config::ExpireConfig`] arguments.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Arguments must come in `name value` pairs.
    #[error("invalid number of arguments: expected name/value pairs, got {0} items")]
    OddArguments(usize),

    /// The option name is not recognized.
    #[error("unrecognized option '{0}'")]
    UnknownOption(String),

    /// The option value could not be parsed.
    #[error("invalid value '{value}' for {option}")]
    InvalidValue { option: String, value: String },
}
