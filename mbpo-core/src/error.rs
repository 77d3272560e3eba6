//! Errors in the library.
use thiserror::Error;

/// Errors in the library.
#[derive(Error, Debug)]
pub enum MbpoError {
    /// A configuration violates an invariant.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The requested feature is not supported.
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Samples were requested from an empty replay pool.
    #[error("Replay pool is empty, requested {0} samples")]
    EmptyPool(usize),

    /// Array or tensor shapes are inconsistent.
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Record key error.
    #[error("Record key error: {0}")]
    RecordKeyError(String),

    /// Record value type error.
    #[error("Record value type error: {0}")]
    RecordValueTypeError(String),
}
