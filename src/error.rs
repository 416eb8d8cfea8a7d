//! Error taxonomy for the document store.
//!
//! One variant per failure kind the store can produce. Index-level failures
//! are raised only after the index (or indexes) affected have been rolled
//! back to their pre-operation state; persistence failures are raised after
//! any in-memory mutation has already taken effect.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error during {op}: {source}")]
    IoError {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("datafile is corrupt: {ratio:.3} of lines failed to parse (threshold {threshold:.3})")]
    CorruptLog { ratio: f64, threshold: f64 },

    #[error("beforeSerialization/afterSerialization hooks are not inverse of each other")]
    HookNotInvertible,

    #[error("unique constraint violated on field {field}: key {key} already present")]
    UniqueViolated { field: String, key: String },

    #[error("invalid key in document: {reason}")]
    InvalidKey { reason: String },

    #[error("invalid modifier: {reason}")]
    InvalidModifier { reason: String },

    #[error("projection mixes inclusion and exclusion: {reason}")]
    MixedProjection { reason: String },

    #[error("ensureIndex called without a fieldName")]
    MissingFieldName,

    #[error("unknown operator: {operator}")]
    UnknownOperator { operator: String },

    #[error("attempted to index an unsupported composite value on field {field}")]
    InvalidIndexField { field: String },
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Error::IoError { op: "io", source }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
