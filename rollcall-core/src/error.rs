use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RollError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("roll integrity mismatch for {path:?}: declared {expected}, computed {actual}")]
    IntegrityMismatch { path: PathBuf, expected: String, actual: String },

    #[error("format/version not supported: {0}")]
    UnsupportedFormat(String),

    #[error("not a valid roll {path:?}: {reason}")]
    MalformedArtifact { path: PathBuf, reason: String },

    #[error("invalid hex encoding: {0}")]
    InvalidEncoding(String),

    #[error("cannot build roll: {0}")]
    Build(String),

    #[error("no roll matching {prefix:?}* found in {dir:?}")]
    NoRoll { dir: PathBuf, prefix: String },

    #[error("retransmit does not match original: {0}")]
    RetransmitMismatch(String),

    #[error("unsafe path {path:?}: {reason}")]
    UnsafePath { path: PathBuf, reason: String },

    #[error("operation cancelled")]
    Cancelled,
}

impl RollError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RollError::Io { path: path.into(), source }
    }

    pub(crate) fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        RollError::MalformedArtifact { path: path.into(), reason: reason.into() }
    }
}

pub type Result<T> = std::result::Result<T, RollError>;
