//! Data lake error types.
//!
//! Every lake and backend operation returns [`LakeError`].  Provider
//! specific failures (transport, auth, rejected requests) are carried as
//! [`LakeError::Backend`] so callers can tell "object absent" apart from
//! "network down".

use std::path::PathBuf;
use std::string::FromUtf8Error;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, LakeError>;

/// Failure modes of the data lake.
#[derive(Debug, Error)]
pub enum LakeError {
    /// No object is stored at the requested location.
    #[error("no object at `{path}` in bucket `{bucket}`")]
    NotFound { bucket: String, path: String },

    /// The bucket path cannot address an object.
    #[error("bucket path `{path}` is invalid: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    /// The bucket name is not usable.
    #[error("bucket name `{name}` is invalid: {reason}")]
    InvalidBucket { name: String, reason: &'static str },

    /// A local file could not be read or written.
    #[error("local file `{}`: {source}", path.display())]
    LocalIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Object content is not valid UTF-8.
    #[error("object `{path}` in bucket `{bucket}` is not valid UTF-8")]
    Decode {
        bucket: String,
        path: String,
        #[source]
        source: FromUtf8Error,
    },

    /// The backend refused the write because it is full.
    #[error("storage limit exceeded: current={current}, additional={additional}, max={max}")]
    CapacityExceeded {
        current: u64,
        additional: u64,
        max: u64,
    },

    /// Transport, authentication or provider-side failure.
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl LakeError {
    /// Short, stable identifier for logs and metric labels.
    pub fn code(&self) -> &'static str {
        match self {
            LakeError::NotFound { .. } => "NotFound",
            LakeError::InvalidPath { .. } => "InvalidPath",
            LakeError::InvalidBucket { .. } => "InvalidBucket",
            LakeError::LocalIo { .. } => "LocalIo",
            LakeError::Decode { .. } => "Decode",
            LakeError::CapacityExceeded { .. } => "CapacityExceeded",
            LakeError::Backend(_) => "Backend",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, LakeError::NotFound { .. })
    }

    /// Whether repeating the same call might succeed.
    ///
    /// Only provider failures qualify; every other variant is caused by the
    /// request itself or by local state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LakeError::Backend(_))
    }

    pub(crate) fn not_found(bucket: &str, path: &str) -> Self {
        LakeError::NotFound {
            bucket: bucket.to_string(),
            path: path.to_string(),
        }
    }

    pub(crate) fn local_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LakeError::LocalIo {
            path: path.into(),
            source,
        }
    }
}
