//! Error types for cache and source operations.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = CacheError> = std::result::Result<T, E>;

/// Every error the cache or its data sources can surface to a caller.
///
/// Variants carry owned context (paths, offsets, rendered causes) so the
/// error is `Clone` and can be parked in a descriptor's last-error slot
/// without giving up the original.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// An empty path was passed to `open`.
    #[error("path must not be empty")]
    EmptyPath,

    /// A seek resolved to a negative offset.
    #[error("seek resolved to a negative offset")]
    InvalidOffset,

    /// The operation is not permitted by the source's open mode, e.g. a
    /// write-back against a source opened read-only.
    #[error("operation not allowed on '{path}' in {mode} mode")]
    InvalidMode { path: String, mode: &'static str },

    /// The handle does not name a live descriptor.
    #[error("no such handle")]
    NoSuchHandle,

    /// The path is already open under another handle.
    #[error("'{0}' is already open")]
    AlreadyOpen(String),

    /// No source exists at the given path.
    #[error("'{0}' not found")]
    NotFound(String),

    /// Every frame is pinned by a pool that refuses to yield a victim.
    /// Reaching this state is an engine invariant violation, not a
    /// recoverable condition.
    #[error("cache exhausted: no evictable frame")]
    CacheExhausted,

    /// The source could not be opened or reopened.
    #[error("cannot open '{path}': {reason}")]
    CantOpen { path: String, reason: String },

    /// A source read failed.
    #[error("cannot read source at offset {offset}: {reason}")]
    CantRead { offset: u64, reason: String },

    /// A source write failed.
    #[error("cannot write source at offset {offset}: {reason}")]
    CantWrite { offset: u64, reason: String },

    /// A read started at or past the end of the stream.
    #[error("end of stream reached")]
    EofReached,
}

impl CacheError {
    pub(crate) fn cant_open(path: &str, err: impl ToString) -> Self {
        CacheError::CantOpen {
            path: path.to_string(),
            reason: err.to_string(),
        }
    }

    pub(crate) fn cant_read(offset: u64, err: impl ToString) -> Self {
        CacheError::CantRead {
            offset,
            reason: err.to_string(),
        }
    }

    pub(crate) fn cant_write(offset: u64, err: impl ToString) -> Self {
        CacheError::CantWrite {
            offset,
            reason: err.to_string(),
        }
    }
}

impl From<CacheError> for std::io::Error {
    fn from(err: CacheError) -> Self {
        use std::io::ErrorKind;

        let kind = match &err {
            CacheError::NotFound(_) => ErrorKind::NotFound,
            CacheError::AlreadyOpen(_) => ErrorKind::AlreadyExists,
            CacheError::InvalidOffset | CacheError::EmptyPath => ErrorKind::InvalidInput,
            CacheError::EofReached => ErrorKind::UnexpectedEof,
            CacheError::InvalidMode { .. } => ErrorKind::PermissionDenied,
            _ => ErrorKind::Other,
        };
        std::io::Error::new(kind, err)
    }
}
