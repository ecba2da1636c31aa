use std::io;
use std::result;

use thiserror::Error;

/// Custom result type for pool, proxy and stream operations
pub type Result<T> = result::Result<T, Error>;

/// Errors reported by the pooling and paged-stream layers
#[derive(Debug, Error)]
pub enum Error {
    /// A logical sub-stream starts inside a page trailer
    #[error("logical stream at physical offset {base} starts inside a page trailer")]
    InvalidOffset { base: u64 },
    /// Page size / trailer size combination is not usable
    #[error("invalid page layout: page size {page_size}, trailer size {trailer_size}")]
    InvalidPageLayout { page_size: u64, trailer_size: u64 },
    /// Seek whence/offset combination is not supported
    #[error("unsupported seek: offset {offset} from {whence}")]
    UnsupportedSeek { offset: u64, whence: &'static str },
    /// Every pooled entry is referenced
    #[error(
        "too many threads or resources referenced at once ({capacity}); \
         raise MAX_DATASET_POOL_SIZE"
    )]
    PoolExhausted { capacity: usize },
    /// The underlying resource could not be opened
    #[error("cannot open '{path}': {reason}")]
    ResolutionFailed { path: String, reason: String },
    /// A trailer skip came back short
    #[error("short read while skipping page trailer at physical offset {offset}")]
    MalformedTrailer { offset: u64 },
    /// The pool was force-destroyed
    #[error("resource pool has been destroyed")]
    PoolDestroyed,
    /// The opening thread re-entered the pool for the resource it is opening
    #[error("recursive open of '{path}'")]
    RecursiveOpen { path: String },
    /// Band index outside 1..=count
    #[error("band {index} out of range (1..={count})")]
    BandOutOfRange { index: usize, count: usize },
    /// Overview level missing or inconsistent
    #[error("invalid overview: {0}")]
    InvalidOverview(String),
    /// Write attempted on a read-only resource
    #[error("resource is read-only")]
    ReadOnly,
    /// Operation not implemented by this resource
    #[error("operation not supported: {0}")]
    NotSupported(&'static str),
    /// Caller buffer does not match the requested window
    #[error("buffer too small: need {needed} bytes, got {got}")]
    BufferTooSmall { needed: usize, got: usize },
    /// Requested item does not exist
    #[error("not found: {0}")]
    NotFound(String),
    /// Internal handle handed out by a pooled façade
    #[error("internal handle of pooled dataset '{path}' becomes invalid once the pool evicts it")]
    PooledInternalHandle { path: String },
    /// I/O failure from a raw handle
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Machine-checkable error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidOffset,
    UnsupportedSeek,
    PoolExhausted,
    ResolutionFailed,
    MalformedTrailer,
    AppDefined,
    NotSupported,
    Io,
}

impl Error {
    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidOffset { .. } | Error::InvalidPageLayout { .. } => {
                ErrorKind::InvalidOffset
            }
            Error::UnsupportedSeek { .. } => ErrorKind::UnsupportedSeek,
            Error::PoolExhausted { .. } => ErrorKind::PoolExhausted,
            Error::ResolutionFailed { .. }
            | Error::PoolDestroyed
            | Error::RecursiveOpen { .. } => ErrorKind::ResolutionFailed,
            Error::MalformedTrailer { .. } => ErrorKind::MalformedTrailer,
            Error::NotSupported(_) | Error::ReadOnly => ErrorKind::NotSupported,
            Error::Io(_) => ErrorKind::Io,
            Error::BandOutOfRange { .. }
            | Error::InvalidOverview(_)
            | Error::BufferTooSmall { .. }
            | Error::NotFound(_)
            | Error::PooledInternalHandle { .. } => ErrorKind::AppDefined,
        }
    }

    /// Build a resolution failure for `path`
    pub(crate) fn resolution(path: &str, reason: impl ToString) -> Self {
        Error::ResolutionFailed {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        match err {
            Error::Io(e) => e,
            other => {
                let kind = match &other {
                    Error::UnsupportedSeek { .. } | Error::InvalidOffset { .. } => {
                        io::ErrorKind::InvalidInput
                    }
                    Error::ReadOnly => io::ErrorKind::PermissionDenied,
                    _ => io::ErrorKind::Other,
                };
                io::Error::new(kind, other)
            }
        }
    }
}
