use thiserror::Error;

/// A siltdb Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

/// siltdb errors.
#[derive(Debug, Error)]
pub enum Error {
    /// The store options are unusable, typically a missing id function.
    #[error("store is misconfigured: {0}")]
    Misconfigured(String),

    /// The identifier function refused a value. The write was aborted before
    /// anything reached the log.
    #[error("identity error: {0}")]
    Identity(String),

    /// A validator refused a write. The write was aborted before anything
    /// reached the log.
    #[error("write rejected: {0}")]
    Rejected(String),

    /// Persisted data could not be decoded, typically corruption or an
    /// incompatible change to the record type.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// An IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A mutation was attempted after the store was closed.
    #[error("store is closed")]
    Closed,

    /// A store lock was poisoned by a panic in an earlier operation.
    #[error("lock poisoned: {0}")]
    Poisoned(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidData(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::Poisoned(err.to_string())
    }
}
