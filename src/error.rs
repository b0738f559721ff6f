use std::fmt::Display;

/// Pagemark errors.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// Invalid or corrupt bitmap data, typically decoding errors or checksum
    /// mismatches in bitmap files.
    InvalidData(String),
    /// A redo log block failed checksum validation. The redo log belongs to
    /// the enclosing database; a mismatch means its own log is corrupt, so
    /// the embedder usually treats this as fatal.
    LogChecksum(String),
    /// The bitmap directory changed incompatibly between the two enumeration
    /// passes of the file range resolver.
    InconsistentDirectory(String),
    /// An IO error.
    IO(String),
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::InvalidData(msg) => write!(f, "invalid data: {msg}"),
            Error::LogChecksum(msg) => write!(f, "redo log block checksum mismatch: {msg}"),
            Error::InconsistentDirectory(msg) => write!(f, "inconsistent bitmap directory: {msg}"),
            Error::IO(msg) => write!(f, "io error: {msg}"),
        }
    }
}

/// Constructs an Error::InvalidData for the given format string.
#[macro_export]
macro_rules! errdata {
    ($($args:tt)*) => { $crate::error::Error::InvalidData(format!($($args)*)).into() };
}

/// A pagemark Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl<T> From<Error> for Result<T> {
    fn from(error: Error) -> Self {
        Err(error)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IO(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::IO(err.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::IO(err.to_string())
    }
}
