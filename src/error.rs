use serde_derive::{Deserialize, Serialize};

/// A replog error. Errors are passed in channel replies and may span
/// process boundaries, so they are serializable and must be owned (e.g.
/// String rather than an inner error type).
///
/// Violated internal invariants (e.g. an anti-quorum at or above the
/// replication factor, or a zero subsequence on the wire) are not errors
/// but programming bugs, and panic instead.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Error {
    /// The operation can no longer complete in this epoch, e.g. because
    /// the epoch was ended or superseded by a newer recovery. The caller
    /// should retry against the new epoch.
    Abort,
    /// Invalid data, e.g. a corrupt wire frame or core state.
    InvalidData(String),
    /// An invalid argument from the caller.
    InvalidInput(String),
    /// An IO or channel error. The remote end may or may not have
    /// processed the request.
    IO(String),
    /// The log system is recovered for reads only; pushes are refused
    /// until a new epoch is started.
    ReadOnly,
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Abort => write!(f, "operation aborted"),
            Error::InvalidData(msg) => write!(f, "invalid data: {msg}"),
            Error::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            Error::IO(msg) => write!(f, "io error: {msg}"),
            Error::ReadOnly => write!(f, "log system is read-only until a new epoch starts"),
        }
    }
}

/// Constructs an Error::InvalidData via format!() and into().
#[macro_export]
macro_rules! errdata {
    ($($args:tt)*) => { $crate::error::Error::InvalidData(format!($($args)*)).into() };
}

/// Constructs an Error::InvalidInput via format!() and into().
#[macro_export]
macro_rules! errinput {
    ($($args:tt)*) => { $crate::error::Error::InvalidInput(format!($($args)*)).into() };
}

/// Allows converting an Error directly to a Result, so that the
/// errdata!/errinput! macros can be used both where an Error and where
/// a Result is expected.
impl<T> From<Error> for Result<T> {
    fn from(error: Error) -> Self {
        Err(error)
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::InvalidData(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IO(err.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Error::IO("channel receiver closed".to_string())
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for Error {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        Error::IO("channel sender closed".to_string())
    }
}

impl From<tokio::sync::watch::error::RecvError> for Error {
    fn from(_: tokio::sync::watch::error::RecvError) -> Self {
        Error::IO("watch sender closed".to_string())
    }
}

/// A replog Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;
