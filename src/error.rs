use std::fmt::Display;

/// BarrelDB errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Invalid on-disk data: a CRC or size-cap check failed during decode, or
    /// the hint snapshot is malformed.
    Corruption(String),
    /// A read at a known-valid location came back short.
    Truncation(String),
    /// An IO error from the underlying filesystem.
    Io(String),
    /// Invalid user input, e.g. an empty key where one is required.
    InvalidArgument(String),
    /// The engine or a batch was asked to do something its state forbids,
    /// e.g. committing an oversized batch or a transaction id mismatch
    /// during replay.
    InvalidState(String),
    /// Another process holds the data directory lock.
    LockHeld(String),
    /// The key has no index entry. Internal to the lookup path; the public
    /// `get` collapses this to `Ok(None)`.
    KeyNotFound,
    /// The key's newest record is a tombstone. Internal to the lookup path;
    /// the public `get` collapses this to `Ok(None)`.
    KeyDeleted,
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Corruption(msg) => write!(f, "corruption: {msg}"),
            Error::Truncation(msg) => write!(f, "truncated read: {msg}"),
            Error::Io(msg) => write!(f, "io error: {msg}"),
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Error::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            Error::LockHeld(msg) => write!(f, "data directory locked: {msg}"),
            Error::KeyNotFound => write!(f, "key not found"),
            Error::KeyDeleted => write!(f, "key has been deleted"),
        }
    }
}

/// A BarrelDB Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::Io(err.to_string())
    }
}
