use std::fmt::Display;

/// CinderKV errors.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// A CRC mismatch or structural decode failure in an on-disk record.
    /// During recovery a corrupt record ends the scan of its file; on the
    /// read path it surfaces to the caller.
    Corrupt(String),
    /// The in-memory index disagrees with on-disk state, e.g. a locator
    /// pointing at a file that no longer exists.
    Inconsistent(String),
    /// Key outside the permitted size bounds, rejected before any I/O.
    InvalidKey(String),
    /// Value too large for the on-disk length prefix, rejected before any I/O.
    InvalidValue(String),
    /// An IO error.
    IO(String),
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Corrupt(msg) => write!(f, "corrupt record: {msg}"),
            Error::Inconsistent(msg) => write!(f, "inconsistent store: {msg}"),
            Error::InvalidKey(msg) => write!(f, "invalid key: {msg}"),
            Error::InvalidValue(msg) => write!(f, "invalid value: {msg}"),
            Error::IO(msg) => write!(f, "io error: {msg}"),
        }
    }
}

/// Constructs an Error::Corrupt for the given format string.
#[macro_export]
macro_rules! errcorrupt {
    ($($args:tt)*) => { $crate::error::Error::Corrupt(format!($($args)*)).into() };
}

/// Constructs an Error::Inconsistent for the given format string.
#[macro_export]
macro_rules! errinconsistent {
    ($($args:tt)*) => { $crate::error::Error::Inconsistent(format!($($args)*)).into() };
}

/// A CinderKV Result returning Error.
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
