use std::{fmt, result};

/// Error variants that are returned by this package's API.
///
/// Each variant carries a prefix, typically identifying the
/// error location, along with a descriptive message.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    Fatal(String, String),
    IOError(String, String),
    InvalidFile(String, String),
    InvalidInput(String, String),
    KeyNotFound(String, String),
    FailConvert(String, String),
    FailCbor(String, String),
    IPCFail(String, String),
    ThreadFail(String, String),
    Canceled(String, String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        use Error::*;

        match self {
            Fatal(p, msg) => write!(f, "{} Fatal: {}", p, msg),
            IOError(p, msg) => write!(f, "{} IOError: {}", p, msg),
            InvalidFile(p, msg) => write!(f, "{} InvalidFile: {}", p, msg),
            InvalidInput(p, msg) => write!(f, "{} InvalidInput: {}", p, msg),
            KeyNotFound(p, msg) => write!(f, "{} KeyNotFound: {}", p, msg),
            FailConvert(p, msg) => write!(f, "{} FailConvert: {}", p, msg),
            FailCbor(p, msg) => write!(f, "{} FailCbor: {}", p, msg),
            IPCFail(p, msg) => write!(f, "{} IPCFail: {}", p, msg),
            ThreadFail(p, msg) => write!(f, "{} ThreadFail: {}", p, msg),
            Canceled(p, msg) => write!(f, "{} Canceled: {}", p, msg),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    /// Return whether this error is due to cooperative cancellation.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::Canceled(_, _))
    }
}
