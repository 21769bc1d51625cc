use std::fmt;

/// Errors surfaced when opening, sizing or mapping a queue file. Runtime
/// conditions (out-of-slots, ring overflow) are deliberately not errors;
/// the queue handles those through the submit callback or by dropping the
/// add.
#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    /// The backing file's ring or slot region does not decode.
    Corrupt(&'static str),
    /// The requested configuration or file cannot be used as a queue.
    Unsupported(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "io error: {err}"),
            Error::Corrupt(msg) => write!(f, "corrupt queue file: {msg}"),
            Error::Unsupported(msg) => write!(f, "unsupported queue configuration: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Corrupt(_) | Error::Unsupported(_) => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::Io(value)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
