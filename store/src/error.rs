//! Error types shared by every module in the store crate.
//!
//! Mirrors the teacher's own `kv::error` module: a flat enum with a few
//! broad variants plus `From` conversions, rather than one variant per
//! failure site.

use std::fmt;

pub type CResult<T> = Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// Filesystem / OS-level failure opening, reading or writing the engine.
    Io(std::io::Error),
    /// A record failed to encode or decode through the bincode codec.
    Codec(String),
    /// The change-file could not be parsed.
    Parse(String),
    /// Any other internal invariant violation.
    Internal(String),
    /// A plain message, used where the teacher's code raises `Error::Value`.
    Value(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "io error: {err}"),
            Error::Codec(msg) => write!(f, "codec error: {msg}"),
            Error::Parse(msg) => write!(f, "parse error: {msg}"),
            Error::Internal(msg) => write!(f, "internal error: {msg}"),
            Error::Value(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<Box<bincode::ErrorKind>> for Error {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        Error::Codec(err.to_string())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn displays_message() {
        let err = Error::Value("boom".to_string());
        assert_eq!(err.to_string(), "boom");
    }
}
