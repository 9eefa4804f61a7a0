use std::fmt;

/// Errors produced while importing or exporting a database.
pub enum Error {
    /// The requested file could not be opened for reading.
    FileNotFound,

    /// The byte stream violates the container grammar: wrong magic bytes,
    /// an unsupported version, an unknown cipher or field tag, malformed XML,
    /// a dangling reference, or a malformed key file.
    Format(&'static str),

    /// Key derivation completed but the payload failed authentication. This
    /// is what a wrong passphrase or key file looks like.
    BadPassword,

    /// An unexpected short read/write, a hashed-block checksum failure or a
    /// gzip error.
    Io(std::io::Error),

    /// An invariant violation that indicates a bug rather than bad input.
    /// Callers should treat this as fatal.
    Internal(&'static str),
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::FileNotFound => write!(f, "Error::FileNotFound"),
            Error::Format(message) => write!(f, "Error::Format({})", message),
            Error::BadPassword => write!(f, "Error::BadPassword"),
            Error::Io(ref source) => write!(f, "Error::Io({:?})", source),
            Error::Internal(message) => write!(f, "Error::Internal({})", message),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::FileNotFound => write!(f, "File not found"),
            Error::Format(message) => write!(f, "Bad file format `{}`", message),
            Error::BadPassword => write!(f, "Invalid password"),
            Error::Io(ref source) => write!(f, "IO error `{}`", source),
            Error::Internal(message) => write!(f, "Internal error `{}`", message),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(ref source) => Some(source),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::Io(err)
    }
}
