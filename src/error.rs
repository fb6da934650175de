/// Error types for the mmdbkit library
use std::fmt;
use std::io;
use std::net::IpAddr;

/// Result type alias for database operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for database operations
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The file is not a structurally valid MaxMind DB
    InvalidDatabase(String),

    /// A decode ran past the end of the mapped buffer
    OffsetOverrun,

    /// The destination type cannot hold the stored value
    UnmarshalType {
        /// Textual rendering of the stored value
        value: String,
        /// Description of the destination type
        dest: String,
    },

    /// An IPv6 address was looked up in an IPv4-only database
    IpVersionMismatch(IpAddr),

    /// A network argument is unusable against this database
    InvalidNetwork(String),

    /// The reader was closed
    Closed,

    /// I/O errors while opening or mapping the file
    Io(String),

    /// Errors raised by a destination type during binding
    Decoding(String),

    /// Contextual wrapper carrying the offset (and decode path) at which
    /// the source error was observed. Allocated only on the error path.
    Context {
        /// Data-section offset where the failure was observed
        offset: usize,
        /// Slash-delimited map-key/slice-index path, when known
        path: Option<String>,
        /// The underlying error
        source: Box<Error>,
    },
}

impl Error {
    /// Wrap with the data-section offset where the failure was observed.
    ///
    /// Errors that already carry an offset are left untouched so the
    /// innermost location wins.
    pub(crate) fn at_offset(self, offset: usize) -> Error {
        match self {
            Error::Context { .. } => self,
            other => Error::Context {
                offset,
                path: None,
                source: Box::new(other),
            },
        }
    }

    /// Prepend a map-key segment to the decode path.
    pub(crate) fn in_field(self, segment: &str) -> Error {
        self.prepend_path(segment)
    }

    /// Prepend a slice-index segment to the decode path.
    pub(crate) fn at_index(self, index: usize) -> Error {
        self.prepend_path(&index.to_string())
    }

    fn prepend_path(self, segment: &str) -> Error {
        match self {
            Error::Context {
                offset,
                path,
                source,
            } => {
                let path = match path {
                    Some(rest) => format!("/{segment}{rest}"),
                    None => format!("/{segment}"),
                };
                Error::Context {
                    offset,
                    path: Some(path),
                    source,
                }
            }
            other => Error::Context {
                offset: 0,
                path: Some(format!("/{segment}")),
                source: Box::new(other),
            },
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidDatabase(msg) => write!(f, "invalid database: {msg}"),
            Error::OffsetOverrun => write!(f, "unexpected end of database"),
            Error::UnmarshalType { value, dest } => {
                write!(f, "cannot unmarshal {value} into {dest}")
            }
            Error::IpVersionMismatch(addr) => write!(
                f,
                "error looking up '{addr}': you attempted to look up an IPv6 address in an IPv4-only database"
            ),
            Error::InvalidNetwork(msg) => write!(f, "invalid network: {msg}"),
            Error::Closed => write!(f, "the database has been closed"),
            Error::Io(msg) => write!(f, "I/O error: {msg}"),
            Error::Decoding(msg) => write!(f, "decoding error: {msg}"),
            Error::Context {
                offset,
                path,
                source,
            } => match path {
                Some(path) => write!(f, "at offset {offset}, path {path}: {source}"),
                None => write!(f, "at offset {offset}: {source}"),
            },
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Context { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<ipnetwork::IpNetworkError> for Error {
    fn from(err: ipnetwork::IpNetworkError) -> Self {
        Error::InvalidNetwork(err.to_string())
    }
}

impl serde::de::Error for Error {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Error::Decoding(msg.to_string())
    }

    fn invalid_type(unexp: serde::de::Unexpected<'_>, exp: &dyn serde::de::Expected) -> Self {
        Error::UnmarshalType {
            value: unexp.to_string(),
            dest: exp.to_string(),
        }
    }

    fn invalid_value(unexp: serde::de::Unexpected<'_>, exp: &dyn serde::de::Expected) -> Self {
        Error::UnmarshalType {
            value: unexp.to_string(),
            dest: exp.to_string(),
        }
    }
}
