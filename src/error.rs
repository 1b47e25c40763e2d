// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io;
use std::result;

use ffi_support::HandleError;

/// A specialized [`Result`] type for this crate's operations.
///
/// This is generally used to avoid writing out [`Error`] directly and
/// is otherwise a direct mapping to [`Result`].
pub type Result<T, E = Error> = result::Result<T, E>;

/// A list enumerating the categories of errors in this crate.
///
/// [`Error`]: std::error::Error
///
/// This list is intended to grow over time and it is not recommended to
/// exhaustively match against it.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Lifetime conversion failed
    #[error("Lifetime conversion from {0} failed")]
    Lifetime(i32),

    /// IO error
    #[error("An I/O error occurred: {0}")]
    IoError(#[from] io::Error),

    /// JSON error
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Lower-level error from the key-value store
    #[error("Database error: {0}")]
    Rkv(#[from] rkv::StoreError),

    /// Error encoding or decoding persisted data
    #[error("Persisted data could not be (de)serialized: {0}")]
    Serialization(#[from] bincode::Error),

    /// TimeUnit conversion failed
    #[error("TimeUnit conversion from {0} failed")]
    TimeUnit(i32),

    /// MemoryUnit conversion failed
    #[error("MemoryUnit conversion from {0} failed")]
    MemoryUnit(i32),

    /// HistogramType conversion failed
    #[error("HistogramType conversion from {0} failed")]
    HistogramType(i32),

    /// ErrorType conversion failed
    #[error("ErrorType conversion from {0} failed")]
    ErrorType(i32),

    /// A handle was invalid or stale
    #[error("Invalid handle: {0}")]
    Handle(#[from] HandleError),

    /// The engine was used before `initialize`
    #[error("Global Glean object missing")]
    NotInitialized,

    /// `initialize` was called a second time
    #[error("Glean was already initialized")]
    AlreadyInitialized,

    /// The configuration can't be used
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A ping body is larger than the upload limit, even after compression
    #[error("Ping request body size exceeded maximum size allowed: {0}kB.")]
    PingBodySurpassesUploadLimit(usize),
}

/// An error with a [`ErrorKind`] describing the cause.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct Error {
    kind: ErrorKind,
}

impl Error {
    /// Returns a new error with the given kind.
    pub fn new(kind: ErrorKind) -> Error {
        Error { kind }
    }

    /// Returns the kind of the current error instance.
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Indicates the engine is not initialized.
    pub fn not_initialized() -> Error {
        Error {
            kind: ErrorKind::NotInitialized,
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error { kind }
    }
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Error {
        Error {
            kind: ErrorKind::IoError(error),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Error {
        Error {
            kind: ErrorKind::Json(error),
        }
    }
}

impl From<rkv::StoreError> for Error {
    fn from(error: rkv::StoreError) -> Error {
        Error {
            kind: ErrorKind::Rkv(error),
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(error: bincode::Error) -> Error {
        Error {
            kind: ErrorKind::Serialization(error),
        }
    }
}

impl From<HandleError> for Error {
    fn from(error: HandleError) -> Error {
        Error {
            kind: ErrorKind::Handle(error),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn io_errors_keep_their_message() {
        let err: Error = io::Error::new(io::ErrorKind::Other, "disk on fire").into();
        assert!(matches!(err.kind(), ErrorKind::IoError(_)));
        assert_eq!("An I/O error occurred: disk on fire", err.to_string());
    }

    #[test]
    fn conversion_errors_name_the_value() {
        let err: Error = ErrorKind::Lifetime(17).into();
        assert_eq!("Lifetime conversion from 17 failed", err.to_string());
    }
}
