//! Error types for the write-back layer.

use thiserror::Error;

use crate::common::FileHandle;

/// Convenient Result type alias.
///
/// Instead of writing `Result<T, Error>` everywhere, we can write `Result<T>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Result type returned by [`Backend`](crate::storage::Backend) operations.
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// All possible errors surfaced by the write-back layer.
#[derive(Debug, Error)]
pub enum Error {
    /// A downstream storage operation failed.
    ///
    /// This is either the result of the operation the caller issued, or a
    /// failure from an earlier asynchronous flush delivered at this sync point.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The layer was set up with an invalid configuration or backend attachment.
    ///
    /// Fatal: the manager does not start.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An operation was addressed to a handle with no registered session.
    #[error("no session registered for {0}")]
    UnregisteredHandle(FileHandle),

    /// The backend returned a handle that already has a registered session.
    #[error("{0} already has a registered session")]
    HandleInUse(FileHandle),
}

impl Error {
    /// Whether this error is a handle/registry discipline violation.
    ///
    /// Protocol errors are logic errors in the caller or registry and are
    /// never retried.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Error::UnregisteredHandle(_) | Error::HandleInUse(_))
    }

    /// The backend failure carried by this error, if any.
    pub fn backend_error(&self) -> Option<&BackendError> {
        match self {
            Error::Backend(e) => Some(e),
            _ => None,
        }
    }
}

/// An opaque failure reported by a downstream storage operation.
///
/// Carries the POSIX errno the backend reported plus a human readable detail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("backend error (errno {errno}): {message}")]
pub struct BackendError {
    errno: i32,
    message: String,
}

impl BackendError {
    pub const EIO: i32 = 5;
    pub const ENOENT: i32 = 2;
    pub const EBADF: i32 = 9;
    pub const ENOSPC: i32 = 28;

    /// Create a backend error with an explicit errno.
    pub fn new(errno: i32, message: impl Into<String>) -> Self {
        Self {
            errno,
            message: message.into(),
        }
    }

    /// Generic I/O failure (`EIO`).
    pub fn io(message: impl Into<String>) -> Self {
        Self::new(Self::EIO, message)
    }

    /// Out of space (`ENOSPC`).
    pub fn no_space(message: impl Into<String>) -> Self {
        Self::new(Self::ENOSPC, message)
    }

    /// The backend does not know the handle (`EBADF`).
    pub fn bad_handle(message: impl Into<String>) -> Self {
        Self::new(Self::EBADF, message)
    }

    /// The path does not exist (`ENOENT`).
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Self::ENOENT, message)
    }

    #[inline]
    pub fn errno(&self) -> i32 {
        self.errno
    }

    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        let errno = err.raw_os_error().unwrap_or(Self::EIO);
        Self::new(errno, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::UnregisteredHandle(FileHandle::new(7));
        assert_eq!(format!("{}", err), "no session registered for Handle(7)");

        let err = Error::Configuration("aggregate-size must be positive".into());
        assert_eq!(
            format!("{}", err),
            "configuration error: aggregate-size must be positive"
        );

        let err: Error = BackendError::no_space("disk full").into();
        assert_eq!(format!("{}", err), "backend error (errno 28): disk full");
    }

    #[test]
    fn test_protocol_classification() {
        assert!(Error::UnregisteredHandle(FileHandle::new(1)).is_protocol());
        assert!(Error::HandleInUse(FileHandle::new(1)).is_protocol());
        assert!(!Error::Configuration("x".into()).is_protocol());
        assert!(!Error::Backend(BackendError::io("x")).is_protocol());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::from_raw_os_error(BackendError::ENOSPC);
        let err: BackendError = io_err.into();
        assert_eq!(err.errno(), BackendError::ENOSPC);

        // No OS code: falls back to EIO
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err: BackendError = io_err.into();
        assert_eq!(err.errno(), BackendError::EIO);
        assert_eq!(err.message(), "boom");
    }

    #[test]
    fn test_backend_error_accessor() {
        let err: Error = BackendError::bad_handle("gone").into();
        assert_eq!(err.backend_error().map(|e| e.errno()), Some(BackendError::EBADF));
        assert!(Error::Configuration("x".into()).backend_error().is_none());
    }
}
