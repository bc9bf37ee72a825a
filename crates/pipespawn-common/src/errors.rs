//! Recoverable error types.
//!
//! Everything in here is returned to the immediate caller of the public
//! API. Conditions that leave the control channel unusable are not errors
//! but [`FatalError`](crate::FatalError)s.

use crate::types::PipeTag;
use std::io;
use thiserror::Error;

/// Result type alias for launcher operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for launcher operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid input (bad stream slot combination, empty executable, ...).
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// The pipe tag is still held by a process whose pipes were not deleted.
    #[error("Pipe tag {tag} is already in use by a live process")]
    PipeTagInUse { tag: PipeTag },

    /// Creating the caller side of a named pipe failed.
    #[error("Failed to create named pipe {name}: {source}")]
    PipeCreate {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Connecting to a named pipe failed.
    #[error("Failed to connect named pipe {name}: {source}")]
    PipeConnect {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Closing the caller's end of a named pipe failed.
    #[error("Failed to close named pipe {name}: {source}")]
    PipeClose {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Removing a named pipe object failed.
    #[error("Failed to remove named pipe {name}: {source}")]
    PipeRemove {
        name: String,
        #[source]
        source: io::Error,
    },

    /// The OS refused to create the process. `source` carries the OS error
    /// code reported by the launcher worker.
    #[error("Process spawn failed: {executable} - {source}")]
    SpawnFailed {
        executable: String,
        #[source]
        source: io::Error,
    },

    /// I/O error (wraps std::io::Error).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Creates a Validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn pipe_tag_in_use(tag: PipeTag) -> Self {
        Self::PipeTagInUse { tag }
    }

    pub fn pipe_create(name: impl Into<String>, source: io::Error) -> Self {
        Self::PipeCreate {
            name: name.into(),
            source,
        }
    }

    pub fn pipe_connect(name: impl Into<String>, source: io::Error) -> Self {
        Self::PipeConnect {
            name: name.into(),
            source,
        }
    }

    pub fn pipe_close(name: impl Into<String>, source: io::Error) -> Self {
        Self::PipeClose {
            name: name.into(),
            source,
        }
    }

    pub fn pipe_remove(name: impl Into<String>, source: io::Error) -> Self {
        Self::PipeRemove {
            name: name.into(),
            source,
        }
    }

    /// Creates a SpawnFailed error from the raw OS error code sent back by
    /// the launcher worker.
    pub fn spawn_failed(executable: impl Into<String>, os_code: i32) -> Self {
        Self::SpawnFailed {
            executable: executable.into(),
            source: io::Error::from_raw_os_error(os_code),
        }
    }

    /// Returns the underlying OS error, if this error wraps one.
    pub fn io_error(&self) -> Option<&io::Error> {
        match self {
            Self::PipeCreate { source, .. }
            | Self::PipeConnect { source, .. }
            | Self::PipeClose { source, .. }
            | Self::PipeRemove { source, .. }
            | Self::SpawnFailed { source, .. }
            | Self::Io(source) => Some(source),
            Self::Validation { .. } | Self::PipeTagInUse { .. } => None,
        }
    }

    /// True when the underlying OS error means "file not found".
    pub fn is_not_found(&self) -> bool {
        self.io_error()
            .map(|e| e.kind() == io::ErrorKind::NotFound)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::validation("bad slot");
        assert!(matches!(err, Error::Validation { .. }));
        assert_eq!(err.to_string(), "Validation error: bad slot");
    }

    #[test]
    fn test_spawn_failed_keeps_os_code() {
        #[cfg(unix)]
        let code = 2; // ENOENT
        #[cfg(windows)]
        let code = 2; // ERROR_FILE_NOT_FOUND

        let err = Error::spawn_failed("/no/such/file", code);
        assert!(err.is_not_found());
        assert_eq!(err.io_error().and_then(|e| e.raw_os_error()), Some(code));
        assert!(err.to_string().contains("/no/such/file"));
    }

    #[test]
    fn test_pipe_tag_in_use_has_no_io_error() {
        let err = Error::pipe_tag_in_use(4);
        assert!(err.io_error().is_none());
        assert!(!err.is_not_found());
        assert!(err.to_string().contains('4'));
    }
}
