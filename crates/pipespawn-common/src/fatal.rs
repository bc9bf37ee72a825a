//! Unrecoverable conditions.
//!
//! The control channel carries no request identifiers, so once a message is
//! lost or garbled the caller and the worker can never resynchronize. Such
//! conditions terminate the whole process with a diagnostic.

use std::io;
use thiserror::Error;

/// A broken invariant of the control channel.
#[derive(Debug, Error)]
pub enum FatalError {
    /// The worker read an opcode it does not know.
    #[error("Illegal command: {0}")]
    UnknownCommand(u8),

    /// A payload could not be decoded.
    #[error("Malformed control message: {0}")]
    Malformed(String),

    /// Reading or writing the control channel failed.
    #[error("Control channel I/O error: {0}")]
    ChannelIo(#[source] io::Error),

    /// The worker went away while the caller was waiting for a response.
    #[error("Control channel closed while awaiting a response")]
    ChannelClosed,

    /// The worker thread or its control pipes could not be created.
    #[error("Launcher worker failed to start: {0}")]
    WorkerStart(#[source] io::Error),

    /// A state query was issued before the worker was started.
    #[error("Launcher not initialized.")]
    NotInitialized,
}

impl FatalError {
    /// Report the condition and exit the process.
    pub fn terminate(self) -> ! {
        tracing::error!("fatal launcher error: {}", self);
        eprintln!("{}", self);
        std::process::exit(-1)
    }
}

/// Turns a `Result<T, FatalError>` into `T`, terminating on error.
pub trait OrTerminate<T> {
    fn or_terminate(self) -> T;
}

impl<T> OrTerminate<T> for std::result::Result<T, FatalError> {
    fn or_terminate(self) -> T {
        match self {
            Ok(value) => value,
            Err(fatal) => fatal.terminate(),
        }
    }
}
