//! # pipespawn common
//!
//! Types and errors shared by every pipespawn crate.
//!
//! The launcher is split the same way a process manager usually is: a wire
//! codec, a named pipe fabric, an OS process layer and the worker/API on
//! top. All of them agree on the vocabulary defined here.

pub mod errors;
pub mod fatal;
pub mod types;

// Re-export commonly used items
pub use errors::{Error, Result};
pub use fatal::{FatalError, OrTerminate};
pub use types::{
    Pid, PipeKind, PipeTag, ProcessState, ProcessStateRecord, StdioDirection, StdioSpec,
    StreamSlot,
};
