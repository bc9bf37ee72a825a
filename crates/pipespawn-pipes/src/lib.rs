//! # pipespawn pipes
//!
//! The named pipe fabric: naming, creating and connecting the three stdio
//! pipes of one child, plus the anonymous pipes of the control channel.
//!
//! Every pipe has two asymmetric roles:
//! - the **server** end is created by the caller and kept for the lifetime
//!   of the child ([`PendingPipe`] until the child exists, then a
//!   [`PipeStream`]);
//! - the **client** end is opened by the launcher worker at process
//!   creation time and handed to the child as an inherited standard handle
//!   ([`ChildPipe`]).
//!
//! On Windows the namespace is `\\.\pipe\` and pipes are real named pipes.
//! On unix the namespace is a directory and pipes are FIFOs.

pub mod fabric;
pub mod naming;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix as sys;

#[cfg(windows)]
mod win32;
#[cfg(windows)]
use win32 as sys;

pub use fabric::{anonymous_pipe, ChildPipe, PendingPipe, PipeFabric, PipeStream, SystemPipes};
pub use naming::{PipeName, PipeNamespace};
