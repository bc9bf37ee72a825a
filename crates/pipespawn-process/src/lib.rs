//! # pipespawn process
//!
//! Low-level process operations used by the launcher worker:
//! - process creation with explicit standard handles
//! - argv flattening into a Windows command line
//! - process state queries (poll or wait), with terminal states cached
//! - process existence checks
//!
//! Everything here runs on the launcher worker thread only.

pub mod check;
pub mod command_line;
pub mod execute;
pub mod table;

// Re-export main types
pub use check::process_exists;
pub use command_line::command_line_from_argv;
pub use execute::{error_code, spawn_process, ChildStdio, SpawnRequest, SpawnedChild};
pub use table::ProcessTable;
