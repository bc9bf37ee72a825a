//! # pipespawn launcher
//!
//! Spawns child processes with redirected standard streams through a
//! single worker thread.
//!
//! ```text
//! caller ──Launcher──► command pipe ──► worker thread ──► OS process creation
//!        ◄──────────── response pipe ◄──
//! ```
//!
//! A child's standard streams are either inherited from the caller or
//! wired to process-owned named pipes. The caller creates the server end of
//! each pipe; the worker connects the client end and hands it to the child.
//!
//! ```no_run
//! use pipespawn_launcher::{Launcher, LauncherConfig, StreamSlot};
//! use std::io::Read;
//!
//! let launcher = Launcher::new(LauncherConfig::default());
//! let mut handle = launcher.launch(
//!     "/bin/echo",
//!     &["echo", "hello"],
//!     StreamSlot::StandardIn,
//!     StreamSlot::ProcessOwnedOut,
//!     StreamSlot::StandardErr,
//!     1,
//! )?;
//! let mut out = String::new();
//! handle.output().expect("piped").read_to_string(&mut out)?;
//! let _state = launcher.retrieve_state(handle.pid(), true);
//! launcher.delete_pipes(handle)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod handle;
pub mod launcher;
mod worker;

pub use config::LauncherConfig;
pub use handle::ProcessHandle;
pub use launcher::Launcher;
pub use pipespawn_common::{
    Error, FatalError, Pid, PipeTag, ProcessState, ProcessStateRecord, Result, StreamSlot,
};
