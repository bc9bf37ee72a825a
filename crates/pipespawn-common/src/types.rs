//! Core domain types used throughout the launcher.

use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Platform-width process identifier as it travels over the control channel.
pub type Pid = i64;

/// Caller-chosen integer that disambiguates concurrently live children.
pub type PipeTag = i32;

/// Coarse run state of a spawned process.
///
/// The discriminants are the wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    /// Process is still running
    Running = 0,
    /// Process exited normally
    Done = 1,
    /// Process was killed by a signal
    Terminated = 2,
    /// Process is stopped (job control)
    Stopped = 3,
}

impl ProcessState {
    /// Wire code of this state.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Parse a wire code.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(ProcessState::Running),
            1 => Some(ProcessState::Done),
            2 => Some(ProcessState::Terminated),
            3 => Some(ProcessState::Stopped),
            _ => None,
        }
    }

    /// Once a process reaches a terminal state it never leaves it.
    pub fn is_terminal(self) -> bool {
        matches!(self, ProcessState::Done | ProcessState::Terminated)
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessState::Running => write!(f, "running"),
            ProcessState::Done => write!(f, "done"),
            ProcessState::Terminated => write!(f, "terminated"),
            ProcessState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Point-in-time snapshot returned by a state query.
///
/// `exit_code` is the exit status for `Done`, the signal number for
/// `Terminated` and `Stopped`, and zero while `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessStateRecord {
    pub state: ProcessState,
    pub exit_code: i32,
}

impl ProcessStateRecord {
    pub fn new(state: ProcessState, exit_code: i32) -> Self {
        Self { state, exit_code }
    }

    pub fn running() -> Self {
        Self::new(ProcessState::Running, 0)
    }

    pub fn done(exit_code: i32) -> Self {
        Self::new(ProcessState::Done, exit_code)
    }

    pub fn terminated(signal: i32) -> Self {
        Self::new(ProcessState::Terminated, signal)
    }

    pub fn stopped(signal: i32) -> Self {
        Self::new(ProcessState::Stopped, signal)
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

impl fmt::Display for ProcessStateRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.state, self.exit_code)
    }
}

/// One of the three process-owned pipes a child can be wired to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PipeKind {
    In,
    Out,
    Err,
}

impl PipeKind {
    pub const ALL: [PipeKind; 3] = [PipeKind::In, PipeKind::Out, PipeKind::Err];

    /// Suffix appended to the pipe prefix to name this pipe.
    pub fn suffix(self) -> &'static str {
        match self {
            PipeKind::In => "_in",
            PipeKind::Out => "_out",
            PipeKind::Err => "_err",
        }
    }

    pub fn from_suffix(suffix: &str) -> Option<Self> {
        PipeKind::ALL.into_iter().find(|kind| kind.suffix() == suffix)
    }

    /// True when the caller writes into this pipe and the child reads it.
    pub fn is_child_input(self) -> bool {
        matches!(self, PipeKind::In)
    }
}

/// A standard stream of the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StdioDirection {
    Input,
    Output,
    Error,
}

impl fmt::Display for StdioDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StdioDirection::Input => write!(f, "input"),
            StdioDirection::Output => write!(f, "output"),
            StdioDirection::Error => write!(f, "error"),
        }
    }
}

/// Caller-facing choice of where one stdio direction of the child goes.
///
/// The discriminants are the codes callers pass across language bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamSlot {
    StandardIn = 0,
    StandardOut = 1,
    ProcessOwnedIn = 2,
    ProcessOwnedOut = 3,
    StandardErr = 4,
    ProcessOwnedErr = 5,
}

impl StreamSlot {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(StreamSlot::StandardIn),
            1 => Some(StreamSlot::StandardOut),
            2 => Some(StreamSlot::ProcessOwnedIn),
            3 => Some(StreamSlot::ProcessOwnedOut),
            4 => Some(StreamSlot::StandardErr),
            5 => Some(StreamSlot::ProcessOwnedErr),
            _ => None,
        }
    }

    /// The dedicated pipe backing this slot, or `None` for pass-through slots.
    pub fn pipe(self) -> Option<PipeKind> {
        match self {
            StreamSlot::ProcessOwnedIn => Some(PipeKind::In),
            StreamSlot::ProcessOwnedOut => Some(PipeKind::Out),
            StreamSlot::ProcessOwnedErr => Some(PipeKind::Err),
            StreamSlot::StandardIn | StreamSlot::StandardOut | StreamSlot::StandardErr => None,
        }
    }

    fn allowed_for(self, direction: StdioDirection) -> bool {
        match direction {
            StdioDirection::Input => {
                matches!(self, StreamSlot::StandardIn | StreamSlot::ProcessOwnedIn)
            }
            StdioDirection::Output => matches!(
                self,
                StreamSlot::StandardOut | StreamSlot::ProcessOwnedOut | StreamSlot::ProcessOwnedErr
            ),
            StdioDirection::Error => matches!(
                self,
                StreamSlot::StandardErr | StreamSlot::ProcessOwnedOut | StreamSlot::ProcessOwnedErr
            ),
        }
    }
}

/// The slot chosen for each of the child's three standard streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StdioSpec {
    pub input: StreamSlot,
    pub output: StreamSlot,
    pub error: StreamSlot,
}

impl StdioSpec {
    pub fn new(input: StreamSlot, output: StreamSlot, error: StreamSlot) -> Self {
        Self {
            input,
            output,
            error,
        }
    }

    /// Child shares all three standard streams of the caller.
    pub fn inherit() -> Self {
        Self::new(
            StreamSlot::StandardIn,
            StreamSlot::StandardOut,
            StreamSlot::StandardErr,
        )
    }

    /// Every direction gets its own process-owned pipe.
    pub fn piped() -> Self {
        Self::new(
            StreamSlot::ProcessOwnedIn,
            StreamSlot::ProcessOwnedOut,
            StreamSlot::ProcessOwnedErr,
        )
    }

    pub fn slot(&self, direction: StdioDirection) -> StreamSlot {
        match direction {
            StdioDirection::Input => self.input,
            StdioDirection::Output => self.output,
            StdioDirection::Error => self.error,
        }
    }

    /// Rejects slots that make no sense for their direction, e.g. reading
    /// the child's input from `StandardOut`.
    pub fn validate(&self) -> Result<()> {
        for direction in [
            StdioDirection::Input,
            StdioDirection::Output,
            StdioDirection::Error,
        ] {
            let slot = self.slot(direction);
            if !slot.allowed_for(direction) {
                return Err(Error::validation(format!(
                    "stream slot {:?} cannot be used for the child's {}",
                    slot, direction
                )));
            }
        }
        Ok(())
    }

    /// Pipe backing `direction`, if any.
    pub fn pipe_for(&self, direction: StdioDirection) -> Option<PipeKind> {
        self.slot(direction).pipe()
    }

    /// Distinct pipes these slots need, in creation order (in, out, err).
    pub fn requested_pipes(&self) -> Vec<PipeKind> {
        let mut pipes: Vec<PipeKind> = [self.input, self.output, self.error]
            .into_iter()
            .filter_map(StreamSlot::pipe)
            .collect();
        pipes.sort();
        pipes.dedup();
        pipes
    }
}

impl Default for StdioSpec {
    fn default() -> Self {
        Self::inherit()
    }
}
