//! # pipespawn wire
//!
//! Binary codec for the control channel between a caller and the launcher
//! worker. No versioning, no magic number: both ends are built together.
//!
//! | Byte(s) | Meaning |
//! |---|---|
//! | 1 | opcode: 0=Launch, 1=QueryState, 2=WaitState |
//! | Launch payload | 5 length-prefixed strings (-1 = absent) + string-array argv |
//! | Launch response | i64: child pid, or negated OS error code |
//! | QueryState/WaitState payload | i64 process identifier |
//! | QueryState/WaitState response | i32 state code, i32 exit code |
//!
//! All integers are little-endian.

pub mod error;
pub mod message;
pub mod primitives;

pub use error::WireError;
pub use message::{Command, LaunchRequest, Opcode, SpawnOutcome};
pub use primitives::{
    read_i32, read_i64, read_process_state, read_string, read_strings, write_i32, write_i64,
    write_process_state, write_string, write_strings,
};
