//! Control-channel messages.

use crate::error::WireError;
use crate::primitives::{
    read_i64, read_string, read_strings, write_i64, write_string, write_strings,
};
use pipespawn_common::Pid;
use std::io::{self, Read, Write};

/// Leading byte of every command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Launch = 0,
    QueryState = 1,
    WaitState = 2,
}

impl TryFrom<u8> for Opcode {
    type Error = WireError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0 => Ok(Opcode::Launch),
            1 => Ok(Opcode::QueryState),
            2 => Ok(Opcode::WaitState),
            other => Err(WireError::UnknownOpcode(other)),
        }
    }
}

/// Everything the worker needs to create one child.
///
/// Each suffix is present only when that stream is wired to a process-owned
/// named pipe; the pipe is then `pipe_prefix + suffix`. The five string
/// fields are all optional on the wire and are validated by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LaunchRequest {
    pub pipe_prefix: Option<String>,
    pub in_suffix: Option<String>,
    pub out_suffix: Option<String>,
    pub err_suffix: Option<String>,
    pub executable: Option<String>,
    pub argv: Vec<String>,
}

impl LaunchRequest {
    pub fn encode<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        write_string(w, self.pipe_prefix.as_deref())?;
        write_string(w, self.in_suffix.as_deref())?;
        write_string(w, self.out_suffix.as_deref())?;
        write_string(w, self.err_suffix.as_deref())?;
        write_string(w, self.executable.as_deref())?;
        write_strings(w, &self.argv)
    }

    pub fn decode<R: Read + ?Sized>(r: &mut R) -> Result<Self, WireError> {
        Ok(Self {
            pipe_prefix: read_string(r)?,
            in_suffix: read_string(r)?,
            out_suffix: read_string(r)?,
            err_suffix: read_string(r)?,
            executable: read_string(r)?,
            argv: read_strings(r)?,
        })
    }
}

/// A request from the caller to the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Launch(LaunchRequest),
    QueryState(Pid),
    WaitState(Pid),
}

impl Command {
    pub fn opcode(&self) -> Opcode {
        match self {
            Command::Launch(_) => Opcode::Launch,
            Command::QueryState(_) => Opcode::QueryState,
            Command::WaitState(_) => Opcode::WaitState,
        }
    }

    /// Writes the opcode byte and the payload. The caller flushes.
    pub fn encode<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&[self.opcode() as u8])?;
        match self {
            Command::Launch(request) => request.encode(w),
            Command::QueryState(pid) | Command::WaitState(pid) => write_i64(w, *pid),
        }
    }

    /// Reads the next command.
    ///
    /// Returns `Ok(None)` on a clean end of stream before the opcode byte.
    /// End of stream inside the payload is [`WireError::Closed`].
    pub fn decode<R: Read + ?Sized>(r: &mut R) -> Result<Option<Self>, WireError> {
        let mut op = [0u8; 1];
        loop {
            match r.read(&mut op) {
                Ok(0) => return Ok(None),
                Ok(_) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(WireError::Io(e)),
            }
        }

        let command = match Opcode::try_from(op[0])? {
            Opcode::Launch => Command::Launch(LaunchRequest::decode(r)?),
            Opcode::QueryState => Command::QueryState(read_i64(r)?),
            Opcode::WaitState => Command::WaitState(read_i64(r)?),
        };
        Ok(Some(command))
    }
}

/// The worker's answer to a launch.
///
/// On the wire this is a single i64: a positive pid, or a negative value
/// holding the negated OS error code. Zero is never sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnOutcome {
    Spawned(Pid),
    Failed(i32),
}

impl SpawnOutcome {
    pub fn encode<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        let value = match *self {
            SpawnOutcome::Spawned(pid) => pid,
            SpawnOutcome::Failed(code) => -i64::from(code),
        };
        write_i64(w, value)
    }

    pub fn decode<R: Read + ?Sized>(r: &mut R) -> Result<Self, WireError> {
        let value = read_i64(r)?;
        if value > 0 {
            return Ok(SpawnOutcome::Spawned(value));
        }
        value
            .checked_neg()
            .and_then(|code| i32::try_from(code).ok())
            .filter(|code| *code > 0)
            .map(SpawnOutcome::Failed)
            .ok_or(WireError::InvalidSpawnReply(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    fn request() -> LaunchRequest {
        LaunchRequest {
            pipe_prefix: Some("/tmp/1234_1".to_string()),
            in_suffix: Some("_in".to_string()),
            out_suffix: Some("_out".to_string()),
            err_suffix: None,
            executable: Some("/bin/cat".to_string()),
            argv: vec!["cat".to_string()],
        }
    }

    #[test]
    fn test_launch_command_layout() {
        let mut buf = Vec::new();
        Command::Launch(LaunchRequest::default()).encode(&mut buf).unwrap();

        let mut expected = vec![0u8];
        for _ in 0..5 {
            expected.extend_from_slice(&(-1i32).to_le_bytes());
        }
        expected.extend_from_slice(&0i32.to_le_bytes());
        assert_eq!(buf, expected);
    }

    #[test]
    fn test_query_commands() {
        let mut buf = Vec::new();
        Command::QueryState(77).encode(&mut buf).unwrap();
        Command::WaitState(78).encode(&mut buf).unwrap();
        assert_eq!(buf.len(), 18);
        assert_eq!(buf[0], 1);
        assert_eq!(buf[9], 2);

        let mut r = Cursor::new(buf);
        assert_eq!(Command::decode(&mut r).unwrap(), Some(Command::QueryState(77)));
        assert_eq!(Command::decode(&mut r).unwrap(), Some(Command::WaitState(78)));
        assert_eq!(Command::decode(&mut r).unwrap(), None);
    }

    #[test]
    fn test_launch_round_trip() {
        let mut buf = Vec::new();
        Command::Launch(request()).encode(&mut buf).unwrap();
        let decoded = Command::decode(&mut Cursor::new(buf)).unwrap();
        assert_eq!(decoded, Some(Command::Launch(request())));
    }

    #[test]
    fn test_unknown_opcode() {
        let err = Command::decode(&mut Cursor::new(vec![9u8])).unwrap_err();
        assert!(matches!(err, WireError::UnknownOpcode(9)));
    }

    #[test]
    fn test_truncated_launch_is_closed() {
        let mut buf = Vec::new();
        Command::Launch(request()).encode(&mut buf).unwrap();
        buf.truncate(buf.len() - 2);
        let err = Command::decode(&mut Cursor::new(buf)).unwrap_err();
        assert!(err.is_closed());
    }

    #[test]
    fn test_spawn_outcome() {
        let mut buf = Vec::new();
        SpawnOutcome::Spawned(4242).encode(&mut buf).unwrap();
        SpawnOutcome::Failed(2).encode(&mut buf).unwrap();
        assert_eq!(&buf[8..], &(-2i64).to_le_bytes());

        let mut r = Cursor::new(buf);
        assert_eq!(SpawnOutcome::decode(&mut r).unwrap(), SpawnOutcome::Spawned(4242));
        assert_eq!(SpawnOutcome::decode(&mut r).unwrap(), SpawnOutcome::Failed(2));
    }

    #[test]
    fn test_spawn_reply_out_of_range() {
        for value in [0, i64::MIN, -i64::from(i32::MAX) - 1] {
            let mut buf = Vec::new();
            write_i64(&mut buf, value).unwrap();
            let err = SpawnOutcome::decode(&mut Cursor::new(buf)).unwrap_err();
            assert!(matches!(err, WireError::InvalidSpawnReply(v) if v == value));
            assert!(matches!(
                pipespawn_common::FatalError::from(err),
                pipespawn_common::FatalError::Malformed(_)
            ));
        }
    }

    fn opt_string() -> impl Strategy<Value = Option<String>> {
        prop::option::of(".{0,24}")
    }

    prop_compose! {
        fn arb_request()(
            pipe_prefix in opt_string(),
            in_suffix in opt_string(),
            out_suffix in opt_string(),
            err_suffix in opt_string(),
            executable in opt_string(),
            argv in prop::collection::vec(".{0,16}", 0..6),
        ) -> LaunchRequest {
            LaunchRequest { pipe_prefix, in_suffix, out_suffix, err_suffix, executable, argv }
        }
    }

    proptest! {
        #[test]
        fn launch_request_survives_encode_decode(req in arb_request()) {
            let mut buf = Vec::new();
            req.encode(&mut buf).unwrap();
            let mut r = Cursor::new(buf);
            let decoded = LaunchRequest::decode(&mut r).unwrap();
            prop_assert_eq!(decoded, req);
            prop_assert_eq!(r.position() as usize, r.get_ref().len());
        }
    }
}
