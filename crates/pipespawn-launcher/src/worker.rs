//! Launcher worker - the only thread that creates processes.
//!
//! The worker owns the process table and reads commands from one control
//! pipe, answering each on the other. It stops when the command pipe is
//! closed. Anything it cannot make sense of is fatal.

use crate::config::LauncherConfig;
use pipespawn_common::{FatalError, Pid, PipeKind, StdioDirection};
use pipespawn_pipes::{ChildPipe, PipeFabric, PipeName};
use pipespawn_process::{error_code, spawn_process, ChildStdio, ProcessTable, SpawnRequest};
use pipespawn_wire::{write_process_state, Command, LaunchRequest, SpawnOutcome, WireError};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Internal worker state. Lives on the worker thread only.
pub(crate) struct Worker {
    fabric: Arc<dyn PipeFabric>,
    table: ProcessTable,
    connect_timeout: Duration,
}

impl Worker {
    pub(crate) fn new(config: &LauncherConfig, fabric: Arc<dyn PipeFabric>) -> Self {
        Self {
            fabric,
            table: ProcessTable::new(config.poll_interval),
            connect_timeout: config.connect_timeout,
        }
    }

    /// Serve commands until the command stream ends.
    ///
    /// Returns `Ok(())` on a clean shutdown. End of stream in the middle of
    /// a command counts as a shutdown too: the caller is gone.
    pub(crate) fn run<R: Read, W: Write>(
        mut self,
        commands: R,
        responses: W,
    ) -> Result<(), FatalError> {
        let mut commands = BufReader::new(commands);
        let mut responses = BufWriter::new(responses);

        loop {
            let command = match Command::decode(&mut commands) {
                Ok(Some(command)) => command,
                Ok(None) => {
                    info!("Command channel closed; launcher worker exiting");
                    return Ok(());
                }
                Err(WireError::Closed) => {
                    info!("Command channel closed mid-command; launcher worker exiting");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            debug!("Dispatching {:?}", command.opcode());
            match command {
                Command::Launch(request) => {
                    let outcome = self.launch(request);
                    outcome
                        .encode(&mut responses)
                        .map_err(FatalError::ChannelIo)?;
                }
                Command::QueryState(pid) => self.answer_state(&mut responses, pid, false)?,
                Command::WaitState(pid) => self.answer_state(&mut responses, pid, true)?,
            }
            responses.flush().map_err(FatalError::ChannelIo)?;
        }
    }

    fn answer_state<W: Write>(
        &mut self,
        responses: &mut W,
        pid: Pid,
        wait: bool,
    ) -> Result<(), FatalError> {
        let record = self.table.query(pid, wait);
        debug!("State of process {}: {}", pid, record);
        write_process_state(responses, &record).map_err(FatalError::ChannelIo)
    }

    fn launch(&mut self, request: LaunchRequest) -> SpawnOutcome {
        let executable = request.executable.clone().unwrap_or_default();
        match self.try_launch(request) {
            Ok(pid) => {
                info!("Spawned {} as process {}", executable, pid);
                SpawnOutcome::Spawned(pid)
            }
            Err(e) => {
                warn!("Failed to spawn {}: {}", executable, e);
                SpawnOutcome::Failed(error_code(&e))
            }
        }
    }

    fn try_launch(&mut self, request: LaunchRequest) -> io::Result<Pid> {
        let executable = request
            .executable
            .filter(|exe| !exe.is_empty())
            .ok_or_else(|| invalid("launch request has no executable"))?;

        let wiring = [
            (StdioDirection::Input, request.in_suffix.as_deref()),
            (StdioDirection::Output, request.out_suffix.as_deref()),
            (StdioDirection::Error, request.err_suffix.as_deref()),
        ];

        // Each distinct pipe is connected once; merged streams share it.
        // The worker's copies close when `connected` drops after the spawn.
        let mut connected: HashMap<PipeKind, ChildPipe> = HashMap::new();
        let mut stdio = Vec::with_capacity(wiring.len());
        for (direction, suffix) in wiring {
            let Some(suffix) = suffix else {
                stdio.push(ChildStdio::Inherit);
                continue;
            };
            let prefix = request
                .pipe_prefix
                .as_deref()
                .ok_or_else(|| invalid("pipe suffix given without a pipe prefix"))?;
            let kind = pipe_kind(direction, suffix)?;
            if !connected.contains_key(&kind) {
                let name = PipeName::new(prefix, suffix);
                let pipe = self.fabric.connect(&name, kind, self.connect_timeout)?;
                connected.insert(kind, pipe);
            }
            if let Some(pipe) = connected.get(&kind) {
                stdio.push(ChildStdio::Pipe(pipe.try_clone()?));
            }
        }

        let mut stdio = stdio.into_iter();
        let (Some(stdin), Some(stdout), Some(stderr)) = (stdio.next(), stdio.next(), stdio.next())
        else {
            return Err(invalid("incomplete stdio wiring"));
        };

        let child = spawn_process(SpawnRequest {
            executable,
            argv: request.argv,
            stdin,
            stdout,
            stderr,
        })?;
        drop(connected);

        let pid = child.pid;
        self.table.register(child);
        Ok(pid)
    }
}

fn invalid(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, message.to_string())
}

/// The pipe `suffix` names, checked against the direction it is wired to.
fn pipe_kind(direction: StdioDirection, suffix: &str) -> io::Result<PipeKind> {
    match (direction, PipeKind::from_suffix(suffix)) {
        (StdioDirection::Input, Some(PipeKind::In)) => Ok(PipeKind::In),
        (
            StdioDirection::Output | StdioDirection::Error,
            Some(kind @ (PipeKind::Out | PipeKind::Err)),
        ) => Ok(kind),
        _ => Err(invalid(&format!(
            "pipe suffix {:?} cannot carry the child's {}",
            suffix, direction
        ))),
    }
}

/// Start the worker thread on the given control pipe ends.
///
/// A fatal error inside the worker terminates the process.
pub(crate) fn spawn_worker(
    config: &LauncherConfig,
    fabric: Arc<dyn PipeFabric>,
    commands: File,
    responses: File,
) -> io::Result<JoinHandle<()>> {
    let worker = Worker::new(config, fabric);
    thread::Builder::new()
        .name(config.worker_thread_name.clone())
        .spawn(move || {
            if let Err(fatal) = worker.run(commands, responses) {
                fatal.terminate();
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipespawn_common::ProcessStateRecord;
    use pipespawn_pipes::SystemPipes;
    use pipespawn_wire::{read_process_state, Opcode};
    use std::io::Cursor;

    fn worker() -> Worker {
        Worker::new(&LauncherConfig::default(), Arc::new(SystemPipes::default()))
    }

    fn encode_all(commands: &[Command]) -> Vec<u8> {
        let mut buf = Vec::new();
        for command in commands {
            command.encode(&mut buf).unwrap();
        }
        buf
    }

    #[test]
    fn test_empty_stream_is_clean_shutdown() {
        let mut out = Vec::new();
        worker().run(Cursor::new(Vec::new()), &mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_truncated_command_is_clean_shutdown() {
        let mut input = encode_all(&[Command::QueryState(42)]);
        input.truncate(3);
        let mut out = Vec::new();
        worker().run(Cursor::new(input), &mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_unknown_opcode_is_fatal() {
        let mut out = Vec::new();
        let err = worker().run(Cursor::new(vec![9u8]), &mut out).unwrap_err();
        assert!(matches!(err, FatalError::UnknownCommand(9)));
        assert_eq!(err.to_string(), "Illegal command: 9");
    }

    #[test]
    fn test_bad_string_length_is_fatal() {
        let mut input = vec![Opcode::Launch as u8];
        input.extend_from_slice(&(-5i32).to_le_bytes());
        let mut out = Vec::new();
        let err = worker().run(Cursor::new(input), &mut out).unwrap_err();
        assert!(matches!(err, FatalError::Malformed(_)), "unexpected error: {}", err);
        assert!(out.is_empty());
    }

    #[test]
    fn test_invalid_utf8_is_fatal() {
        let mut input = vec![Opcode::Launch as u8];
        input.extend_from_slice(&2i32.to_le_bytes());
        input.extend_from_slice(&[0xc3, 0x28]);
        let mut out = Vec::new();
        let err = worker().run(Cursor::new(input), &mut out).unwrap_err();
        assert!(matches!(err, FatalError::Malformed(_)), "unexpected error: {}", err);
    }

    /// Fails every read and write.
    struct BrokenChannel;

    impl Read for BrokenChannel {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "channel gone"))
        }
    }

    impl Write for BrokenChannel {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "channel gone"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_command_read_error_is_fatal() {
        let mut out = Vec::new();
        let err = worker().run(BrokenChannel, &mut out).unwrap_err();
        assert!(matches!(err, FatalError::ChannelIo(_)), "unexpected error: {}", err);
    }

    #[test]
    fn test_response_write_error_is_fatal() {
        let input = encode_all(&[Command::QueryState(-7)]);
        let err = worker().run(Cursor::new(input), BrokenChannel).unwrap_err();
        assert!(matches!(err, FatalError::ChannelIo(_)), "unexpected error: {}", err);
    }

    #[test]
    fn test_query_unknown_pid_answers_once() {
        let input = encode_all(&[Command::QueryState(-7), Command::WaitState(0)]);
        let mut out = Vec::new();
        worker().run(Cursor::new(input), &mut out).unwrap();

        let mut reader = Cursor::new(out);
        let gone = ProcessStateRecord::done(-1);
        assert_eq!(read_process_state(&mut reader).unwrap(), gone);
        assert_eq!(read_process_state(&mut reader).unwrap(), gone);
        assert_eq!(reader.position() as usize, reader.get_ref().len());
    }

    #[test]
    fn test_launch_without_executable_replies_failure() {
        let input = encode_all(&[Command::Launch(LaunchRequest::default())]);
        let mut out = Vec::new();
        worker().run(Cursor::new(input), &mut out).unwrap();

        let outcome = SpawnOutcome::decode(&mut Cursor::new(out)).unwrap();
        assert!(matches!(outcome, SpawnOutcome::Failed(code) if code > 0));
    }

    #[test]
    fn test_suffix_without_prefix_replies_failure() {
        let request = LaunchRequest {
            out_suffix: Some("_out".to_string()),
            executable: Some("/bin/sh".to_string()),
            argv: vec!["sh".to_string()],
            ..LaunchRequest::default()
        };
        let input = encode_all(&[Command::Launch(request)]);
        let mut out = Vec::new();
        worker().run(Cursor::new(input), &mut out).unwrap();

        let outcome = SpawnOutcome::decode(&mut Cursor::new(out)).unwrap();
        assert!(matches!(outcome, SpawnOutcome::Failed(_)));
    }

    #[test]
    fn test_pipe_kind_matches_direction() {
        assert_eq!(pipe_kind(StdioDirection::Input, "_in").unwrap(), PipeKind::In);
        assert_eq!(pipe_kind(StdioDirection::Error, "_out").unwrap(), PipeKind::Out);
        assert_eq!(pipe_kind(StdioDirection::Output, "_err").unwrap(), PipeKind::Err);
        assert!(pipe_kind(StdioDirection::Input, "_out").is_err());
        assert!(pipe_kind(StdioDirection::Output, "_in").is_err());
        assert!(pipe_kind(StdioDirection::Output, "_bogus").is_err());
    }

    #[test]
    fn test_opcode_bytes_are_stable() {
        assert_eq!(Opcode::Launch as u8, 0);
        assert_eq!(Opcode::QueryState as u8, 1);
        assert_eq!(Opcode::WaitState as u8, 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_launch_then_wait_over_anonymous_pipes() {
        use pipespawn_pipes::anonymous_pipe;

        let (command_rx, mut command_tx) = anonymous_pipe().unwrap();
        let (mut response_rx, response_tx) = anonymous_pipe().unwrap();
        let handle = spawn_worker(
            &LauncherConfig::default(),
            Arc::new(SystemPipes::default()),
            command_rx,
            response_tx,
        )
        .unwrap();

        let launch = Command::Launch(LaunchRequest {
            executable: Some("/bin/sh".to_string()),
            argv: vec!["sh".to_string(), "-c".to_string(), "exit 5".to_string()],
            ..LaunchRequest::default()
        });
        launch.encode(&mut command_tx).unwrap();
        let pid = match SpawnOutcome::decode(&mut response_rx).unwrap() {
            SpawnOutcome::Spawned(pid) => pid,
            other => panic!("launch failed: {:?}", other),
        };

        Command::WaitState(pid).encode(&mut command_tx).unwrap();
        assert_eq!(
            read_process_state(&mut response_rx).unwrap(),
            ProcessStateRecord::done(5)
        );

        drop(command_tx);
        handle.join().unwrap();
    }
}
