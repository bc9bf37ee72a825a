//! The launcher service object.
//!
//! A `Launcher` owns the control channel to its worker thread. The worker
//! is started on first use and lives as long as the `Launcher`; dropping
//! the launcher closes the command pipe, which stops the worker.
//!
//! The protocol has no request identifiers, so the channel mutex is held
//! for the whole request/response round trip. Only one request is ever in
//! flight, no matter how many threads share the launcher.

use crate::config::LauncherConfig;
use crate::handle::ProcessHandle;
use crate::worker::spawn_worker;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use pipespawn_common::{
    Error, FatalError, OrTerminate, Pid, PipeTag, ProcessStateRecord, Result,
    StdioDirection, StdioSpec, StreamSlot,
};
use pipespawn_pipes::{anonymous_pipe, PipeFabric, PipeName, PipeNamespace, SystemPipes};
use pipespawn_wire::{read_process_state, Command, LaunchRequest, SpawnOutcome};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Caller end of the control channel.
#[derive(Debug)]
struct ControlChannel {
    commands: BufWriter<File>,
    responses: BufReader<File>,
}

impl ControlChannel {
    fn send(&mut self, command: &Command) -> std::result::Result<(), FatalError> {
        command
            .encode(&mut self.commands)
            .map_err(FatalError::ChannelIo)?;
        self.commands.flush().map_err(FatalError::ChannelIo)
    }

    fn launch(
        &mut self,
        request: LaunchRequest,
    ) -> std::result::Result<SpawnOutcome, FatalError> {
        self.send(&Command::Launch(request))?;
        Ok(SpawnOutcome::decode(&mut self.responses)?)
    }

    fn state(
        &mut self,
        pid: Pid,
        wait: bool,
    ) -> std::result::Result<ProcessStateRecord, FatalError> {
        let command = if wait {
            Command::WaitState(pid)
        } else {
            Command::QueryState(pid)
        };
        self.send(&command)?;
        Ok(read_process_state(&mut self.responses)?)
    }
}

/// Holds a pipe tag for the duration of a launch; released on drop
/// unless kept.
struct TagReservation<'a> {
    tags: &'a Mutex<HashSet<PipeTag>>,
    tag: PipeTag,
    kept: bool,
}

impl TagReservation<'_> {
    fn keep(mut self) {
        self.kept = true;
    }
}

impl Drop for TagReservation<'_> {
    fn drop(&mut self) {
        if !self.kept {
            self.tags.lock().remove(&self.tag);
        }
    }
}

/// Spawns children through a dedicated worker thread.
#[derive(Debug)]
pub struct Launcher {
    config: LauncherConfig,
    namespace: PipeNamespace,
    fabric: Arc<dyn PipeFabric>,
    channel: OnceCell<Mutex<ControlChannel>>,
    live_tags: Mutex<HashSet<PipeTag>>,
}

impl Launcher {
    pub fn new(config: LauncherConfig) -> Self {
        let fabric = Arc::new(SystemPipes::new(config.poll_interval));
        Self::with_fabric(config, fabric)
    }

    /// Use `fabric` for every pipe operation, on both the caller and the
    /// worker side.
    pub fn with_fabric(config: LauncherConfig, fabric: Arc<dyn PipeFabric>) -> Self {
        let namespace = config.namespace();
        Self {
            config,
            namespace,
            fabric,
            channel: OnceCell::new(),
            live_tags: Mutex::new(HashSet::new()),
        }
    }

    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }

    /// Start the worker if it is not running yet. Terminates the process
    /// if the worker cannot be started.
    pub fn initialize(&self) {
        self.channel().or_terminate();
    }

    pub fn is_initialized(&self) -> bool {
        self.channel.get().is_some()
    }

    /// Prefix of the pipe names for children launched with `pipe_tag`.
    pub fn pipe_prefix(&self, pipe_tag: PipeTag) -> String {
        self.namespace.prefix(std::process::id(), pipe_tag)
    }

    /// Launch `executable` with `argv` (`argv[0]` is the name the child
    /// sees) and the given stream slots.
    ///
    /// Every process-owned slot gets a named pipe derived from `pipe_tag`;
    /// the tag stays taken until the handle goes through
    /// [`delete_pipes`](Self::delete_pipes). On error nothing is left
    /// behind: no pipes, no reserved tag.
    pub fn launch<S: AsRef<str>>(
        &self,
        executable: &str,
        argv: &[S],
        input: StreamSlot,
        output: StreamSlot,
        error: StreamSlot,
        pipe_tag: PipeTag,
    ) -> Result<ProcessHandle> {
        let stdio = StdioSpec::new(input, output, error);
        stdio.validate()?;
        if executable.is_empty() {
            return Err(Error::validation("executable path is empty"));
        }

        let channel = self.channel().or_terminate();
        let reservation = self.reserve_tag(pipe_tag)?;
        let prefix = self.pipe_prefix(pipe_tag);

        // Server ends exist before the worker looks for them.
        let mut pending = Vec::new();
        for kind in stdio.requested_pipes() {
            let name = PipeName::for_kind(&prefix, kind);
            let pipe = self
                .fabric
                .create(&name, kind)
                .map_err(|e| Error::pipe_create(name.to_string(), e))?;
            pending.push(pipe);
        }

        let suffix = |direction: StdioDirection| {
            stdio
                .pipe_for(direction)
                .map(|kind| kind.suffix().to_string())
        };
        let request = LaunchRequest {
            pipe_prefix: (!pending.is_empty()).then(|| prefix.clone()),
            in_suffix: suffix(StdioDirection::Input),
            out_suffix: suffix(StdioDirection::Output),
            err_suffix: suffix(StdioDirection::Error),
            executable: Some(executable.to_string()),
            argv: argv.iter().map(|arg| arg.as_ref().to_string()).collect(),
        };

        debug!("Launching {} with pipe prefix {}", executable, prefix);
        let outcome = channel.lock().launch(request).or_terminate();
        let pid = match outcome {
            SpawnOutcome::Spawned(pid) => pid,
            SpawnOutcome::Failed(code) => {
                let err = Error::spawn_failed(executable, code);
                debug!("{}", err);
                return Err(err);
            }
        };

        let mut handle = ProcessHandle::new(pid, pipe_tag);
        for pipe in pending {
            let name = pipe.name().clone();
            match pipe.accept() {
                Ok(stream) => handle.attach(stream),
                Err(e) => {
                    warn!(
                        "Process {} started but pipe {} could not be accepted: {}",
                        pid, name, e
                    );
                    if let Err(cleanup) = self.teardown(handle) {
                        warn!("Cleanup after failed accept: {}", cleanup);
                    }
                    return Err(Error::pipe_connect(name.to_string(), e));
                }
            }
        }

        reservation.keep();
        info!("Launched {} as process {} (pipe tag {})", executable, pid, pipe_tag);
        Ok(handle)
    }

    /// Current state of `pid`; with `wait`, block until it leaves the
    /// running state. Terminates the process if the launcher was never
    /// initialized or the control channel is broken.
    pub fn retrieve_state(&self, pid: Pid, wait: bool) -> ProcessStateRecord {
        self.try_retrieve_state(pid, wait).or_terminate()
    }

    /// [`retrieve_state`](Self::retrieve_state) with the fatal condition
    /// returned instead of acted on.
    pub fn try_retrieve_state(
        &self,
        pid: Pid,
        wait: bool,
    ) -> std::result::Result<ProcessStateRecord, FatalError> {
        let channel = self.channel.get().ok_or(FatalError::NotInitialized)?;
        let record = channel.lock().state(pid, wait)?;
        Ok(record)
    }

    /// Close and remove every process-owned pipe of `handle` and release
    /// its pipe tag.
    ///
    /// Every step is attempted even after a failure; the first failure is
    /// returned.
    pub fn delete_pipes(&self, handle: ProcessHandle) -> Result<()> {
        let tag = handle.pipe_tag();
        let result = self.teardown(handle);
        self.live_tags.lock().remove(&tag);
        debug!("Released pipe tag {}", tag);
        result
    }

    fn teardown(&self, handle: ProcessHandle) -> Result<()> {
        let mut first: Option<Error> = None;
        for slot in handle.into_slots() {
            if let Some(stream) = slot.stream {
                if let Err(e) = stream.close() {
                    warn!("Failed to close pipe {}: {}", slot.name, e);
                    first.get_or_insert(Error::pipe_close(slot.name.to_string(), e));
                }
            }
            if let Err(e) = self.fabric.remove(&slot.name) {
                warn!("Failed to remove pipe {}: {}", slot.name, e);
                first.get_or_insert(Error::pipe_remove(slot.name.to_string(), e));
            }
        }
        match first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn reserve_tag(&self, tag: PipeTag) -> Result<TagReservation<'_>> {
        if !self.live_tags.lock().insert(tag) {
            return Err(Error::pipe_tag_in_use(tag));
        }
        Ok(TagReservation {
            tags: &self.live_tags,
            tag,
            kept: false,
        })
    }

    fn channel(&self) -> std::result::Result<&Mutex<ControlChannel>, FatalError> {
        self.channel.get_or_try_init(|| self.start_worker())
    }

    fn start_worker(&self) -> std::result::Result<Mutex<ControlChannel>, FatalError> {
        let (command_rx, command_tx) = anonymous_pipe().map_err(FatalError::WorkerStart)?;
        let (response_rx, response_tx) = anonymous_pipe().map_err(FatalError::WorkerStart)?;
        spawn_worker(&self.config, Arc::clone(&self.fabric), command_rx, response_tx)
            .map_err(FatalError::WorkerStart)?;
        info!("Launcher worker started ({})", self.config.worker_thread_name);

        Ok(Mutex::new(ControlChannel {
            commands: BufWriter::new(command_tx),
            responses: BufReader::new(response_rx),
        }))
    }
}

impl Default for Launcher {
    fn default() -> Self {
        Self::new(LauncherConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_before_initialize_is_fatal() {
        let launcher = Launcher::default();
        let err = launcher.try_retrieve_state(1, false).unwrap_err();
        assert!(matches!(err, FatalError::NotInitialized));
        assert_eq!(err.to_string(), "Launcher not initialized.");
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let launcher = Launcher::default();
        assert!(!launcher.is_initialized());
        launcher.initialize();
        launcher.initialize();
        assert!(launcher.is_initialized());
    }

    #[test]
    fn test_invalid_slots_rejected_before_side_effects() {
        let launcher = Launcher::default();
        let err = launcher
            .launch(
                "/bin/sh",
                &["sh"],
                StreamSlot::StandardOut,
                StreamSlot::StandardOut,
                StreamSlot::StandardErr,
                1,
            )
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        assert!(!launcher.is_initialized());
        assert!(launcher.live_tags.lock().is_empty());
    }

    #[test]
    fn test_empty_executable_rejected() {
        let launcher = Launcher::default();
        let err = launcher
            .launch::<&str>(
                "",
                &[],
                StreamSlot::StandardIn,
                StreamSlot::StandardOut,
                StreamSlot::StandardErr,
                1,
            )
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn test_tag_reservation_released_on_drop() {
        let launcher = Launcher::default();
        {
            let _held = launcher.reserve_tag(5).unwrap();
            assert!(matches!(
                launcher.reserve_tag(5),
                Err(Error::PipeTagInUse { tag: 5 })
            ));
        }
        launcher.reserve_tag(5).unwrap().keep();
        assert!(launcher.live_tags.lock().contains(&5));
    }

    #[test]
    fn test_pipe_prefix_embeds_pid_and_tag() {
        let launcher = Launcher::default();
        let prefix = launcher.pipe_prefix(12);
        assert!(prefix.ends_with(&format!("{}_12", std::process::id())));
    }
}
