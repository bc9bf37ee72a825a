//! State of launched processes.
//!
//! The table owns every child the worker created. A child is reaped the
//! first time a query observes it finished; the terminal record is cached
//! from then on so later queries keep answering the same thing.
//!
//! A stopped child keeps reporting `Stopped` until it is seen continuing
//! or finishing.
//!
//! Pids the table never saw (or already gave up on) are answered from an
//! existence check alone: `Running` while the pid is alive, `Done` with
//! exit code -1 once it is gone. Those answers are never cached.

use crate::check::process_exists;
use crate::execute::SpawnedChild;
use pipespawn_common::{Pid, ProcessState, ProcessStateRecord};
use std::collections::HashMap;
use std::io;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Exit code reported for a process whose real status is unknown.
pub const UNKNOWN_EXIT_CODE: i32 = -1;

#[derive(Debug)]
pub struct ProcessTable {
    poll_interval: Duration,
    live: HashMap<Pid, SpawnedChild>,
    stopped: HashMap<Pid, ProcessStateRecord>,
    finished: HashMap<Pid, ProcessStateRecord>,
}

/// What one status query saw happen to a child.
#[cfg_attr(windows, allow(dead_code))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Observed {
    /// Exited, killed or stopped.
    Changed(ProcessStateRecord),
    /// Resumed after a stop.
    Continued,
    /// Nothing new since the last query.
    Unchanged,
}

impl ProcessTable {
    /// `poll_interval` paces waits on processes that are not our children.
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            live: HashMap::new(),
            stopped: HashMap::new(),
            finished: HashMap::new(),
        }
    }

    /// Track a freshly created child.
    pub fn register(&mut self, child: SpawnedChild) {
        debug!("Tracking process {}", child.pid);
        // A recycled pid must not answer with the previous owner's record.
        self.finished.remove(&child.pid);
        self.stopped.remove(&child.pid);
        self.live.insert(child.pid, child);
    }

    /// Number of children not yet observed finished.
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Report the state of `pid`. With `wait`, block until it changes from
    /// running (finished, or stopped where the platform reports that).
    pub fn query(&mut self, pid: Pid, wait: bool) -> ProcessStateRecord {
        if let Some(record) = self.finished.get(&pid) {
            return *record;
        }
        let Some(child) = self.live.get(&pid) else {
            return self.query_foreign(pid, wait);
        };

        let record = match query_child(child, wait) {
            Ok(Observed::Changed(record)) => record,
            Ok(Observed::Continued) => {
                self.stopped.remove(&pid);
                ProcessStateRecord::running()
            }
            Ok(Observed::Unchanged) => self
                .stopped
                .get(&pid)
                .copied()
                .unwrap_or_else(ProcessStateRecord::running),
            Err(e) => {
                warn!("State query for child {} failed: {}", pid, e);
                self.live.remove(&pid);
                self.stopped.remove(&pid);
                return self.query_foreign(pid, wait);
            }
        };

        if record.is_terminal() {
            debug!("Process {} finished: {}", pid, record);
            self.live.remove(&pid);
            self.stopped.remove(&pid);
            self.finished.insert(pid, record);
        } else if record.state == ProcessState::Stopped {
            self.stopped.insert(pid, record);
        }
        record
    }

    fn query_foreign(&self, pid: Pid, wait: bool) -> ProcessStateRecord {
        let raw = match u32::try_from(pid) {
            Ok(raw) if raw > 0 => raw,
            _ => return ProcessStateRecord::done(UNKNOWN_EXIT_CODE),
        };

        loop {
            match process_exists(raw) {
                Ok(true) if wait => thread::sleep(self.poll_interval),
                Ok(true) => return ProcessStateRecord::running(),
                Ok(false) => return ProcessStateRecord::done(UNKNOWN_EXIT_CODE),
                Err(e) => {
                    warn!("Existence check for process {} failed: {}", pid, e);
                    return ProcessStateRecord::done(UNKNOWN_EXIT_CODE);
                }
            }
        }
    }
}

#[cfg(unix)]
fn query_child(child: &SpawnedChild, wait: bool) -> io::Result<Observed> {
    use nix::errno::Errno;
    use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};

    let raw = i32::try_from(child.pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    let target = nix::unistd::Pid::from_raw(raw);
    let flags = if wait {
        None
    } else {
        Some(WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED)
    };

    loop {
        let record = match waitpid(target, flags) {
            Ok(WaitStatus::Exited(_, code)) => ProcessStateRecord::done(code),
            Ok(WaitStatus::Signaled(_, signal, _)) => ProcessStateRecord::terminated(signal as i32),
            Ok(WaitStatus::Stopped(_, signal)) => ProcessStateRecord::stopped(signal as i32),
            Ok(WaitStatus::Continued(_)) => return Ok(Observed::Continued),
            Ok(_) => return Ok(Observed::Unchanged),
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(io::Error::from(e)),
        };
        return Ok(Observed::Changed(record));
    }
}

#[cfg(windows)]
fn query_child(child: &SpawnedChild, wait: bool) -> io::Result<Observed> {
    use std::os::windows::io::AsRawHandle;
    use windows::Win32::Foundation::HANDLE;

    exit_status(HANDLE(child.process.as_raw_handle()), wait).map(Observed::Changed)
}

#[cfg(windows)]
fn exit_status(
    process: windows::Win32::Foundation::HANDLE,
    wait: bool,
) -> io::Result<ProcessStateRecord> {
    use windows::Win32::Foundation::WAIT_FAILED;
    use windows::Win32::System::Threading::{GetExitCodeProcess, WaitForSingleObject, INFINITE};

    const STILL_ACTIVE: u32 = 259;

    if wait && unsafe { WaitForSingleObject(process, INFINITE) } == WAIT_FAILED {
        return Err(io::Error::last_os_error());
    }
    let mut code = 0u32;
    unsafe { GetExitCodeProcess(process, &mut code) }.map_err(io::Error::from)?;
    if code == STILL_ACTIVE {
        Ok(ProcessStateRecord::running())
    } else {
        Ok(ProcessStateRecord::done(code as i32))
    }
}
