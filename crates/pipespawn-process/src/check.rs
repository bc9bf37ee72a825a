//! Process existence checking.

use pipespawn_common::{Error, Result};
use std::io;

/// Check if a process with the given PID exists.
///
/// On Unix this is `kill(pid, 0)`, which sends nothing but reports whether
/// the target exists. On Windows it tries `OpenProcess`.
///
/// # Returns
///
/// * `Ok(true)` - Process exists (possibly owned by another user)
/// * `Ok(false)` - Process does not exist
/// * `Err(_)` - The check itself failed
pub fn process_exists(pid: u32) -> Result<bool> {
    #[cfg(unix)]
    {
        process_exists_unix(pid)
    }

    #[cfg(windows)]
    {
        process_exists_windows(pid)
    }
}

#[cfg(unix)]
fn process_exists_unix(pid: u32) -> Result<bool> {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|_| {
        Error::validation(format!("pid {} does not fit the platform pid type", pid))
    })?;
    if raw == 0 {
        // kill(0, ..) addresses our own process group.
        return Ok(false);
    }

    match kill(Pid::from_raw(raw), None) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(Errno::EPERM) => Ok(true),
        Err(e) => Err(Error::Io(io::Error::from(e))),
    }
}

#[cfg(windows)]
fn process_exists_windows(pid: u32) -> Result<bool> {
    use windows::Win32::Foundation::{CloseHandle, ERROR_ACCESS_DENIED, ERROR_INVALID_PARAMETER};
    use windows::Win32::System::Threading::{OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION};

    match unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid) } {
        Ok(handle) => {
            let _ = unsafe { CloseHandle(handle) };
            Ok(true)
        }
        Err(e) if e.code() == ERROR_INVALID_PARAMETER.to_hresult() => Ok(false),
        Err(e) if e.code() == ERROR_ACCESS_DENIED.to_hresult() => Ok(true),
        Err(e) => Err(Error::Io(io::Error::from(e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_process_exists() {
        assert!(process_exists(std::process::id()).unwrap());
    }

    #[test]
    #[cfg(unix)]
    fn test_init_exists() {
        assert!(process_exists(1).unwrap());
    }

    #[test]
    #[cfg(unix)]
    fn test_pid_zero_is_not_a_process() {
        assert!(!process_exists(0).unwrap());
    }

    #[test]
    #[cfg(unix)]
    fn test_reaped_child_is_gone() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        assert!(!process_exists(pid).unwrap());
    }
}
