//! Process creation with explicit standard handles.

use pipespawn_common::Pid;
use pipespawn_pipes::ChildPipe;
use std::io;

/// Where one standard stream of the new process comes from.
#[derive(Debug)]
pub enum ChildStdio {
    /// Share the launcher's own standard stream.
    Inherit,
    /// Use the client end of a process-owned pipe.
    Pipe(ChildPipe),
}

/// One process to create.
///
/// `argv[0]` is the program name the child sees; `executable` is what is
/// actually run.
#[derive(Debug)]
pub struct SpawnRequest {
    pub executable: String,
    pub argv: Vec<String>,
    pub stdin: ChildStdio,
    pub stdout: ChildStdio,
    pub stderr: ChildStdio,
}

/// A freshly created process.
#[derive(Debug)]
pub struct SpawnedChild {
    pub pid: Pid,
    #[cfg(windows)]
    pub(crate) process: std::os::windows::io::OwnedHandle,
}

/// Create the process described by `request`.
///
/// The pipe handles in the request are consumed; the launcher's copies are
/// closed once the child holds its own.
pub fn spawn_process(request: SpawnRequest) -> io::Result<SpawnedChild> {
    if request.executable.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "executable path is empty",
        ));
    }

    #[cfg(unix)]
    {
        spawn_unix(request)
    }

    #[cfg(windows)]
    {
        spawn_windows(request)
    }
}

/// OS error code to report for a failed launch.
///
/// Errors raised by this crate rather than the OS carry no code; they get
/// the closest platform code for their kind so the caller can still match
/// on it.
pub fn error_code(err: &io::Error) -> i32 {
    if let Some(code) = err.raw_os_error().filter(|code| *code > 0) {
        return code;
    }

    #[cfg(unix)]
    {
        use nix::errno::Errno;
        let errno = match err.kind() {
            io::ErrorKind::NotFound => Errno::ENOENT,
            io::ErrorKind::PermissionDenied => Errno::EACCES,
            io::ErrorKind::AlreadyExists => Errno::EEXIST,
            io::ErrorKind::TimedOut => Errno::ETIMEDOUT,
            _ => Errno::EINVAL,
        };
        errno as i32
    }

    #[cfg(windows)]
    {
        use windows::Win32::Foundation::{
            ERROR_ACCESS_DENIED, ERROR_ALREADY_EXISTS, ERROR_FILE_NOT_FOUND,
            ERROR_INVALID_PARAMETER, ERROR_SEM_TIMEOUT,
        };
        let code = match err.kind() {
            io::ErrorKind::NotFound => ERROR_FILE_NOT_FOUND,
            io::ErrorKind::PermissionDenied => ERROR_ACCESS_DENIED,
            io::ErrorKind::AlreadyExists => ERROR_ALREADY_EXISTS,
            io::ErrorKind::TimedOut => ERROR_SEM_TIMEOUT,
            _ => ERROR_INVALID_PARAMETER,
        };
        code.0 as i32
    }
}

#[cfg(unix)]
fn spawn_unix(request: SpawnRequest) -> io::Result<SpawnedChild> {
    use std::os::unix::process::CommandExt;
    use std::process::{Command, Stdio};

    fn stdio(source: ChildStdio) -> Stdio {
        match source {
            ChildStdio::Inherit => Stdio::inherit(),
            ChildStdio::Pipe(pipe) => Stdio::from(pipe.into_owned()),
        }
    }

    let mut cmd = Command::new(&request.executable);
    if let Some((arg0, rest)) = request.argv.split_first() {
        cmd.arg0(arg0).args(rest);
    }
    cmd.stdin(stdio(request.stdin))
        .stdout(stdio(request.stdout))
        .stderr(stdio(request.stderr));

    let child = cmd.spawn()?;
    // The child is reaped through the process table, not through `Child`.
    Ok(SpawnedChild {
        pid: Pid::from(child.id()),
    })
}

#[cfg(windows)]
fn spawn_windows(request: SpawnRequest) -> io::Result<SpawnedChild> {
    use crate::command_line::command_line_from_argv;
    use std::os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle};
    use windows::core::{PCWSTR, PWSTR};
    use windows::Win32::Foundation::{CloseHandle, HANDLE};
    use windows::Win32::System::Console::{
        GetStdHandle, STD_ERROR_HANDLE, STD_HANDLE, STD_INPUT_HANDLE, STD_OUTPUT_HANDLE,
    };
    use windows::Win32::System::Threading::{
        CreateProcessW, PROCESS_CREATION_FLAGS, PROCESS_INFORMATION, STARTF_USESTDHANDLES,
        STARTUPINFOW,
    };

    fn wide(s: &str) -> Vec<u16> {
        s.encode_utf16().chain(std::iter::once(0)).collect()
    }

    // Pipe handles stay owned here until CreateProcessW has duplicated them.
    fn handle(
        source: ChildStdio,
        fallback: STD_HANDLE,
    ) -> io::Result<(HANDLE, Option<OwnedHandle>)> {
        match source {
            ChildStdio::Inherit => {
                let h = unsafe { GetStdHandle(fallback) }.map_err(io::Error::from)?;
                Ok((h, None))
            }
            ChildStdio::Pipe(pipe) => {
                let owned = pipe.into_owned();
                Ok((HANDLE(owned.as_raw_handle()), Some(owned)))
            }
        }
    }

    let (stdin, _stdin_guard) = handle(request.stdin, STD_INPUT_HANDLE)?;
    let (stdout, _stdout_guard) = handle(request.stdout, STD_OUTPUT_HANDLE)?;
    let (stderr, _stderr_guard) = handle(request.stderr, STD_ERROR_HANDLE)?;

    let application = wide(&request.executable);
    let mut command_line = wide(&command_line_from_argv(&request.argv));

    let startup = STARTUPINFOW {
        cb: std::mem::size_of::<STARTUPINFOW>() as u32,
        dwFlags: STARTF_USESTDHANDLES,
        hStdInput: stdin,
        hStdOutput: stdout,
        hStdError: stderr,
        ..Default::default()
    };
    let mut info = PROCESS_INFORMATION::default();

    unsafe {
        CreateProcessW(
            PCWSTR(application.as_ptr()),
            PWSTR(command_line.as_mut_ptr()),
            None,
            None,
            true,
            PROCESS_CREATION_FLAGS(0),
            None,
            PCWSTR::null(),
            &startup,
            &mut info,
        )
    }
    .map_err(io::Error::from)?;

    let _ = unsafe { CloseHandle(info.hThread) };
    // SAFETY: hProcess is a fresh handle returned by CreateProcessW.
    let process = unsafe { OwnedHandle::from_raw_handle(info.hProcess.0) };
    Ok(SpawnedChild {
        pid: Pid::from(info.dwProcessId),
        process,
    })
}
