//! FIFO backend.
//!
//! Opening a FIFO blocks until the opposite end is opened too, which would
//! let a vanished peer hang either side forever. Every open here is
//! non-blocking and the descriptor is switched back to blocking mode once
//! it exists:
//! - caller reads (`_out`, `_err`): the read end is opened at creation, so
//!   the worker's write open always finds a reader;
//! - caller writes (`_in`): a read-write "keeper" descriptor is held from
//!   creation until accept, so both the worker's read open and the caller's
//!   final write open always succeed. The keeper is dropped at accept so the
//!   child sees end of stream once the caller closes its end.

use crate::naming::PipeName;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::stat::Mode;
use nix::unistd;
use pipespawn_common::PipeKind;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::fd::{AsRawFd, IntoRawFd, OwnedFd};
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

pub(crate) struct PendingServer(File);

fn open_nonblocking(path: &Path, read: bool) -> io::Result<File> {
    let file = OpenOptions::new()
        .read(read)
        .write(!read)
        .custom_flags(nix::libc::O_NONBLOCK)
        .open(path)?;
    set_blocking(&file)?;
    Ok(file)
}

fn set_blocking(file: &File) -> io::Result<()> {
    let fd = file.as_raw_fd();
    let bits = fcntl(fd, FcntlArg::F_GETFL)?;
    let mut flags = OFlag::from_bits_truncate(bits);
    flags.remove(OFlag::O_NONBLOCK);
    fcntl(fd, FcntlArg::F_SETFL(flags))?;
    Ok(())
}

pub(crate) fn create_server(name: &PipeName, kind: PipeKind) -> io::Result<PendingServer> {
    let path = name.as_path();
    unistd::mkfifo(path, Mode::S_IRUSR | Mode::S_IWUSR)?;

    let opened = if kind.is_child_input() {
        OpenOptions::new().read(true).write(true).open(path)
    } else {
        OpenOptions::new()
            .read(true)
            .custom_flags(nix::libc::O_NONBLOCK)
            .open(path)
    };

    match opened {
        Ok(file) => Ok(PendingServer(file)),
        Err(e) => {
            let _ = fs::remove_file(path);
            Err(e)
        }
    }
}

pub(crate) fn accept(server: PendingServer, name: &PipeName, kind: PipeKind) -> io::Result<File> {
    if kind.is_child_input() {
        let writer = open_nonblocking(name.as_path(), false)?;
        drop(server);
        Ok(writer)
    } else {
        set_blocking(&server.0)?;
        Ok(server.0)
    }
}

pub(crate) fn connect_client(
    name: &PipeName,
    kind: PipeKind,
    timeout: Duration,
    poll_interval: Duration,
) -> io::Result<OwnedFd> {
    let path = name.as_path();
    wait_for_fifo(path, timeout, poll_interval)?;
    let file = open_nonblocking(path, kind.is_child_input())?;
    Ok(OwnedFd::from(file))
}

fn wait_for_fifo(path: &Path, timeout: Duration, poll_interval: Duration) -> io::Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        match fs::metadata(path) {
            Ok(meta) if meta.file_type().is_fifo() => return Ok(()),
            Ok(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{} is not a named pipe", path.display()),
                ))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if Instant::now() >= deadline {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("named pipe {} did not appear", path.display()),
                    ));
                }
                thread::sleep(poll_interval);
            }
            Err(e) => return Err(e),
        }
    }
}

pub(crate) fn duplicate(fd: &OwnedFd) -> io::Result<OwnedFd> {
    fd.try_clone()
}

pub(crate) fn remove(name: &PipeName) -> io::Result<()> {
    fs::remove_file(name.as_path())
}

pub(crate) fn close(file: File) -> io::Result<()> {
    unistd::close(file.into_raw_fd())?;
    Ok(())
}

#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "illumos",
    target_os = "solaris"
))]
pub(crate) fn anonymous_pipe() -> io::Result<(File, File)> {
    let (read, write) = unistd::pipe2(OFlag::O_CLOEXEC)?;
    Ok((File::from(read), File::from(write)))
}

// No pipe2 here; a spawn racing the fcntl calls can inherit an end.
#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "illumos",
    target_os = "solaris"
)))]
pub(crate) fn anonymous_pipe() -> io::Result<(File, File)> {
    use nix::fcntl::FdFlag;

    let (read, write) = unistd::pipe()?;
    for fd in [&read, &write] {
        fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
    }
    Ok((File::from(read), File::from(write)))
}
