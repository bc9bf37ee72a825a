//! Server/client roles of a process-owned pipe.

use crate::naming::PipeName;
use crate::sys;
use pipespawn_common::PipeKind;
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::time::Duration;
use tracing::{debug, warn};

#[cfg(unix)]
use std::os::fd::OwnedFd as OwnedPipeHandle;
#[cfg(windows)]
use std::os::windows::io::OwnedHandle as OwnedPipeHandle;

/// Operations on the pipe namespace.
///
/// [`SystemPipes`] is the real implementation; the trait exists so the
/// launcher can be handed a different fabric (tests inject failures).
pub trait PipeFabric: Send + Sync + fmt::Debug {
    /// Create the caller's (server) end of `name`. The caller writes to
    /// [`PipeKind::In`] and reads from the other two.
    fn create(&self, name: &PipeName, kind: PipeKind) -> io::Result<PendingPipe>;

    /// Wait up to `timeout` for `name` to exist, then open the client end
    /// with the direction complementary to the server end.
    fn connect(&self, name: &PipeName, kind: PipeKind, timeout: Duration)
        -> io::Result<ChildPipe>;

    /// Remove the pipe object from the namespace.
    fn remove(&self, name: &PipeName) -> io::Result<()>;
}

/// The operating system's pipe namespace.
#[derive(Debug, Clone)]
pub struct SystemPipes {
    poll_interval: Duration,
}

impl SystemPipes {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }
}

impl Default for SystemPipes {
    fn default() -> Self {
        Self::new(Duration::from_millis(10))
    }
}

impl PipeFabric for SystemPipes {
    fn create(&self, name: &PipeName, kind: PipeKind) -> io::Result<PendingPipe> {
        let inner = sys::create_server(name, kind)?;
        debug!("Created named pipe {}", name);
        Ok(PendingPipe {
            name: name.clone(),
            kind,
            inner: Some(inner),
        })
    }

    fn connect(
        &self,
        name: &PipeName,
        kind: PipeKind,
        timeout: Duration,
    ) -> io::Result<ChildPipe> {
        let handle = sys::connect_client(name, kind, timeout, self.poll_interval)?;
        debug!("Connected to named pipe {}", name);
        Ok(ChildPipe { kind, handle })
    }

    fn remove(&self, name: &PipeName) -> io::Result<()> {
        sys::remove(name)
    }
}

/// A server end that exists but whose child has not been created yet.
///
/// Dropping it without [`accept`](Self::accept) closes the end and removes
/// the pipe object, so an aborted launch leaves nothing behind.
pub struct PendingPipe {
    name: PipeName,
    kind: PipeKind,
    inner: Option<sys::PendingServer>,
}

impl PendingPipe {
    pub fn name(&self) -> &PipeName {
        &self.name
    }

    pub fn kind(&self) -> PipeKind {
        self.kind
    }

    /// Finish the server side once the child holds the client end.
    pub fn accept(mut self) -> io::Result<PipeStream> {
        let inner = self
            .inner
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "pipe already accepted"))?;
        match sys::accept(inner, &self.name, self.kind) {
            Ok(file) => Ok(PipeStream {
                name: self.name.clone(),
                kind: self.kind,
                file,
            }),
            Err(e) => {
                if let Err(remove_err) = sys::remove(&self.name) {
                    warn!("Failed to remove pipe {} after accept error: {}", self.name, remove_err);
                }
                Err(e)
            }
        }
    }
}

impl Drop for PendingPipe {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            drop(inner);
            if let Err(e) = sys::remove(&self.name) {
                warn!("Failed to remove abandoned pipe {}: {}", self.name, e);
            }
        }
    }
}

impl fmt::Debug for PendingPipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingPipe")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("accepted", &self.inner.is_none())
            .finish()
    }
}

/// The caller's connected end of a process-owned pipe.
#[derive(Debug)]
pub struct PipeStream {
    name: PipeName,
    kind: PipeKind,
    file: File,
}

impl PipeStream {
    pub fn name(&self) -> &PipeName {
        &self.name
    }

    pub fn kind(&self) -> PipeKind {
        self.kind
    }

    /// Close the stream and report the OS result, which `drop` would
    /// swallow.
    pub fn close(self) -> io::Result<()> {
        sys::close(self.file)
    }
}

impl Read for PipeStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for PipeStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Client end of a pipe, destined to become a child's standard stream.
#[derive(Debug)]
pub struct ChildPipe {
    kind: PipeKind,
    handle: OwnedPipeHandle,
}

impl ChildPipe {
    pub fn kind(&self) -> PipeKind {
        self.kind
    }

    /// Second handle to the same pipe, for stdout and stderr sharing one pipe.
    pub fn try_clone(&self) -> io::Result<ChildPipe> {
        Ok(ChildPipe {
            kind: self.kind,
            handle: sys::duplicate(&self.handle)?,
        })
    }

    pub fn into_owned(self) -> OwnedPipeHandle {
        self.handle
    }
}

/// Unnamed pipe: `(read end, write end)`. Neither end is inherited by
/// children.
pub fn anonymous_pipe() -> io::Result<(File, File)> {
    sys::anonymous_pipe()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::naming::PipeNamespace;
    use std::os::unix::fs::FileTypeExt;

    fn name_in(dir: &tempfile::TempDir, kind: PipeKind) -> PipeName {
        let prefix = PipeNamespace::new(dir.path()).prefix(std::process::id(), 1);
        PipeName::for_kind(&prefix, kind)
    }

    #[test]
    fn test_create_makes_fifo() {
        let dir = tempfile::tempdir().unwrap();
        let name = name_in(&dir, PipeKind::Out);
        let pending = SystemPipes::default().create(&name, PipeKind::Out).unwrap();

        let meta = std::fs::metadata(name.as_path()).unwrap();
        assert!(meta.file_type().is_fifo());
        drop(pending);
        assert!(!name.as_path().exists(), "abandoned pipe must be removed");
    }

    #[test]
    fn test_duplicate_create_collides() {
        let dir = tempfile::tempdir().unwrap();
        let name = name_in(&dir, PipeKind::In);
        let fabric = SystemPipes::default();
        let _first = fabric.create(&name, PipeKind::In).unwrap();
        let err = fabric.create(&name, PipeKind::In).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_output_pipe_carries_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let name = name_in(&dir, PipeKind::Out);
        let fabric = SystemPipes::default();

        let pending = fabric.create(&name, PipeKind::Out).unwrap();
        let child = fabric
            .connect(&name, PipeKind::Out, Duration::from_secs(1))
            .unwrap();
        let mut stream = pending.accept().unwrap();

        let mut writer = File::from(child.into_owned());
        writer.write_all(b"hello").unwrap();
        drop(writer);

        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello");

        stream.close().unwrap();
        fabric.remove(&name).unwrap();
        assert!(!name.as_path().exists());
    }

    #[test]
    fn test_input_pipe_carries_bytes_and_eof() {
        let dir = tempfile::tempdir().unwrap();
        let name = name_in(&dir, PipeKind::In);
        let fabric = SystemPipes::default();

        let pending = fabric.create(&name, PipeKind::In).unwrap();
        let child = fabric
            .connect(&name, PipeKind::In, Duration::from_secs(1))
            .unwrap();
        let mut stream = pending.accept().unwrap();
        stream.write_all(b"abc").unwrap();
        stream.close().unwrap();

        let mut reader = File::from(child.into_owned());
        let mut got = Vec::new();
        reader.read_to_end(&mut got).unwrap();
        assert_eq!(got, b"abc");
        fabric.remove(&name).unwrap();
    }

    #[test]
    fn test_connect_times_out_on_missing_pipe() {
        let dir = tempfile::tempdir().unwrap();
        let name = name_in(&dir, PipeKind::Err);
        let err = SystemPipes::new(Duration::from_millis(1))
            .connect(&name, PipeKind::Err, Duration::from_millis(20))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn test_connect_rejects_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let name = name_in(&dir, PipeKind::Err);
        std::fs::write(name.as_path(), b"not a pipe").unwrap();
        let err = SystemPipes::default()
            .connect(&name, PipeKind::Err, Duration::from_millis(20))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_anonymous_pipe_ends_close_on_exec() {
        use nix::fcntl::{fcntl, FcntlArg, FdFlag};
        use std::os::fd::AsRawFd;

        let (r, w) = anonymous_pipe().unwrap();
        for end in [&r, &w] {
            let bits = fcntl(end.as_raw_fd(), FcntlArg::F_GETFD).unwrap();
            assert!(FdFlag::from_bits_truncate(bits).contains(FdFlag::FD_CLOEXEC));
        }
    }

    #[test]
    fn test_anonymous_pipe() {
        let (mut r, mut w) = anonymous_pipe().unwrap();
        w.write_all(b"ping").unwrap();
        drop(w);
        let mut got = String::new();
        r.read_to_string(&mut got).unwrap();
        assert_eq!(got, "ping");
    }
}
