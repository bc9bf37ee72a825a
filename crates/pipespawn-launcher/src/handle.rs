//! Caller-side view of one launched child.

use pipespawn_common::{Error, Pid, PipeKind, PipeTag, Result};
use pipespawn_pipes::{PipeName, PipeStream};

/// One process-owned pipe: its name, and the caller's end while open.
#[derive(Debug)]
pub(crate) struct PipeSlot {
    pub(crate) name: PipeName,
    pub(crate) stream: Option<PipeStream>,
}

/// A running (or finished) child with its process-owned pipes.
///
/// Returned by [`Launcher::launch`](crate::Launcher::launch) and consumed by
/// [`Launcher::delete_pipes`](crate::Launcher::delete_pipes), which closes
/// whatever streams are still open and removes every pipe name. Streams
/// taken out with the `take_*` methods are closed by their new owner; their
/// names are still removed by `delete_pipes`.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Pid,
    pipe_tag: PipeTag,
    input: Option<PipeSlot>,
    output: Option<PipeSlot>,
    error: Option<PipeSlot>,
}

impl ProcessHandle {
    pub(crate) fn new(pid: Pid, pipe_tag: PipeTag) -> Self {
        Self {
            pid,
            pipe_tag,
            input: None,
            output: None,
            error: None,
        }
    }

    pub(crate) fn attach(&mut self, stream: PipeStream) {
        let kind = stream.kind();
        let slot = Some(PipeSlot {
            name: stream.name().clone(),
            stream: Some(stream),
        });
        match kind {
            PipeKind::In => self.input = slot,
            PipeKind::Out => self.output = slot,
            PipeKind::Err => self.error = slot,
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn pipe_tag(&self) -> PipeTag {
        self.pipe_tag
    }

    /// Writable end of the child's input pipe.
    pub fn input(&mut self) -> Option<&mut PipeStream> {
        Self::stream_mut(&mut self.input)
    }

    /// Readable end of the `_out` pipe.
    pub fn output(&mut self) -> Option<&mut PipeStream> {
        Self::stream_mut(&mut self.output)
    }

    /// Readable end of the `_err` pipe.
    pub fn error(&mut self) -> Option<&mut PipeStream> {
        Self::stream_mut(&mut self.error)
    }

    pub fn take_input(&mut self) -> Option<PipeStream> {
        self.input.as_mut().and_then(|slot| slot.stream.take())
    }

    pub fn take_output(&mut self) -> Option<PipeStream> {
        self.output.as_mut().and_then(|slot| slot.stream.take())
    }

    pub fn take_error(&mut self) -> Option<PipeStream> {
        self.error.as_mut().and_then(|slot| slot.stream.take())
    }

    /// Close the input stream now so the child sees end of stream. The pipe
    /// name stays registered until `delete_pipes`.
    pub fn close_input(&mut self) -> Result<()> {
        match self.take_input() {
            Some(stream) => {
                let name = stream.name().to_string();
                stream.close().map_err(|e| Error::pipe_close(name, e))
            }
            None => Ok(()),
        }
    }

    /// Names of all process-owned pipes of this child, in, out, err order.
    pub fn pipe_names(&self) -> impl Iterator<Item = &PipeName> {
        [&self.input, &self.output, &self.error]
            .into_iter()
            .filter_map(|slot| slot.as_ref().map(|slot| &slot.name))
    }

    pub(crate) fn into_slots(self) -> impl Iterator<Item = PipeSlot> {
        [self.input, self.output, self.error].into_iter().flatten()
    }

    fn stream_mut(slot: &mut Option<PipeSlot>) -> Option<&mut PipeStream> {
        slot.as_mut().and_then(|slot| slot.stream.as_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_handle_has_no_pipes() {
        let mut handle = ProcessHandle::new(42, 7);
        assert_eq!(handle.pid(), 42);
        assert_eq!(handle.pipe_tag(), 7);
        assert!(handle.input().is_none());
        assert!(handle.output().is_none());
        assert!(handle.error().is_none());
        assert_eq!(handle.pipe_names().count(), 0);
        assert!(handle.close_input().is_ok());
        assert_eq!(handle.into_slots().count(), 0);
    }
}
