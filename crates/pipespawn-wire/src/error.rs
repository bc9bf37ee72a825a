use pipespawn_common::FatalError;
use std::io;
use thiserror::Error;

/// Decoding failure on the control channel.
#[derive(Debug, Error)]
pub enum WireError {
    /// End of stream in the middle of a value. The peer is gone.
    #[error("stream closed mid-message")]
    Closed,

    #[error("unknown opcode {0}")]
    UnknownOpcode(u8),

    #[error("invalid length prefix {0}")]
    InvalidLength(i32),

    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    #[error("unknown process state code {0}")]
    UnknownState(i32),

    /// A launch reply that is neither a pid nor a negated error code.
    #[error("invalid launch reply {0}")]
    InvalidSpawnReply(i64),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl WireError {
    /// True for a peer that went away rather than a garbled message.
    pub fn is_closed(&self) -> bool {
        matches!(self, WireError::Closed)
    }

    pub(crate) fn from_read(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            WireError::Closed
        } else {
            WireError::Io(err)
        }
    }
}

impl From<WireError> for FatalError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::Closed => FatalError::ChannelClosed,
            WireError::Io(e) => FatalError::ChannelIo(e),
            WireError::UnknownOpcode(op) => FatalError::UnknownCommand(op),
            other => FatalError::Malformed(other.to_string()),
        }
    }
}
