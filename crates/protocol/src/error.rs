//! Protocol error types

use thiserror::Error;

/// Errors raised while decoding or encoding USB/IP wire frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A frame was shorter than its declared/required length.
    #[error("short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    /// A `busid` string did not fit in the 32-byte wire field.
    #[error("busid {0:?} is longer than the 32-byte wire field")]
    BusidTooLong(String),

    /// The peer advertised a version we don't speak.
    #[error("incompatible protocol version: 0x{0:04x}")]
    IncompatibleVersion(u16),

    /// A command code did not match any known USB/IP frame type.
    #[error("unknown command code: {0}")]
    UnknownCommand(u32),

    /// The sequence allocator exhausted its 31-bit space within a session.
    #[error("sequence number counter wrapped")]
    SequenceOverflow,

    /// I/O error while reading or writing a frame.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for protocol codec operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Outcome of decoding an OP_REP_IMPORT reply: either the remote accepted
/// the import and handed back device fields, or it refused with a nonzero
/// status, or the frame itself was malformed.
#[derive(Debug, Error)]
pub enum ImportReplyError {
    /// The remote understood the request but refused it (busid unknown,
    /// already exported elsewhere, etc).
    #[error("import refused by remote, status={0}")]
    Refused(i32),

    /// The reply frame was malformed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_read_display() {
        let err = ProtocolError::ShortRead {
            expected: 48,
            actual: 12,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("48"));
        assert!(msg.contains("12"));
    }

    #[test]
    fn unknown_command_display() {
        let err = ProtocolError::UnknownCommand(0xdead);
        assert!(format!("{}", err).contains("57005"));
    }

    #[test]
    fn import_reply_error_wraps_protocol_error() {
        let err: ImportReplyError = ProtocolError::SequenceOverflow.into();
        assert!(matches!(err, ImportReplyError::Protocol(_)));
    }
}
