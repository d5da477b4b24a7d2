//! Engine error taxonomy (spec §7)

use thiserror::Error;

/// Errors the attach/detach/submit API surfaces to callers. Per-request
/// outcomes (`Cancelled`, transfer status codes) are never represented
/// here — they complete through the per-request callback instead.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Handshake completed but the remote returned a nonzero status.
    #[error("import refused by remote, status={0}")]
    Refused(i32),

    /// TCP connect or handshake I/O failed.
    #[error("remote unreachable: {0}")]
    Unreachable(#[from] std::io::Error),

    /// Malformed frame, short read, sequence overflow, unknown command.
    #[error(transparent)]
    Protocol(#[from] protocol::ProtocolError),

    /// Operation attempted on a session that has moved past `Running`.
    #[error("session is gone")]
    Gone,

    /// `submit` targeted an endpoint absent from the endpoint table.
    #[error("no such endpoint: {0:?}")]
    InvalidEndpoint(crate::endpoint::EndpointKey),

    /// The hub has no free port to allocate.
    #[error("no free hub port")]
    NoFreePort,

    /// (host, busid) is already bound to a live port.
    #[error("{host}:{service} busid {busid} is already attached")]
    AlreadyAttached {
        host: String,
        service: String,
        busid: String,
    },

    /// Resource exhaustion or an invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl From<protocol::ImportReplyError> for EngineError {
    fn from(err: protocol::ImportReplyError) -> Self {
        match err {
            protocol::ImportReplyError::Refused(status) => EngineError::Refused(status),
            protocol::ImportReplyError::Protocol(p) => EngineError::Protocol(p),
        }
    }
}
