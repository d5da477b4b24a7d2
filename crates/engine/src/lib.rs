//! USB/IP virtual host controller engine
//!
//! Owns the protocol state machine for attaching, operating, and
//! detaching remote USB devices: a [`session::DeviceSession`] per
//! remote connection, an [`api::Engine`] binding sessions to hub ports,
//! and the supporting seqnum/endpoint/request-registry bookkeeping each
//! session needs. The wire format itself lives in the `protocol` crate;
//! this crate is where that format meets concurrent, stateful USB
//! semantics.

pub mod api;
pub mod endpoint;
pub mod error;
pub mod port;
pub mod registry;
pub mod seq;
pub mod session;
pub mod test_support;
pub mod types;

pub use api::Engine;
pub use endpoint::{Endpoint, EndpointDescriptor, EndpointKey, EndpointTable, TransferType};
pub use error::{EngineError, Result};
pub use port::{HubDelegate, NullHubDelegate, PortTable};
pub use registry::{CompletionStatus, Request, RequestRegistry, RequestStatus};
pub use seq::SequenceAllocator;
pub use session::{ChannelCompletionSink, Completion, CompletionSink, DeviceSession, NullCompletionSink, SessionState};
pub use types::{AttachOptions, DeviceLocation, EngineConfig, ImportedDevice};
