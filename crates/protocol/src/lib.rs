//! USB/IP wire protocol
//!
//! Frame encoding/decoding for the USB/IP v1.1.1 handshake and transfer
//! frames, plus the domain types shared with the engine crate.
//!
//! # Example
//!
//! ```
//! use protocol::codec::{encode_op_import, decode_header};
//!
//! let mut buf = Vec::new();
//! encode_op_import(&mut buf, "1-1").unwrap();
//! assert_eq!(buf.len(), 40);
//! ```

pub mod codec;
pub mod error;
pub mod types;
pub mod version;

pub use codec::{
    CmdSubmitHeader, CmdUnlinkHeader, Frame, RetSubmitHeader, RetUnlinkHeader, decode_header,
    decode_op_import_reply, encode_cmd_submit, encode_cmd_unlink, encode_op_import,
    encode_ret_submit, encode_ret_unlink, read_iso_descriptors, write_iso_descriptors,
};
pub use error::{ImportReplyError, ProtocolError, Result};
pub use types::{Command, Direction, DeviceSpeed, ImportedDeviceFields, IsoPacketDescriptor};
pub use version::{USBIP_VERSION, is_compatible};
