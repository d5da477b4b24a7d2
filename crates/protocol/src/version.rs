//! USB/IP wire protocol version
//!
//! USB/IP pins a single version constant on the wire; there is no
//! major/minor negotiation the way there is in application-level framing.

/// USB/IP protocol version carried in every OP_REQ_IMPORT / OP_REP_IMPORT
/// handshake frame (network byte order 0x0111, i.e. "1.1.1").
pub const USBIP_VERSION: u16 = 0x0111;

/// Returns true if a peer-advertised version is one this implementation
/// can speak. Real USB/IP stubs are strict about this field, so we require
/// an exact match.
pub fn is_compatible(version: u16) -> bool {
    version == USBIP_VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_version_is_compatible() {
        assert!(is_compatible(0x0111));
    }

    #[test]
    fn other_versions_are_not_compatible() {
        assert!(!is_compatible(0x0110));
        assert!(!is_compatible(0x0200));
        assert!(!is_compatible(0));
    }
}
