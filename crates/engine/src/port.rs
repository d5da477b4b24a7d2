//! Port manager / hub (spec §4.6)

use std::sync::Arc;

use crate::session::DeviceSession;

/// Inward notification surface to the OS-side hub collaborator (spec
/// §1, §6). The port manager calls this on attach/reclaim; publishing
/// descriptors and tearing down PnP state is entirely the
/// collaborator's concern.
pub trait HubDelegate: Send + Sync {
    fn plug(&self, port: u8, fields: &protocol::ImportedDeviceFields);
    fn unplug(&self, port: u8);
}

/// No-op [`HubDelegate`], used by tests and by callers with no real OS
/// PnP integration available (the CLI in this workspace).
#[derive(Debug, Default)]
pub struct NullHubDelegate;

impl HubDelegate for NullHubDelegate {
    fn plug(&self, _port: u8, _fields: &protocol::ImportedDeviceFields) {}
    fn unplug(&self, _port: u8) {}
}

enum Slot {
    Empty,
    /// Reserved by `allocate()` ahead of the handshake; not yet bound
    /// to a session. Lets the caller reclaim the port on handshake
    /// failure without a session ever having existed.
    Reserved,
    Claimed(Arc<DeviceSession>),
}

/// Fixed-size array of hub port slots, index 1..=N (port 0 is
/// reserved and always empty). Port search order is deterministic
/// (ascending) so tests can assert the port assigned to a given
/// attach order.
pub struct PortTable {
    slots: Vec<Slot>,
}

impl PortTable {
    /// Creates a table with `n` usable ports (1..=n).
    pub fn new(n: usize) -> Self {
        let mut slots = Vec::with_capacity(n + 1);
        slots.push(Slot::Empty); // port 0, reserved, never allocated
        for _ in 1..=n {
            slots.push(Slot::Empty);
        }
        Self { slots }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len() - 1
    }

    /// Scans ports 1..N ascending, returns the first empty one and
    /// marks it `Reserved`. Returns `None` if the hub is full.
    pub fn allocate(&mut self) -> Option<u8> {
        for (port, slot) in self.slots.iter_mut().enumerate().skip(1) {
            if matches!(slot, Slot::Empty) {
                *slot = Slot::Reserved;
                return Some(port as u8);
            }
        }
        None
    }

    /// Installs `session` into a port previously returned by
    /// `allocate()`.
    pub fn bind(&mut self, port: u8, session: Arc<DeviceSession>) {
        self.slots[port as usize] = Slot::Claimed(session);
    }

    pub fn get(&self, port: u8) -> Option<Arc<DeviceSession>> {
        match self.slots.get(port as usize) {
            Some(Slot::Claimed(session)) => Some(session.clone()),
            _ => None,
        }
    }

    /// Frees `port` unconditionally (idempotent — freeing an already
    /// empty port is a no-op), returning the session that had occupied
    /// it, if any.
    pub fn free(&mut self, port: u8) -> Option<Arc<DeviceSession>> {
        if port == 0 || port as usize >= self.slots.len() {
            return None;
        }
        match std::mem::replace(&mut self.slots[port as usize], Slot::Empty) {
            Slot::Claimed(session) => Some(session),
            _ => None,
        }
    }

    /// Snapshot of ports occupied by a bound session, in ascending
    /// order.
    pub fn occupied_ports(&self) -> Vec<u8> {
        self.slots
            .iter()
            .enumerate()
            .skip(1)
            .filter_map(|(port, slot)| match slot {
                Slot::Claimed(_) => Some(port as u8),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_scans_ascending_and_deterministic() {
        let mut table = PortTable::new(4);
        assert_eq!(table.allocate(), Some(1));
        assert_eq!(table.allocate(), Some(2));
        table.free(1);
        // Port 1 is free again, so the next allocate picks it up before 3.
        assert_eq!(table.allocate(), Some(1));
    }

    #[test]
    fn allocate_returns_none_when_full() {
        let mut table = PortTable::new(2);
        assert_eq!(table.allocate(), Some(1));
        assert_eq!(table.allocate(), Some(2));
        assert_eq!(table.allocate(), None);
    }

    #[test]
    fn free_on_reserved_but_unbound_port_releases_it() {
        let mut table = PortTable::new(2);
        let port = table.allocate().unwrap();
        assert!(table.free(port).is_none());
        assert_eq!(table.allocate(), Some(port));
    }

    #[test]
    fn free_is_idempotent() {
        let mut table = PortTable::new(2);
        assert!(table.free(1).is_none());
        assert!(table.free(1).is_none());
    }

    #[test]
    fn port_zero_is_never_allocated_or_freed() {
        let mut table = PortTable::new(2);
        assert!(table.free(0).is_none());
        assert!(table.get(0).is_none());
    }

    #[test]
    fn occupied_ports_reports_only_bound_sessions() {
        let mut table = PortTable::new(3);
        table.allocate(); // port 1, Reserved but unbound
        assert!(table.occupied_ports().is_empty());
    }
}
