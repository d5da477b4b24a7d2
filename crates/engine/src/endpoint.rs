//! Endpoint table (spec §4.2)

use std::collections::HashMap;

use protocol::Direction;

/// Transfer type of a USB endpoint, as carried in its descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferType {
    Control,
    Bulk,
    Interrupt,
    Iso,
}

/// (address, direction) pair uniquely identifying an endpoint within a
/// device. The control endpoint is bidirectional and keyed once, under
/// `Direction::Out`, by convention (spec §3: "recorded once").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointKey {
    pub address: u8,
    pub direction: Direction,
}

impl EndpointKey {
    pub fn new(address: u8, direction: Direction) -> Self {
        Self { address, direction }
    }

    pub fn control() -> Self {
        Self {
            address: 0,
            direction: Direction::Out,
        }
    }
}

/// An endpoint's pipe state: type, max packet size, polling interval,
/// and the data toggle bit the reader flips on each non-control
/// transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub key: EndpointKey,
    pub transfer_type: TransferType,
    pub max_packet: u16,
    pub interval: u8,
    pub toggle: bool,
}

#[derive(Debug, Clone)]
pub struct EndpointDescriptor {
    pub address: u8,
    pub direction: Direction,
    pub transfer_type: TransferType,
    pub max_packet: u16,
    pub interval: u8,
    /// The interface this endpoint belongs to, so `select_alt` can
    /// atomically replace every endpoint owned by one interface.
    pub interface: u8,
}

/// Per-device endpoint table. Endpoint 0 (control) is always present
/// from construction.
#[derive(Debug, Default)]
pub struct EndpointTable {
    endpoints: HashMap<EndpointKey, Endpoint>,
    interfaces: HashMap<u8, Vec<EndpointKey>>,
}

impl EndpointTable {
    pub fn new() -> Self {
        let mut endpoints = HashMap::new();
        let control_key = EndpointKey::control();
        endpoints.insert(
            control_key,
            Endpoint {
                key: control_key,
                transfer_type: TransferType::Control,
                max_packet: 64,
                interval: 0,
                toggle: false,
            },
        );
        Self {
            endpoints,
            interfaces: HashMap::new(),
        }
    }

    pub fn lookup(&self, key: EndpointKey) -> Option<Endpoint> {
        self.endpoints.get(&key).copied()
    }

    /// Installs `desc`, replacing any existing record for the same key
    /// (idempotent). Resets the toggle only on first install.
    pub fn install(&mut self, desc: EndpointDescriptor) {
        let key = EndpointKey::new(desc.address, desc.direction);
        let toggle = self.endpoints.get(&key).map(|e| e.toggle).unwrap_or(false);
        self.endpoints.insert(
            key,
            Endpoint {
                key,
                transfer_type: desc.transfer_type,
                max_packet: desc.max_packet,
                interval: desc.interval,
                toggle,
            },
        );
        let keys = self.interfaces.entry(desc.interface).or_default();
        if !keys.contains(&key) {
            keys.push(key);
        }
    }

    pub fn reset_toggle(&mut self, key: EndpointKey) {
        if let Some(ep) = self.endpoints.get_mut(&key) {
            ep.toggle = false;
        }
    }

    pub fn flip_toggle(&mut self, key: EndpointKey) {
        if let Some(ep) = self.endpoints.get_mut(&key) {
            ep.toggle = !ep.toggle;
        }
    }

    /// Replaces every endpoint belonging to `interface` with `new_eps`,
    /// atomically with respect to other table operations (the table is
    /// only ever mutated from the reader task — see spec §5). Returns
    /// the keys that were displaced, so the caller can cancel any
    /// pending requests referencing them with status `STALL`.
    pub fn select_alt(&mut self, interface: u8, new_eps: Vec<EndpointDescriptor>) -> Vec<EndpointKey> {
        let displaced = self.interfaces.remove(&interface).unwrap_or_default();
        for key in &displaced {
            self.endpoints.remove(key);
        }
        for desc in new_eps {
            self.install(EndpointDescriptor { interface, ..desc });
        }
        displaced
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_endpoint_present_from_construction() {
        let table = EndpointTable::new();
        assert!(table.lookup(EndpointKey::control()).is_some());
    }

    #[test]
    fn install_is_idempotent_per_key() {
        let mut table = EndpointTable::new();
        let desc = EndpointDescriptor {
            address: 1,
            direction: Direction::In,
            transfer_type: TransferType::Bulk,
            max_packet: 512,
            interval: 0,
            interface: 0,
        };
        table.install(desc.clone());
        table.install(desc);
        let key = EndpointKey::new(1, Direction::In);
        assert_eq!(
            table.interfaces.get(&0).unwrap().iter().filter(|k| **k == key).count(),
            1
        );
        assert!(table.lookup(key).is_some());
    }

    #[test]
    fn install_preserves_toggle_across_reinstall() {
        let mut table = EndpointTable::new();
        let key = EndpointKey::new(1, Direction::In);
        let desc = EndpointDescriptor {
            address: 1,
            direction: Direction::In,
            transfer_type: TransferType::Bulk,
            max_packet: 512,
            interval: 0,
            interface: 0,
        };
        table.install(desc.clone());
        table.flip_toggle(key);
        assert!(table.lookup(key).unwrap().toggle);

        table.install(desc);
        assert!(table.lookup(key).unwrap().toggle);
    }

    #[test]
    fn select_alt_replaces_interface_endpoints_atomically() {
        let mut table = EndpointTable::new();
        table.install(EndpointDescriptor {
            address: 1,
            direction: Direction::In,
            transfer_type: TransferType::Bulk,
            max_packet: 512,
            interval: 0,
            interface: 0,
        });
        let old_key = EndpointKey::new(1, Direction::In);

        let displaced = table.select_alt(
            0,
            vec![EndpointDescriptor {
                address: 2,
                direction: Direction::Out,
                transfer_type: TransferType::Bulk,
                max_packet: 512,
                interval: 0,
                interface: 0,
            }],
        );

        assert_eq!(displaced, vec![old_key]);
        assert!(table.lookup(old_key).is_none());
        assert!(table.lookup(EndpointKey::new(2, Direction::Out)).is_some());
    }
}
