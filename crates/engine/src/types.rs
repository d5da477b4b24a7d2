//! Engine-level data model (spec §3)

use std::time::Duration;

use protocol::DeviceSpeed;

/// Identifies a remote device before a session exists. Immutable once a
/// session is created from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceLocation {
    pub hostname: String,
    pub service: String,
    pub busid: String,
}

impl DeviceLocation {
    pub fn new(hostname: impl Into<String>, service: impl Into<String>, busid: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            service: service.into(),
            busid: busid.into(),
        }
    }
}

impl std::fmt::Display for DeviceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} ({})", self.hostname, self.service, self.busid)
    }
}

/// A device bound to a live hub port, as surfaced by `list()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedDevice {
    pub location: DeviceLocation,
    pub port: u8,
    pub devid: u32,
    pub speed: DeviceSpeed,
    pub vendor_id: u16,
    pub product_id: u16,
}

impl ImportedDevice {
    pub fn new(location: DeviceLocation, port: u8, devid: u32, speed: DeviceSpeed, vendor_id: u16, product_id: u16) -> Self {
        Self {
            location,
            port,
            devid,
            speed,
            vendor_id,
            product_id,
        }
    }
}

/// Per-`attach` tuning, distinct from process-wide [`EngineConfig`].
#[derive(Debug, Clone, Copy)]
pub struct AttachOptions {
    pub connect_timeout: Duration,
}

impl Default for AttachOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Process-wide engine configuration, supplied at `Engine::init` and
/// never persisted (spec §6: "Persisted state: none").
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Number of virtual hub ports, 1..=port_count.
    pub port_count: usize,
    /// Default connect timeout used when an `attach` call doesn't
    /// override it via `AttachOptions`.
    pub default_connect_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            port_count: 8,
            default_connect_timeout: Duration::from_secs(10),
        }
    }
}
