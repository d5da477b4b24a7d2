//! Attach/detach/list API (spec §6)
//!
//! [`Engine`] is the single owner of the port table and glues it to
//! [`DeviceSession`]: `attach` allocates a port, opens a session, and
//! binds it; `detach` unbinds and tears the session down; `list`
//! snapshots the bound devices for a caller that wants to enumerate
//! them (e.g. a `usbip list` style CLI command).

use std::sync::Arc;

use crate::error::{EngineError, Result};
use crate::port::{HubDelegate, PortTable};
use crate::session::{CompletionSink, DeviceSession};
use crate::types::{AttachOptions, DeviceLocation, EngineConfig, ImportedDevice};

/// Owns the virtual hub's port table and the live sessions bound to it.
pub struct Engine {
    ports: std::sync::Mutex<PortTable>,
    hub: Arc<dyn HubDelegate>,
}

impl Engine {
    pub fn new(config: EngineConfig, hub: Arc<dyn HubDelegate>) -> Self {
        Self {
            ports: std::sync::Mutex::new(PortTable::new(config.port_count)),
            hub,
        }
    }

    /// Connects to `location`, claims a free hub port, and binds the
    /// resulting session to it. On any failure after a port was
    /// reserved, the port is released before returning (spec §4.6).
    pub async fn attach(
        &self,
        location: DeviceLocation,
        options: AttachOptions,
        completion_sink: Arc<dyn CompletionSink>,
    ) -> Result<u8> {
        if self.find_port_for(&location).is_some() {
            return Err(EngineError::AlreadyAttached {
                host: location.hostname.clone(),
                service: location.service.clone(),
                busid: location.busid.clone(),
            });
        }

        let port = {
            let mut ports = self.ports.lock().expect("port table mutex poisoned");
            ports.allocate().ok_or(EngineError::NoFreePort)?
        };

        let open_result = DeviceSession::open(location.clone(), options, completion_sink).await;
        let (session, fields) = match open_result {
            Ok(pair) => pair,
            Err(error) => {
                self.ports.lock().expect("port table mutex poisoned").free(port);
                return Err(error);
            }
        };

        session.set_port(port);
        self.ports.lock().expect("port table mutex poisoned").bind(port, session);
        self.hub.plug(port, &fields);
        tracing::info!(port, %location, "device attached");
        Ok(port)
    }

    /// Detaches the session bound to `port`, or every bound session if
    /// `port <= 0` (spec §4.6). Idempotent: detaching an unbound port is
    /// a no-op.
    pub async fn detach(&self, port: i32) {
        let sessions: Vec<(u8, Arc<DeviceSession>)> = if port <= 0 {
            let mut ports = self.ports.lock().expect("port table mutex poisoned");
            ports
                .occupied_ports()
                .into_iter()
                .filter_map(|p| ports.free(p).map(|s| (p, s)))
                .collect()
        } else {
            let mut ports = self.ports.lock().expect("port table mutex poisoned");
            ports.free(port as u8).into_iter().map(|s| (port as u8, s)).collect()
        };

        for (bound_port, session) in sessions {
            session.detach().await;
            self.hub.unplug(bound_port);
            tracing::info!(port = bound_port, "device detached");
        }
    }

    /// Snapshots the devices currently bound to a hub port.
    pub fn list(&self) -> Vec<ImportedDevice> {
        let ports = self.ports.lock().expect("port table mutex poisoned");
        ports
            .occupied_ports()
            .into_iter()
            .filter_map(|port| {
                let session = ports.get(port)?;
                Some(ImportedDevice::new(
                    session.location().clone(),
                    port,
                    session.devid(),
                    session.speed(),
                    session.vendor_id(),
                    session.product_id(),
                ))
            })
            .collect()
    }

    /// Returns the session bound to `port`, for a caller that needs to
    /// drive `submit`/`cancel` directly (spec §4.5 treats those as the
    /// OS-side collaborator's business, not the attach/detach API's).
    pub fn session(&self, port: u8) -> Option<Arc<DeviceSession>> {
        self.ports.lock().expect("port table mutex poisoned").get(port)
    }

    fn find_port_for(&self, location: &DeviceLocation) -> Option<u8> {
        let ports = self.ports.lock().expect("port table mutex poisoned");
        ports.occupied_ports().into_iter().find(|&port| {
            ports
                .get(port)
                .map(|session| session.location() == location)
                .unwrap_or(false)
        })
    }
}
