//! Port Manager collaborator API (consumed): the notification hooks the
//! original calls through `pasynManager`/`pasynGpib` at documented points
//! (`exceptionConnect`, `exceptionDisconnect`, and per-link connect/
//! disconnect). The Port Manager itself is out of scope; a caller supplies
//! whichever implementation wires these into its own broker, or uses
//! [`NullObserver`].

use async_trait::async_trait;

use crate::link::GpibAddr;

#[async_trait]
pub trait PortObserver {
    /// Called after a device link for `addr` is successfully opened.
    async fn connect_device(&mut self, addr: GpibAddr) {
        let _ = addr;
    }

    /// Called after a device link for `addr` is closed.
    async fn disconnect(&mut self, addr: GpibAddr) {
        let _ = addr;
    }

    /// Called once the port (transport + server link + SRQ subsystem) has
    /// finished connecting (`pasynManager->exceptionConnect`).
    async fn exception_connect(&mut self) {}

    /// Called when the port tears down, whether requested or due to a
    /// transport failure (`pasynManager->exceptionDisconnect`).
    async fn exception_disconnect(&mut self) {}
}

/// No-op observer for callers that don't need the notification hooks.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

#[async_trait]
impl PortObserver for NullObserver {}
