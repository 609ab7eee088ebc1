//! Configuration surface (component C8), the programmatic equivalent of
//! `vxi11Configure`'s IOC shell entry point. The interactive shell itself is
//! out of scope; this is what a future CLI/shell layer would call.

use std::{net::SocketAddr, time::Duration};

use crate::{
    codes::DEFAULT_RPC_TIMEOUT_SECS,
    error::{Error, Result},
    observer::{NullObserver, PortObserver},
    port::Port,
};

/// Mirrors `vxi11Configure(portName, hostName, recoverWithIFC, defaultTimeout,
/// vxiName, priority, disableAutoConnect)`. `priority` and
/// `disableAutoConnect` govern the out-of-scope Port Manager registration and
/// are accepted here only to keep the parameter list parity documented in
/// spec.md §4.8/§6; this crate does not act on them itself.
#[derive(Debug, Clone)]
pub struct PortConfig {
    pub port_name: String,
    pub host_name: String,
    pub recover_with_ifc: bool,
    /// `defTimeout`; `<= 0.0001` falls back to [`DEFAULT_RPC_TIMEOUT_SECS`],
    /// same threshold `vxi11Configure` uses.
    pub default_timeout_secs: f64,
    /// `"inst0"`, `"gpib0"`, ... — the name prefix `create_link` device
    /// strings are built from.
    pub vxi_name: String,
    pub priority: i32,
    pub disable_auto_connect: bool,
}

impl PortConfig {
    pub fn new(port_name: impl Into<String>, host_name: impl Into<String>, vxi_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            host_name: host_name.into(),
            recover_with_ifc: false,
            default_timeout_secs: DEFAULT_RPC_TIMEOUT_SECS,
            vxi_name: vxi_name.into(),
            priority: 0,
            disable_auto_connect: false,
        }
    }

    fn resolved_timeout(&self) -> f64 {
        if self.default_timeout_secs > 0.0001 {
            self.default_timeout_secs
        } else {
            DEFAULT_RPC_TIMEOUT_SECS
        }
    }
}

/// Builds a [`Port`] from a [`PortConfig`], resolving `host_name` and
/// applying the same defaulting rule `vxi11Configure` applies to
/// `defaultTimeout`. Does not itself connect the port
/// (`disable_auto_connect` has no Port Manager to act on here; callers
/// decide when to call [`Port::connect_port`]).
pub async fn configure(config: PortConfig, observer: Box<dyn PortObserver + Send>) -> Result<Port> {
    let mut addrs = tokio::net::lookup_host((config.host_name.as_str(), 0))
        .await
        .map_err(Error::Io)?;
    let host: SocketAddr = addrs
        .next()
        .ok_or_else(|| Error::NotConnected(format!("could not resolve host {}", config.host_name)))?;

    // `Port::new` derives `is_single_link` from `vxi_name`'s `inst` prefix,
    // same as `vxi11Configure` setting `pvxiPort->isSingleLink`.
    Ok(Port::new(
        host,
        config.vxi_name,
        config.resolved_timeout(),
        config.recover_with_ifc,
        observer,
    ))
}

/// Convenience wrapper using [`crate::observer::NullObserver`].
pub async fn configure_standalone(config: PortConfig) -> Result<Port> {
    configure(config, Box::new(NullObserver)).await
}

/// RPC-transport call timeout (distinct from the VXI-layer I/O timeout);
/// the original hardcodes this via `pvxiPort->vxiRpcTimeout`.
pub const DEFAULT_RPC_CALL_TIMEOUT: Duration = Duration::from_secs(10);
