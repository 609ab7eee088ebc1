//! VXI-11 GPIB-over-TCP instrument driver.
//!
//! Mirrors `drvVxi11.c`'s component split: [`rpc`] is the transport,
//! [`link`] the device-link table, [`device_io`]/[`gpib`] the upward-facing
//! I/O and GPIB-control facets, [`srq`] the reverse-channel SRQ listener,
//! [`port`] the facade tying them together, and [`config`] the
//! `vxi11Configure`-equivalent entry point.

pub mod codes;
pub mod config;
pub mod device_io;
pub mod error;
pub mod gpib;
pub mod link;
pub mod observer;
pub mod port;
pub mod rpc;
pub mod srq;

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
