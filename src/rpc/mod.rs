//! ONC-RPC transport (component C1): wire framing, the portmapper client,
//! the VXI-11 procedure argument/result types, and the retry policy around
//! a transport-level timeout.

pub mod client;
pub mod onc;
pub mod portmap;
pub mod proto;
pub mod xdr;

pub use client::CoreTransport;
pub use xdr::XdrPack;
