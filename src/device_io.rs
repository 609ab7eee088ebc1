//! Device I/O engine (component C3): the upward-facing read/write/EOS facet
//! a Port Manager (out of scope) drives on a per-link basis.

use async_trait::async_trait;

use crate::{error::Result, link::GpibAddr};

/// Provided upward facet replacing the original's struct-of-function-pointers
/// `asynOctet` interface. A `Port` implements this once connected; every
/// method operates on the link already open for `addr` (opened via
/// `Port::connect`).
#[async_trait]
pub trait DeviceIo {
    /// Writes `data`, chunked to the link's negotiated `max_recv_size`,
    /// stopping early if the gateway ever reports writing fewer bytes than
    /// offered in a chunk (`drvVxi11.c:vxiWrite`'s
    /// `while(size==thisWrite && numchars>0)`). Returns the number of bytes
    /// actually written.
    async fn write(&mut self, addr: GpibAddr, data: &[u8]) -> Result<usize>;

    /// Reads until the device signals completion (a reply with a non-empty
    /// `reason`, VXI-11.1 Table B.3) or `max_chars` is exhausted. Returns the
    /// bytes read and the accumulated `eomReason` bitmask
    /// (`EOMCNT`/`EOMEOS`/`EOMEND` from [`crate::codes`]).
    async fn read(&mut self, addr: GpibAddr, max_chars: usize) -> Result<(Vec<u8>, u32)>;

    /// No-op: the original driver's `vxiFlush` does nothing, since VXI-11 has
    /// no flush primitive of its own.
    async fn flush(&mut self, addr: GpibAddr) -> Result<()>;

    /// Sets or clears the per-link end-of-string termination character.
    /// `None` clears it (original's `eoslen == 0`).
    async fn set_eos(&mut self, addr: GpibAddr, eos: Option<u8>) -> Result<()>;

    async fn get_eos(&mut self, addr: GpibAddr) -> Result<Option<u8>>;
}
