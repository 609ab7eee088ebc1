//! GPIB control primitives (component C4): addressed/universal commands,
//! IFC/REN, bus status, and serial polling.

use std::time::Duration;

use async_trait::async_trait;

use crate::{codes::bus_status, error::Result, link::GpibAddr};

/// Provided upward facet replacing the original's `asynGpibPort`
/// struct-of-function-pointers.
#[async_trait]
pub trait GpibControl {
    /// Sends `data` with ATN asserted to the listen/talk address built from
    /// `addr` (`LADBASE`/`SADBASE` offsets), followed by the same "untalk,
    /// unlisten" sequence the original sends unconditionally after every
    /// addressed transaction.
    async fn addressed_cmd(&mut self, addr: GpibAddr, data: &[u8]) -> Result<()>;

    /// Sends a single GPIB universal command byte with ATN asserted.
    async fn universal_cmd(&mut self, cmd: u8) -> Result<()>;

    /// Asserts Interface Clear.
    async fn ifc(&mut self) -> Result<()>;

    /// Sets or clears Remote Enable.
    async fn ren(&mut self, on: bool) -> Result<()>;

    /// Queries one bus status line (`REN`, `SRQ`, `NDAC`, `SYSTEM_CONTROLLER`,
    /// `CONTROLLER_IN_CHARGE`, `TALKER`, `LISTENER`, or `BUS_ADDRESS`; see
    /// [`crate::codes::bus_status`]).
    async fn bus_status(&mut self, selector: u16) -> Result<u16>;

    /// Queries every boolean status line (all but `BUS_ADDRESS`) and
    /// combines them into one bitfield, selector `n` at bit `n`
    /// (`drvVxi11.c:vxiBusStatus`'s `request == 0` case: `status |= 1<<data`
    /// where `data` is the selector value itself, so bit 0 is unused).
    async fn bus_status_all(&mut self) -> Result<u32>;

    async fn srq_status(&mut self) -> Result<bool>;

    async fn srq_enable(&mut self, on: bool) -> Result<()>;

    /// No-op bracket, kept for interface parity with the original.
    async fn serial_poll_begin(&mut self) -> Result<()>;

    /// Serial-polls `addr`, opening its device link on demand if one isn't
    /// already open (`drvVxi11.c:vxiSerialPoll`). On `IOTIMEOUT` the gateway
    /// is sent the `IBSPD`/`IBUNT` workaround bytes before the error is
    /// returned, matching a known HP-gateway quirk the original works around.
    async fn serial_poll(&mut self, addr: GpibAddr, timeout: Duration) -> Result<u8>;

    async fn serial_poll_end(&mut self) -> Result<()>;
}

/// All boolean bus-status selectors, in ascending bit order, used by
/// `bus_status_all`.
pub const ALL_BOOLEAN_SELECTORS: [u16; 7] = [
    bus_status::REN,
    bus_status::SRQ,
    bus_status::NDAC,
    bus_status::SYSTEM_CONTROLLER,
    bus_status::CONTROLLER_IN_CHARGE,
    bus_status::TALKER,
    bus_status::LISTENER,
];
