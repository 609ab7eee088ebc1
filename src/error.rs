use std::{fmt::Display, result};

use crate::codes::vxi_error;

pub type Result<T, E = Error> = result::Result<T, E>;

/// Transport-level failure of an ONC-RPC call, distinct from a VXI-layer
/// error carried inside an otherwise-successful reply ([`VxiErrorCode`]).
#[derive(Debug)]
pub enum RpcError {
    /// No reply arrived before the call's deadline. Whether this is retried
    /// is up to the caller's `rpctimeout` setting, not this layer.
    TimedOut,
    /// Connect, send, or recv on the underlying TCP socket failed.
    Connection(std::io::Error),
    /// Reply did not decode as valid XDR, or used an unexpected message type.
    Malformed(String),
    ProgramUnavailable(u32),
    ProgramMismatch { low: u32, high: u32 },
    ProcedureUnavailable(u32),
    AuthError(u32),
}

impl Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpcError::TimedOut => write!(f, "RPC call timed out"),
            RpcError::Connection(e) => write!(f, "RPC transport error: {e}"),
            RpcError::Malformed(desc) => write!(f, "malformed RPC reply: {desc}"),
            RpcError::ProgramUnavailable(prog) => write!(f, "program {prog} unavailable on gateway"),
            RpcError::ProgramMismatch { low, high } => {
                write!(f, "program version mismatch, gateway supports {low}..={high}")
            }
            RpcError::ProcedureUnavailable(proc) => write!(f, "procedure {proc} unavailable"),
            RpcError::AuthError(stat) => write!(f, "RPC authentication rejected (stat {stat})"),
        }
    }
}

/// `Device_ErrorCode` as returned inside a successful RPC reply
/// (VXI-11.1 Table B.2). Carrying this separately from [`RpcError`] keeps
/// the "did the call complete" question distinct from "did the device
/// accept it", which matters for the retry logic in [`crate::rpc`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VxiErrorCode {
    SyntaxError,
    DeviceNotAccessible,
    InvalidLinkIdentifier,
    ParameterError,
    ChannelNotEstablished,
    OperationNotSupported,
    OutOfResources,
    DeviceLockedByAnotherLink,
    NoLockHeldByThisLink,
    IoTimeout,
    IoError,
    InvalidAddress,
    Abort,
    ChannelAlreadyEstablished,
    Unknown(i32),
}

impl VxiErrorCode {
    /// Maps a raw `error` field to a code, or `None` if it signals success.
    pub fn from_raw(code: i32) -> Option<Self> {
        use vxi_error::*;
        Some(match code {
            VXI_OK => return None,
            VXI_SYNERR => Self::SyntaxError,
            VXI_NOACCESS => Self::DeviceNotAccessible,
            VXI_INVLINK => Self::InvalidLinkIdentifier,
            VXI_PARAMERR => Self::ParameterError,
            VXI_NOCHAN => Self::ChannelNotEstablished,
            VXI_NOTSUPP => Self::OperationNotSupported,
            VXI_NORES => Self::OutOfResources,
            VXI_DEVLOCK => Self::DeviceLockedByAnotherLink,
            VXI_NOLOCK => Self::NoLockHeldByThisLink,
            VXI_IOTIMEOUT => Self::IoTimeout,
            VXI_IOERR => Self::IoError,
            VXI_INVADDR => Self::InvalidAddress,
            VXI_ABORT => Self::Abort,
            VXI_CHANEXIST => Self::ChannelAlreadyEstablished,
            other => Self::Unknown(other),
        })
    }
}

impl Display for VxiErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SyntaxError => write!(f, "syntax error"),
            Self::DeviceNotAccessible => write!(f, "device not accessible"),
            Self::InvalidLinkIdentifier => write!(f, "invalid link identifier"),
            Self::ParameterError => write!(f, "parameter error"),
            Self::ChannelNotEstablished => write!(f, "channel not established"),
            Self::OperationNotSupported => write!(f, "operation not supported"),
            Self::OutOfResources => write!(f, "out of resources"),
            Self::DeviceLockedByAnotherLink => write!(f, "device locked by another link"),
            Self::NoLockHeldByThisLink => write!(f, "no lock held by this link"),
            Self::IoTimeout => write!(f, "I/O timeout"),
            Self::IoError => write!(f, "I/O error"),
            Self::InvalidAddress => write!(f, "invalid address"),
            Self::Abort => write!(f, "abort"),
            Self::ChannelAlreadyEstablished => write!(f, "channel already established"),
            Self::Unknown(code) => write!(f, "unknown device error {code}"),
        }
    }
}

#[derive(Debug)]
pub enum Error {
    /// ONC-RPC call never completed (transport timeout, refused, malformed reply, ...).
    Rpc(RpcError),
    /// Call completed, device rejected it.
    Vxi(VxiErrorCode),
    /// The operation ran past its deadline at a layer above RPC transport,
    /// e.g. a read that kept receiving `CHR`-terminated partials with no END.
    Timeout(String),
    /// Port or device link is not open.
    NotConnected(String),
    /// GPIB primary/secondary address is out of the legal 0..31 range.
    InvalidAddress(i32),
    Unsupported(String),
    Io(std::io::Error),
    /// A serial poll came back `VXI_IOTIMEOUT`. `vxiSerialPoll` deliberately
    /// returns `asynError` rather than a timeout status for this case, so
    /// this is kept distinct from [`Error::Vxi`] to avoid being classified
    /// as [`Outcome::Timeout`].
    SerialPollFailed(VxiErrorCode),
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Rpc(e) => write!(f, "{e}"),
            Error::Vxi(e) => write!(f, "{e}"),
            Error::Timeout(desc) => write!(f, "timed out: {desc}"),
            Error::NotConnected(desc) => write!(f, "not connected: {desc}"),
            Error::InvalidAddress(addr) => write!(f, "invalid GPIB address {addr}"),
            Error::Unsupported(desc) => write!(f, "not supported: {desc}"),
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::SerialPollFailed(e) => write!(f, "serial poll failed: {e}"),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<RpcError> for Error {
    fn from(value: RpcError) -> Self {
        Self::Rpc(value)
    }
}

impl From<VxiErrorCode> for Error {
    fn from(value: VxiErrorCode) -> Self {
        Self::Vxi(value)
    }
}

/// True if this error should itself trigger a port disconnect, mirroring
/// `clientCall`'s behaviour of tearing down the port on anything but a
/// clean VXI-layer reply (`drvVxi11.c:clientCall`).
pub fn is_connection_fatal(err: &Error) -> bool {
    matches!(err, Error::Rpc(_) | Error::Io(_))
}

/// The three outward-facing kinds of a completed operation. Every method on
/// [`crate::port::Port`] and [`crate::device_io::DeviceIo`] still returns a
/// plain `Result<T, Error>`; `Outcome` exists for callers who want to treat
/// "timed out" as a distinct, non-exceptional third case instead of matching
/// on `Error::Timeout(_)` themselves, which is how a Port Manager is
/// expected to report status upward.
#[derive(Debug)]
pub enum Outcome<T> {
    Success(T),
    Timeout,
    Error(Error),
}

impl<T> Outcome<T> {
    pub fn from_result(result: Result<T>) -> Self {
        match result {
            Ok(value) => Outcome::Success(value),
            Err(Error::Timeout(_)) => Outcome::Timeout,
            Err(Error::Vxi(VxiErrorCode::IoTimeout)) => Outcome::Timeout,
            Err(e) => Outcome::Error(e),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }
}
