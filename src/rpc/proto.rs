//! XDR request/response structures for the `DEVICE_CORE`/`DEVICE_ASYNC`/
//! `DEVICE_INTR` procedures used by this driver, per VXI-11.1 Appendix B.

use crate::codes;
use crate::error::{Result, VxiErrorCode};

use super::xdr::{self, XdrPack};

/// Decodes a `Device_ErrorCode` and turns it into `Result<()>`, the pattern
/// every response type below uses via [`check`].
pub fn check(raw: i32) -> Result<()> {
    match VxiErrorCode::from_raw(raw) {
        None => Ok(()),
        Some(code) => Err(code.into()),
    }
}

#[derive(Debug, Default)]
pub struct DeviceFlags {
    pub wait_lock: bool,
    pub end: bool,
    pub termchr_set: bool,
}
impl XdrPack for DeviceFlags {
    fn pack_xdr(self, out: &mut Vec<u8>) {
        let mut flags = 0u32;
        if self.wait_lock {
            flags |= codes::VXI_WAITLOCK;
        }
        if self.end {
            flags |= codes::VXI_ENDW;
        }
        if self.termchr_set {
            flags |= codes::VXI_TERMCHRSET;
        }
        flags.pack_xdr(out);
    }
}

// ---- create_link -----------------------------------------------------

pub struct CreateLinkParams {
    pub client_id: i32,
    pub lock_device: bool,
    pub lock_timeout_ms: u32,
    pub device: String,
}
impl XdrPack for CreateLinkParams {
    fn pack_xdr(self, out: &mut Vec<u8>) {
        self.client_id.pack_xdr(out);
        self.lock_device.pack_xdr(out);
        self.lock_timeout_ms.pack_xdr(out);
        self.device.pack_xdr(out);
    }
}

#[derive(Debug)]
pub struct CreateLinkResp {
    pub lid: i32,
    pub abort_port: u16,
    pub max_recv_size: u32,
}
impl CreateLinkResp {
    pub fn unpack(src: &mut Vec<u8>) -> Result<Self> {
        check(xdr::unpack_i32(src)?)?;
        Ok(Self {
            lid: xdr::unpack_i32(src)?,
            abort_port: xdr::unpack_u16(src)?,
            max_recv_size: xdr::unpack_u32(src)?,
        })
    }
}

// ---- device_write ------------------------------------------------------

pub struct DeviceWriteParams {
    pub lid: i32,
    pub io_timeout_ms: u32,
    pub lock_timeout_ms: u32,
    pub flags: DeviceFlags,
    pub data: Vec<u8>,
}
impl XdrPack for DeviceWriteParams {
    fn pack_xdr(self, out: &mut Vec<u8>) {
        self.lid.pack_xdr(out);
        self.io_timeout_ms.pack_xdr(out);
        self.lock_timeout_ms.pack_xdr(out);
        self.flags.pack_xdr(out);
        self.data.pack_xdr(out);
    }
}

#[derive(Debug)]
pub struct DeviceWriteResp {
    pub size: u32,
}
impl DeviceWriteResp {
    pub fn unpack(src: &mut Vec<u8>) -> Result<Self> {
        check(xdr::unpack_i32(src)?)?;
        Ok(Self {
            size: xdr::unpack_u32(src)?,
        })
    }
}

// ---- device_read --------------------------------------------------------

pub struct DeviceReadParams {
    pub lid: i32,
    pub request_size: u32,
    pub io_timeout_ms: u32,
    pub lock_timeout_ms: u32,
    pub flags: DeviceFlags,
    pub termchr: u8,
}
impl XdrPack for DeviceReadParams {
    fn pack_xdr(self, out: &mut Vec<u8>) {
        self.lid.pack_xdr(out);
        self.request_size.pack_xdr(out);
        self.io_timeout_ms.pack_xdr(out);
        self.lock_timeout_ms.pack_xdr(out);
        self.flags.pack_xdr(out);
        (self.termchr as u32).pack_xdr(out);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReadReason {
    pub reqcnt: bool,
    pub chr: bool,
    pub end: bool,
}
impl ReadReason {
    fn unpack(src: &mut Vec<u8>) -> Result<Self> {
        let flags = xdr::unpack_u32(src)?;
        Ok(Self {
            reqcnt: (flags & codes::VXI_REQCNT) != 0,
            chr: (flags & codes::VXI_CHR) != 0,
            end: (flags & codes::VXI_ENDR) != 0,
        })
    }

    pub fn eom_reason(&self) -> u32 {
        let mut reason = 0;
        if self.reqcnt {
            reason |= codes::EOMCNT;
        }
        if self.chr {
            reason |= codes::EOMEOS;
        }
        if self.end {
            reason |= codes::EOMEND;
        }
        reason
    }
}

#[derive(Debug)]
pub struct DeviceReadResp {
    pub reason: ReadReason,
    pub data: Vec<u8>,
}
impl DeviceReadResp {
    pub fn unpack(src: &mut Vec<u8>) -> Result<Self> {
        check(xdr::unpack_i32(src)?)?;
        Ok(Self {
            reason: ReadReason::unpack(src)?,
            data: xdr::unpack_opaque(src)?,
        })
    }

    /// Like [`Self::unpack`] but surfaces the raw `Device_ErrorCode` instead
    /// of turning it into `Err` immediately. `vxiRead`'s infinite-timeout
    /// retry loop needs to inspect `(error, data.len())` together before
    /// deciding whether a `VXI_IOTIMEOUT` reply should be retried.
    pub fn unpack_raw(src: &mut Vec<u8>) -> Result<(i32, Self)> {
        let error = xdr::unpack_i32(src)?;
        Ok((
            error,
            Self {
                reason: ReadReason::unpack(src)?,
                data: xdr::unpack_opaque(src)?,
            },
        ))
    }
}

// ---- device_readstb -----------------------------------------------------

pub struct DeviceGenericParams {
    pub lid: i32,
    pub flags: DeviceFlags,
    pub io_timeout_ms: u32,
    pub lock_timeout_ms: u32,
}
impl XdrPack for DeviceGenericParams {
    fn pack_xdr(self, out: &mut Vec<u8>) {
        self.lid.pack_xdr(out);
        self.flags.pack_xdr(out);
        self.io_timeout_ms.pack_xdr(out);
        self.lock_timeout_ms.pack_xdr(out);
    }
}

#[derive(Debug)]
pub struct DeviceReadStbResp {
    pub stb: u8,
}
impl DeviceReadStbResp {
    pub fn unpack(src: &mut Vec<u8>) -> Result<Self> {
        check(xdr::unpack_i32(src)?)?;
        Ok(Self {
            stb: xdr::unpack_u32(src)? as u8,
        })
    }
}

/// `device_docmd` request. Used for `SEND` (addressed/universal commands),
/// `STAT` (bus status queries), `IFC`, and `REN`.
pub struct DeviceDoCmdParams {
    pub lid: i32,
    pub flags: DeviceFlags,
    pub io_timeout_ms: u32,
    pub lock_timeout_ms: u32,
    pub cmd: i32,
    pub network_order: bool,
    pub datasize: i32,
    pub data_in: Vec<u8>,
}
impl XdrPack for DeviceDoCmdParams {
    fn pack_xdr(self, out: &mut Vec<u8>) {
        self.lid.pack_xdr(out);
        self.flags.pack_xdr(out);
        self.io_timeout_ms.pack_xdr(out);
        self.lock_timeout_ms.pack_xdr(out);
        self.cmd.pack_xdr(out);
        self.network_order.pack_xdr(out);
        self.datasize.pack_xdr(out);
        self.data_in.pack_xdr(out);
    }
}

#[derive(Debug)]
pub struct DeviceDoCmdResp {
    pub data_out: Vec<u8>,
}
impl DeviceDoCmdResp {
    pub fn unpack(src: &mut Vec<u8>) -> Result<Self> {
        check(xdr::unpack_i32(src)?)?;
        Ok(Self {
            data_out: xdr::unpack_opaque(src)?,
        })
    }
}

// ---- device_enable_srq --------------------------------------------------

pub struct DeviceEnableSrqParams {
    pub lid: i32,
    pub enable: bool,
    pub handle: Vec<u8>,
}
impl XdrPack for DeviceEnableSrqParams {
    fn pack_xdr(self, out: &mut Vec<u8>) {
        self.lid.pack_xdr(out);
        self.enable.pack_xdr(out);
        self.handle.pack_xdr(out);
    }
}

// ---- create_intr_chan / destroy_intr_chan / destroy_link ---------------

pub struct CreateIntrChanParams {
    pub host_addr: u32,
    pub host_port: u16,
    pub prog_num: u32,
    pub prog_vers: u32,
    pub prog_family: i32,
}
impl XdrPack for CreateIntrChanParams {
    fn pack_xdr(self, out: &mut Vec<u8>) {
        self.host_addr.pack_xdr(out);
        (self.host_port as u32).pack_xdr(out);
        self.prog_num.pack_xdr(out);
        self.prog_vers.pack_xdr(out);
        self.prog_family.pack_xdr(out);
    }
}

pub struct DestroyLinkParams {
    pub lid: i32,
}
impl XdrPack for DestroyLinkParams {
    fn pack_xdr(self, out: &mut Vec<u8>) {
        self.lid.pack_xdr(out);
    }
}

/// Every plain `(error)`-only response, e.g. `destroy_link`, `device_clear`,
/// `device_enable_srq`, `destroy_intr_chan`.
pub struct EmptyResp;
impl EmptyResp {
    pub fn unpack(src: &mut Vec<u8>) -> Result<Self> {
        check(xdr::unpack_i32(src)?)?;
        Ok(Self)
    }
}
