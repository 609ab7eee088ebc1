//! Open Network Computing (ONC) RPC message framing, as defined by RFC5531.
//!
//! This is the record-marking/call/reply layer only. Retry policy around a
//! transport timeout lives in [`crate::rpc::client`]; this module just gets
//! one request onto the wire and one matching reply back off it.

use std::net::SocketAddr;

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

use crate::error::{Error, RpcError, Result};

use super::xdr::{self, XdrPack};

pub const RPC_VERSION: u32 = 2;

/// Fragment header bit marking the last fragment of an RPC record.
const LAST_FRAGMENT_MARKER: u32 = 0x8000_0000;

/// A single TCP-based ONC-RPC connection to a gateway's `DEVICE_CORE`,
/// `DEVICE_ASYNC`, or `DEVICE_INTR` port.
pub struct OncClient {
    addr: SocketAddr,
    stream: Option<TcpStream>,
    next_xid: u32,
}

impl OncClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            stream: None,
            next_xid: 1,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub async fn connect(&mut self) -> Result<()> {
        let stream = TcpStream::connect(self.addr)
            .await
            .map_err(RpcError::Connection)?;
        stream.set_nodelay(true).ok();
        self.stream = Some(stream);
        Ok(())
    }

    /// Drops the underlying socket. Subsequent calls return
    /// `RpcError::Connection`, matching a disconnected client.
    pub fn close(&mut self) {
        self.stream = None;
    }

    fn next_call(&mut self, prog: u32, vers: u32, proc: u32, args: impl XdrPack) -> (u32, RpcMessage) {
        let xid = self.next_xid;
        self.next_xid = self.next_xid.wrapping_add(1);
        let mut packed = vec![];
        args.pack_xdr(&mut packed);

        (
            xid,
            RpcMessage {
                xid,
                body: MessageBody::Call(CallBody {
                    rpc_version: RPC_VERSION,
                    prog,
                    vers,
                    proc,
                    cred: OpaqueAuth::new_null(),
                    verf: OpaqueAuth::new_null(),
                    args: packed,
                }),
            },
        )
    }

    /// Issues one RPC call and returns its matching reply. A single TCP read
    /// timeout here is a transport-level failure ([`RpcError::TimedOut`]);
    /// deciding whether to retry it belongs to the caller ([`super::client`]).
    pub async fn call(
        &mut self,
        prog: u32,
        vers: u32,
        proc: u32,
        args: impl XdrPack,
        timeout: std::time::Duration,
    ) -> std::result::Result<Vec<u8>, RpcError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(RpcError::Connection(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "ONC client is not connected",
            )));
        };

        let (xid, msg) = self.next_call(prog, vers, proc, args);
        let mut packet = vec![];
        msg.pack_xdr(&mut packet);

        let header = (packet.len() as u32) | LAST_FRAGMENT_MARKER;
        let mut framed = Vec::with_capacity(packet.len() + 4);
        framed.extend_from_slice(&header.to_be_bytes());
        framed.extend(packet);

        let io = async {
            stream.write_all(&framed).await?;
            read_reply(stream, xid).await
        };

        match tokio::time::timeout(timeout, io).await {
            Ok(Ok(reply)) => reply.into_result(),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::TimedOut => Err(RpcError::TimedOut),
            Ok(Err(e)) => Err(RpcError::Connection(e)),
            Err(_elapsed) => Err(RpcError::TimedOut),
        }
    }
}

async fn read_reply(stream: &mut TcpStream, want_xid: u32) -> std::io::Result<RpcMessage> {
    loop {
        let header = stream.read_u32().await?;
        let size = (header & !LAST_FRAGMENT_MARKER) as usize;
        let last = (header & LAST_FRAGMENT_MARKER) != 0;

        let mut fragment = vec![0u8; size];
        stream.read_exact(&mut fragment).await?;

        let msg = RpcMessage::unpack(&mut fragment).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })?;

        if msg.xid == want_xid {
            return Ok(msg);
        }
        if last {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("no reply matching xid {want_xid}"),
            ));
        }
        // stale fragment from an earlier call; keep reading
    }
}

#[derive(Debug)]
pub enum MessageBody {
    Call(CallBody),
    Reply(ReplyBody),
}
impl MessageBody {
    pub fn unpack(src: &mut Vec<u8>) -> Result<Self> {
        match xdr::unpack_u32(src)? {
            0 => Ok(Self::Call(CallBody::unpack(src)?)),
            1 => Ok(Self::Reply(ReplyBody::unpack(src)?)),
            i => Err(Error::Rpc(RpcError::Malformed(format!(
                "unknown message type {i}"
            )))),
        }
    }
}
impl XdrPack for MessageBody {
    fn pack_xdr(self, out: &mut Vec<u8>) {
        match self {
            Self::Call(call) => {
                0u32.pack_xdr(out);
                call.pack_xdr(out);
            }
            Self::Reply(reply) => {
                1u32.pack_xdr(out);
                reply.pack_xdr(out);
            }
        }
    }
}

#[derive(Debug)]
pub struct RpcMessage {
    pub xid: u32,
    pub body: MessageBody,
}
impl RpcMessage {
    pub fn unpack(src: &mut Vec<u8>) -> Result<Self> {
        Ok(Self {
            xid: xdr::unpack_u32(src)?,
            body: MessageBody::unpack(src)?,
        })
    }

    fn into_result(self) -> std::result::Result<Vec<u8>, RpcError> {
        let MessageBody::Reply(reply) = self.body else {
            return Err(RpcError::Malformed("expected a reply message".into()));
        };

        match reply {
            ReplyBody::Rejected(RejectedReplyBody::Mismatch(m)) => {
                Err(RpcError::ProgramMismatch { low: m.low, high: m.high })
            }
            ReplyBody::Rejected(RejectedReplyBody::AuthError(stat)) => {
                Err(RpcError::AuthError(stat as u32))
            }
            ReplyBody::Accepted(accepted) => match accepted.body {
                AcceptedReplyBodyType::Success(s) => Ok(s.results),
                AcceptedReplyBodyType::ProgUnavail => Err(RpcError::ProgramUnavailable(0)),
                AcceptedReplyBodyType::ProgMismatch(m) => {
                    Err(RpcError::ProgramMismatch { low: m.low, high: m.high })
                }
                AcceptedReplyBodyType::ProcUnavail => Err(RpcError::ProcedureUnavailable(0)),
                AcceptedReplyBodyType::GarbageArgs => {
                    Err(RpcError::Malformed("server reported garbage args".into()))
                }
                AcceptedReplyBodyType::SystemErr => {
                    Err(RpcError::Malformed("server reported a system error".into()))
                }
            },
        }
    }
}
impl XdrPack for RpcMessage {
    fn pack_xdr(self, out: &mut Vec<u8>) {
        self.xid.pack_xdr(out);
        self.body.pack_xdr(out);
    }
}

#[derive(Debug)]
pub struct CallBody {
    pub rpc_version: u32,
    pub prog: u32,
    pub vers: u32,
    pub proc: u32,
    pub cred: OpaqueAuth,
    pub verf: OpaqueAuth,
    pub args: Vec<u8>,
}
impl CallBody {
    pub fn unpack(src: &mut Vec<u8>) -> Result<Self> {
        Ok(Self {
            rpc_version: xdr::unpack_u32(src)?,
            prog: xdr::unpack_u32(src)?,
            vers: xdr::unpack_u32(src)?,
            proc: xdr::unpack_u32(src)?,
            cred: OpaqueAuth::unpack(src)?,
            verf: OpaqueAuth::unpack(src)?,
            args: xdr::unpack_opaque(src)?,
        })
    }
}
impl XdrPack for CallBody {
    fn pack_xdr(self, out: &mut Vec<u8>) {
        self.rpc_version.pack_xdr(out);
        self.prog.pack_xdr(out);
        self.vers.pack_xdr(out);
        self.proc.pack_xdr(out);
        self.cred.pack_xdr(out);
        self.verf.pack_xdr(out);
        out.extend(self.args);
    }
}

#[derive(Debug)]
pub enum ReplyBody {
    Accepted(AcceptedReplyBody),
    Rejected(RejectedReplyBody),
}
impl ReplyBody {
    pub fn unpack(src: &mut Vec<u8>) -> Result<Self> {
        match xdr::unpack_u32(src)? {
            0 => Ok(Self::Accepted(AcceptedReplyBody::unpack(src)?)),
            1 => Ok(Self::Rejected(RejectedReplyBody::unpack(src)?)),
            i => Err(Error::Rpc(RpcError::Malformed(format!(
                "unknown reply stat {i}"
            )))),
        }
    }
}
impl XdrPack for ReplyBody {
    fn pack_xdr(self, out: &mut Vec<u8>) {
        match self {
            Self::Accepted(body) => {
                0u32.pack_xdr(out);
                body.pack_xdr(out);
            }
            Self::Rejected(body) => {
                1u32.pack_xdr(out);
                body.pack_xdr(out);
            }
        }
    }
}

#[derive(Debug)]
pub struct AcceptedReplyBody {
    pub verf: OpaqueAuth,
    pub body: AcceptedReplyBodyType,
}
impl AcceptedReplyBody {
    pub fn unpack(src: &mut Vec<u8>) -> Result<Self> {
        Ok(Self {
            verf: OpaqueAuth::unpack(src)?,
            body: AcceptedReplyBodyType::unpack(src)?,
        })
    }
}
impl XdrPack for AcceptedReplyBody {
    fn pack_xdr(self, out: &mut Vec<u8>) {
        self.verf.pack_xdr(out);
        self.body.pack_xdr(out);
    }
}

#[derive(Debug)]
pub enum AcceptedReplyBodyType {
    Success(SuccessAcceptedReplyBody),
    ProgUnavail,
    ProgMismatch(ProgMismatchBody),
    ProcUnavail,
    GarbageArgs,
    SystemErr,
}
impl AcceptedReplyBodyType {
    fn unpack(src: &mut Vec<u8>) -> Result<Self> {
        match xdr::unpack_u32(src)? {
            0 => Ok(Self::Success(SuccessAcceptedReplyBody::unpack(src)?)),
            1 => Ok(Self::ProgUnavail),
            2 => Ok(Self::ProgMismatch(ProgMismatchBody::unpack(src)?)),
            3 => Ok(Self::ProcUnavail),
            4 => Ok(Self::GarbageArgs),
            5 => Ok(Self::SystemErr),
            i => Err(Error::Rpc(RpcError::Malformed(format!(
                "unknown accept_stat {i}"
            )))),
        }
    }
}
impl XdrPack for AcceptedReplyBodyType {
    fn pack_xdr(self, out: &mut Vec<u8>) {
        match self {
            Self::Success(body) => {
                0u32.pack_xdr(out);
                body.pack_xdr(out);
            }
            Self::ProgUnavail => 1u32.pack_xdr(out),
            Self::ProgMismatch(body) => {
                2u32.pack_xdr(out);
                body.pack_xdr(out);
            }
            Self::ProcUnavail => 3u32.pack_xdr(out),
            Self::GarbageArgs => 4u32.pack_xdr(out),
            Self::SystemErr => 5u32.pack_xdr(out),
        }
    }
}

#[derive(Debug)]
pub struct SuccessAcceptedReplyBody {
    pub results: Vec<u8>,
}
impl SuccessAcceptedReplyBody {
    fn unpack(src: &mut Vec<u8>) -> Result<Self> {
        Ok(Self {
            results: std::mem::take(src),
        })
    }
}
impl XdrPack for SuccessAcceptedReplyBody {
    /// `results` is already-packed XDR (the callee's return value), not an
    /// opaque-counted blob, so it's appended verbatim.
    fn pack_xdr(self, out: &mut Vec<u8>) {
        out.extend(self.results);
    }
}

#[derive(Debug)]
pub struct ProgMismatchBody {
    pub low: u32,
    pub high: u32,
}
impl ProgMismatchBody {
    pub fn unpack(src: &mut Vec<u8>) -> Result<Self> {
        Ok(Self {
            low: xdr::unpack_u32(src)?,
            high: xdr::unpack_u32(src)?,
        })
    }
}
impl XdrPack for ProgMismatchBody {
    fn pack_xdr(self, out: &mut Vec<u8>) {
        self.low.pack_xdr(out);
        self.high.pack_xdr(out);
    }
}

#[derive(Debug)]
pub enum RejectedReplyBody {
    Mismatch(ProgMismatchBody),
    AuthError(AuthStat),
}
impl RejectedReplyBody {
    fn unpack(src: &mut Vec<u8>) -> Result<Self> {
        match xdr::unpack_u32(src)? {
            0 => Ok(Self::Mismatch(ProgMismatchBody::unpack(src)?)),
            1 => Ok(Self::AuthError(AuthStat::unpack(src)?)),
            i => Err(Error::Rpc(RpcError::Malformed(format!(
                "unknown reject_stat {i}"
            )))),
        }
    }
}
impl XdrPack for RejectedReplyBody {
    fn pack_xdr(self, out: &mut Vec<u8>) {
        match self {
            Self::Mismatch(body) => {
                0u32.pack_xdr(out);
                body.pack_xdr(out);
            }
            Self::AuthError(stat) => {
                1u32.pack_xdr(out);
                (stat as u32).pack_xdr(out);
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum AuthStat {
    AuthOk = 0,
    AuthBadCred = 1,
    AuthRejectedCred = 2,
    AuthBadVerf = 3,
    AuthRejectedVerf = 4,
    AuthTooWeak = 5,
    AuthInvalidResp = 6,
    AuthFailed = 7,
}
impl AuthStat {
    pub fn unpack(src: &mut Vec<u8>) -> Result<Self> {
        Ok(match xdr::unpack_u32(src)? {
            0 => Self::AuthOk,
            1 => Self::AuthBadCred,
            2 => Self::AuthRejectedCred,
            3 => Self::AuthBadVerf,
            4 => Self::AuthRejectedVerf,
            5 => Self::AuthTooWeak,
            6 => Self::AuthInvalidResp,
            7 => Self::AuthFailed,
            i => {
                return Err(Error::Rpc(RpcError::Malformed(format!(
                    "unknown auth_stat {i}"
                ))));
            }
        })
    }
}

#[repr(u32)]
#[derive(Clone, Copy, Debug)]
pub enum AuthFlavor {
    Null = 0,
    Sys = 1,
    Short = 2,
    Dh = 3,
    RpcSecGss = 4,
}

#[derive(Debug)]
pub struct OpaqueAuth {
    pub flavor: AuthFlavor,
    pub body: Vec<u8>,
}
impl OpaqueAuth {
    pub fn unpack(src: &mut Vec<u8>) -> Result<Self> {
        Ok(Self {
            flavor: match xdr::unpack_u32(src)? {
                0 => AuthFlavor::Null,
                1 => AuthFlavor::Sys,
                2 => AuthFlavor::Short,
                3 => AuthFlavor::Dh,
                4 => AuthFlavor::RpcSecGss,
                i => {
                    return Err(Error::Rpc(RpcError::Malformed(format!(
                        "unknown auth flavor {i}"
                    ))));
                }
            },
            body: xdr::unpack_opaque(src)?,
        })
    }

    pub fn new_null() -> Self {
        Self {
            flavor: AuthFlavor::Null,
            body: vec![],
        }
    }
}
impl XdrPack for OpaqueAuth {
    fn pack_xdr(self, out: &mut Vec<u8>) {
        (self.flavor as u32).pack_xdr(out);
        self.body.pack_xdr(out);
    }
}
