//! In-process fake VXI-11 gateway: a real TCP listener speaking genuine
//! ONC-RPC record marking, driven by a fixed script of expected calls.
//!
//! Tests connect straight to this listener's port (bypassing the
//! portmapper, the way `clnttcp_create` does when handed a nonzero port
//! already) and walk it through exactly the RPC sequence a given `Port`
//! operation is expected to issue.

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
};

use vxi11_core::rpc::onc::{
    AcceptedReplyBody, AcceptedReplyBodyType, MessageBody, OpaqueAuth, ReplyBody, RpcMessage,
    SuccessAcceptedReplyBody,
};
use vxi11_core::rpc::xdr::XdrPack;

const LAST_FRAGMENT_MARKER: u32 = 0x8000_0000;

/// One expected call and the raw (already-packed) result body to answer it
/// with. `proc` is asserted against the incoming call for a sanity check;
/// the script itself is what enforces ordering.
pub struct Expectation {
    pub proc: u32,
    pub reply: Vec<u8>,
}

pub fn expect(proc: u32, reply: Vec<u8>) -> Expectation {
    Expectation { proc, reply }
}

pub struct MockGateway {
    pub addr: std::net::SocketAddr,
}

impl MockGateway {
    /// Binds an ephemeral port and spawns a task that accepts one
    /// connection and answers `expectations` in order.
    pub async fn start(expectations: Vec<Expectation>) -> Self {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.expect("bind mock gateway");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(serve(listener, expectations));
        Self { addr }
    }
}

async fn serve(listener: TcpListener, expectations: Vec<Expectation>) {
    let Ok((mut stream, _peer)) = listener.accept().await else {
        return;
    };

    for exp in expectations {
        let header = match stream.read_u32().await {
            Ok(h) => h,
            Err(_) => return,
        };
        let size = (header & !LAST_FRAGMENT_MARKER) as usize;
        let mut fragment = vec![0u8; size];
        if stream.read_exact(&mut fragment).await.is_err() {
            return;
        }

        let msg = RpcMessage::unpack(&mut fragment).expect("mock gateway received malformed call");
        let MessageBody::Call(call) = msg.body else {
            panic!("mock gateway received a reply, expected a call");
        };
        assert_eq!(call.proc, exp.proc, "mock gateway received an out-of-order call");

        let reply = RpcMessage {
            xid: msg.xid,
            body: MessageBody::Reply(ReplyBody::Accepted(AcceptedReplyBody {
                verf: OpaqueAuth::new_null(),
                body: AcceptedReplyBodyType::Success(SuccessAcceptedReplyBody { results: exp.reply }),
            })),
        };

        let mut packet = vec![];
        reply.pack_xdr(&mut packet);
        let framed_header = (packet.len() as u32) | LAST_FRAGMENT_MARKER;
        let mut framed = Vec::with_capacity(packet.len() + 4);
        framed.extend_from_slice(&framed_header.to_be_bytes());
        framed.extend(packet);

        if stream.write_all(&framed).await.is_err() {
            return;
        }
    }
}

fn pack_i32(v: i32, out: &mut Vec<u8>) {
    out.extend(v.to_be_bytes());
}

fn pack_u32(v: u32, out: &mut Vec<u8>) {
    out.extend(v.to_be_bytes());
}

fn pack_opaque(bytes: &[u8], out: &mut Vec<u8>) {
    pack_u32(bytes.len() as u32, out);
    out.extend_from_slice(bytes);
    let pad = (4 - bytes.len() % 4) % 4;
    out.extend(std::iter::repeat(0u8).take(pad));
}

/// `Device_ErrorCode` success, no body — `destroy_link`, `destroy_intr_chan`,
/// `create_intr_chan`, `device_enable_srq`.
pub fn empty_reply() -> Vec<u8> {
    let mut out = vec![];
    pack_i32(0, &mut out);
    out
}

/// A bare VXI-layer error with no further body.
pub fn error_reply(error: i32) -> Vec<u8> {
    let mut out = vec![];
    pack_i32(error, &mut out);
    out
}

pub fn create_link_reply(lid: i32, abort_port: u16, max_recv_size: u32) -> Vec<u8> {
    let mut out = vec![];
    pack_i32(0, &mut out);
    pack_i32(lid, &mut out);
    pack_u32(abort_port as u32, &mut out);
    pack_u32(max_recv_size, &mut out);
    out
}

/// A `device_docmd` reply carrying a 2-byte bus-status value in `data_out`.
pub fn bus_status_reply(value: u16) -> Vec<u8> {
    let mut out = vec![];
    pack_i32(0, &mut out);
    pack_opaque(&value.to_be_bytes(), &mut out);
    out
}

/// A `device_docmd` reply with an empty `data_out`, e.g. `SEND`/`IFC`/`REN`.
pub fn docmd_empty_reply() -> Vec<u8> {
    let mut out = vec![];
    pack_i32(0, &mut out);
    pack_opaque(&[], &mut out);
    out
}

pub fn device_write_reply(size: u32) -> Vec<u8> {
    let mut out = vec![];
    pack_i32(0, &mut out);
    pack_u32(size, &mut out);
    out
}

pub fn device_read_reply(reason: u32, data: &[u8]) -> Vec<u8> {
    let mut out = vec![];
    pack_i32(0, &mut out);
    pack_u32(reason, &mut out);
    pack_opaque(data, &mut out);
    out
}

pub fn device_read_reply_error(error: i32, reason: u32, data: &[u8]) -> Vec<u8> {
    let mut out = vec![];
    pack_i32(error, &mut out);
    pack_u32(reason, &mut out);
    pack_opaque(data, &mut out);
    out
}

pub fn readstb_reply(stb: u8) -> Vec<u8> {
    let mut out = vec![];
    pack_i32(0, &mut out);
    pack_u32(stb as u32, &mut out);
    out
}
