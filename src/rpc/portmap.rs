//! Portmap client (RFC1833), used to resolve the dynamic TCP port a
//! gateway's `DEVICE_CORE`/`DEVICE_ASYNC` program listens on. The original
//! driver gets this for free from `clnttcp_create` passing port `0`; this
//! crate resolves it explicitly as its own RPC exchange.

use std::{net::SocketAddr, time::Duration};

use crate::error::{Error, RpcError, Result};

use super::{
    onc::OncClient,
    xdr::{self, XdrPack},
};

const PORTMAP_PROG: u32 = 100000;
const PORTMAP_VERS: u32 = 2;
pub const PORTMAP_PORT: u16 = 111;

const PROC_GETPORT: u32 = 3;

#[derive(Clone, Copy, Debug)]
#[repr(u32)]
pub enum RpcIpProto {
    Tcp = 6,
    Udp = 17,
}

#[derive(Debug)]
struct RpcMapping {
    prog: u32,
    vers: u32,
    prot: RpcIpProto,
    port: u32,
}
impl XdrPack for RpcMapping {
    fn pack_xdr(self, out: &mut Vec<u8>) {
        self.prog.pack_xdr(out);
        self.vers.pack_xdr(out);
        (self.prot as u32).pack_xdr(out);
        self.port.pack_xdr(out);
    }
}

/// Connects to `host`'s portmapper and resolves the TCP port serving
/// `(prog, vers)`.
pub async fn resolve_port(host: SocketAddr, prog: u32, vers: u32, timeout: Duration) -> Result<u16> {
    let mut pmap_addr = host;
    pmap_addr.set_port(PORTMAP_PORT);

    let mut client = OncClient::new(pmap_addr);
    client.connect().await.map_err(|_| {
        Error::Rpc(RpcError::Connection(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "could not connect to portmapper",
        )))
    })?;

    request_port(&mut client, prog, vers, RpcIpProto::Tcp, timeout).await
}

async fn request_port(
    client: &mut OncClient,
    prog: u32,
    vers: u32,
    prot: RpcIpProto,
    timeout: Duration,
) -> Result<u16> {
    let mapping = RpcMapping {
        prog,
        vers,
        prot,
        port: 0,
    };

    let mut results = client
        .call(PORTMAP_PROG, PORTMAP_VERS, PROC_GETPORT, mapping, timeout)
        .await
        .map_err(Error::Rpc)?;

    let port = xdr::unpack_u32(&mut results)?;
    if port == 0 {
        return Err(Error::Rpc(RpcError::Malformed(format!(
            "portmapper has no mapping for program {prog} version {vers}"
        ))));
    }
    port.try_into()
        .map_err(|_| Error::Rpc(RpcError::Malformed(format!("port {port} out of range"))))
}
