//! RPC-transport call primitives (component C1).
//!
//! This is deliberately the thinnest possible layer: resolve the
//! `DEVICE_CORE` port via the portmapper, hold one [`OncClient`] connection
//! to it, and issue calls. The retry policy around a transport timeout is
//! factored out as [`retry_io_timeout`] so it can be driven by canned
//! outcomes in tests instead of real sockets and real clocks.

use std::{future::Future, net::SocketAddr, time::Duration};

use super::{onc::OncClient, portmap, xdr::XdrPack};
use crate::{
    codes,
    error::{Error, Result, RpcError},
};

pub struct CoreTransport {
    client: OncClient,
}

impl CoreTransport {
    /// Resolves `DEVICE_CORE`'s port via the portmapper at `host`, then
    /// connects to it. Mirrors `clnttcp_create`: if `host`'s port is already
    /// nonzero the portmap `GETPORT` lookup is skipped entirely and that port
    /// is dialed directly, same as passing a pre-filled `sin_port` to
    /// `clnttcp_create` in the original driver.
    pub async fn connect(host: SocketAddr, timeout: Duration) -> Result<Self> {
        let addr = if host.port() == 0 {
            let port = portmap::resolve_port(host, codes::DEVICE_CORE_PROG, codes::DEVICE_CORE_VERSION, timeout)
                .await?;
            let mut addr = host;
            addr.set_port(port);
            addr
        } else {
            host
        };

        let mut client = OncClient::new(addr);
        client.connect().await.map_err(Error::Rpc)?;

        Ok(Self { client })
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    pub fn close(&mut self) {
        self.client.close();
    }

    /// One RPC call, no retry; a transport timeout surfaces as
    /// `RpcError::TimedOut` for the caller to act on via
    /// [`retry_io_timeout`].
    pub async fn call_raw(
        &mut self,
        proc: u32,
        args: impl XdrPack,
        timeout: Duration,
    ) -> std::result::Result<Vec<u8>, RpcError> {
        self.client
            .call(codes::DEVICE_CORE_PROG, codes::DEVICE_CORE_VERSION, proc, args, timeout)
            .await
    }
}

/// Retries an RPC attempt the way `drvVxi11.c`'s `clientIoCall` does:
///
/// ```c
/// while (TRUE) {
///     stat = clnt_call(...);
///     if (timeout >= 0.0 || stat != RPC_TIMEDOUT) break;
/// }
/// ```
///
/// A transport-level timeout is retried indefinitely, but only when the
/// caller's own I/O timeout is infinite (`io_timeout_secs < 0.0`). Any other
/// result — success, or a non-timeout RPC failure — returns immediately.
/// A VXI-layer `IOTIMEOUT` carried inside a successful reply is not a
/// `RpcError` at all, so it is never retried here (see spec §4.1 and P5/P7).
pub async fn retry_io_timeout<F, Fut, T>(io_timeout_secs: f64, mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, RpcError>>,
{
    loop {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(RpcError::TimedOut) if io_timeout_secs < 0.0 => continue,
            Err(e) => return Err(Error::Rpc(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn retries_transport_timeout_when_infinite() {
        let attempts = AtomicUsize::new(0);
        let outcomes: Vec<std::result::Result<u32, RpcError>> =
            vec![Err(RpcError::TimedOut), Err(RpcError::TimedOut), Ok(42)];

        let result = retry_io_timeout(-1.0, || {
            let i = attempts.fetch_add(1, Ordering::SeqCst);
            let outcome = match &outcomes[i] {
                Ok(v) => Ok(*v),
                Err(RpcError::TimedOut) => Err(RpcError::TimedOut),
                Err(_) => unreachable!(),
            };
            async move { outcome }
        })
        .await;

        assert!(matches!(result, Ok(42)));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_transport_timeout_with_finite_timeout() {
        let attempts = AtomicUsize::new(0);

        let result: Result<u32> = retry_io_timeout(5.0, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async move { Err(RpcError::TimedOut) }
        })
        .await;

        assert!(matches!(result, Err(Error::Rpc(RpcError::TimedOut))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_timeout_error_never_retries() {
        let attempts = AtomicUsize::new(0);

        let result: Result<u32> = retry_io_timeout(-1.0, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async move { Err(RpcError::ProgramUnavailable(codes::DEVICE_CORE_PROG)) }
        })
        .await;

        assert!(matches!(
            result,
            Err(Error::Rpc(RpcError::ProgramUnavailable(_)))
        ));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
