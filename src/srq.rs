//! SRQ subsystem (component C5): the reverse-RPC listener a gateway
//! connects back to and sends `device_intr_srq` calls on whenever the GPIB
//! bus asserts SRQ.
//!
//! The original's `vxiSrqThread` never actually decodes the `device_intr_srq`
//! RPC body — any successful `read()` on the accepted connection is treated
//! as "SRQ happened". That shortcut is preserved here: this reader does not
//! parse ONC-RPC framing on the reverse channel, it only reacts to bytes
//! arriving.

use std::time::Duration;

use tokio::{
    io::AsyncReadExt,
    net::TcpListener,
    sync::{mpsc, Notify},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Sent upward once per observed SRQ. Carries no payload, matching the
/// original's `pasynGpib->srqHappened()`, which takes none either.
#[derive(Debug, Clone, Copy)]
pub struct SrqEvent;

/// Owns the reverse-channel listener task. `INIT -> LISTENING -> READING ->
/// EXIT`, same states `vxiSrqThread` walks through; every exit path notifies
/// `ready` exactly once, the same invariant the original keeps via
/// `epicsEventSignal` on every `return`.
pub struct SrqSubsystem {
    listen_port: u16,
    handle: JoinHandle<()>,
    cancel: CancellationToken,
    ready: std::sync::Arc<Notify>,
}

impl SrqSubsystem {
    /// Binds an ephemeral TCP listener and spawns the reader task.
    /// `listen_port` is reported to the caller so it can be advertised to
    /// the gateway via `create_intr_chan`.
    pub async fn start(events: mpsc::UnboundedSender<SrqEvent>) -> Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", 0)).await?;
        let listen_port = listener.local_addr()?.port();

        let cancel = CancellationToken::new();
        let ready = std::sync::Arc::new(Notify::new());

        let task_cancel = cancel.clone();
        let task_ready = ready.clone();
        let handle = tokio::spawn(srq_loop(listener, task_cancel, task_ready, events));

        Ok(Self {
            listen_port,
            handle,
            cancel,
            ready,
        })
    }

    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    /// Cancels the reader and waits for it to exit, re-signalling every 2s
    /// up to 10 times before giving up — the same bounded "unwedge" envelope
    /// as `vxiDisconnectPort`'s teardown loop.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for attempt in 0..10 {
            if tokio::time::timeout(Duration::from_secs(2), self.ready.notified())
                .await
                .is_ok()
            {
                break;
            }
            if attempt == 9 {
                log::warn!("SRQ reader task did not terminate within the unwedge envelope");
            }
        }
        self.handle.abort();
    }
}

async fn srq_loop(
    listener: TcpListener,
    cancel: CancellationToken,
    ready: std::sync::Arc<Notify>,
    events: mpsc::UnboundedSender<SrqEvent>,
) {
    let stream = tokio::select! {
        _ = cancel.cancelled() => {
            ready.notify_one();
            return;
        }
        accepted = listener.accept() => match accepted {
            Ok((stream, _peer)) => stream,
            Err(e) => {
                log::error!("SRQ listener accept failed: {e}");
                ready.notify_one();
                return;
            }
        }
    };
    drop(listener);

    let mut stream = stream;
    let mut buf = [0u8; 512];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            res = stream.read(&mut buf) => match res {
                Ok(0) => {
                    log::warn!("SRQ channel closed by gateway");
                    break;
                }
                Ok(_) => {
                    let _ = events.send(SrqEvent);
                }
                Err(e) => {
                    log::error!("SRQ channel read error: {e}");
                    break;
                }
            },
        }
    }
    drop(stream);
    ready.notify_one();
}
