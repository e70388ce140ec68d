//! Device-facing TCP server.
//!
//! Each accepted connection gets its own task that owns a [`FrameDecoder`]
//! and a writer task fed through an `mpsc` channel. Replies from the
//! dispatcher and operator commands both go through that channel, so writes
//! to one socket are never interleaved.
//!
//! A connection ends on EOF, read error, idle timeout, receive-buffer
//! overflow or server shutdown. On the way out it removes every session
//! binding that still points at it and marks those devices disconnected.

use std::collections::HashSet;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::GatewayConfig;
use crate::dispatch::Dispatcher;
use crate::protocol::FrameDecoder;
use crate::records::{self, Contact};
use crate::registry::ConnectionHandle;

/// Bytes requested per socket read.
const READ_CHUNK: usize = 2048;

/// How long a closing connection waits for queued replies to reach the socket.
const WRITER_DRAIN: Duration = Duration::from_secs(2);

/// Everything a connection task needs. Cheap to clone.
#[derive(Clone)]
pub struct Gateway {
    dispatcher: Dispatcher,
    records_tx: mpsc::UnboundedSender<Contact>,
    settings: Arc<GatewayConfig>,
    next_conn_id: Arc<AtomicU64>,
}

impl Gateway {
    pub fn new(
        dispatcher: Dispatcher,
        records_tx: mpsc::UnboundedSender<Contact>,
        settings: GatewayConfig,
    ) -> Self {
        Self {
            dispatcher,
            records_tx,
            settings: Arc::new(settings),
            next_conn_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Accept device connections until `shutdown` fires, then wait for every
    /// connection task to finish its cleanup.
    pub async fn run(self, listener: TcpListener, shutdown: CancellationToken) {
        let tracker = TaskTracker::new();

        loop {
            let accepted = tokio::select! {
                () = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
                    let gateway = self.clone();
                    let shutdown = shutdown.clone();
                    tracker.spawn(
                        async move { gateway.handle_connection(stream, peer, conn_id, shutdown).await }
                            .instrument(info_span!("conn", conn_id, peer = %peer)),
                    );
                }
                Err(e) => {
                    warn!("Accept failed: {e}");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }

        tracker.close();
        info!(connections = tracker.len(), "Gateway stopping, draining connections");
        tracker.wait().await;
    }

    async fn handle_connection(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        conn_id: u64,
        shutdown: CancellationToken,
    ) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY: {e}");
        }
        let (mut reader, mut writer) = stream.into_split();
        let (tx, mut rx) = mpsc::channel::<String>(self.settings.outbound_queue.max(1));

        info!("Device connection accepted");

        let mut writer_task = tokio::spawn(
            async move {
                while let Some(frame) = rx.recv().await {
                    if let Err(e) = writer.write_all(frame.as_bytes()).await {
                        warn!("Write failed: {e}");
                    }
                }
                if let Err(e) = writer.shutdown().await {
                    debug!("Write shutdown failed: {e}");
                }
            }
            .in_current_span(),
        );

        let conn = ConnectionHandle::new(
            conn_id,
            peer,
            self.settings.protocol_tag.clone(),
            tx,
        );
        let idle = (self.settings.idle_timeout_secs > 0)
            .then(|| Duration::from_secs(self.settings.idle_timeout_secs));

        let mut decoder = FrameDecoder::new(self.settings.max_buffer_bytes);
        let mut identities: HashSet<String> = HashSet::new();
        let mut buf = vec![0u8; READ_CHUNK];

        let reason = loop {
            let read = tokio::select! {
                () = shutdown.cancelled() => break "server shutdown".to_string(),
                read = read_chunk(&mut reader, &mut buf, idle) => read,
            };

            let n = match read {
                Ok(0) => break "closed by peer".to_string(),
                Ok(n) => n,
                Err(e) => break e.to_string(),
            };

            match decoder.push(&buf[..n]) {
                Ok(frames) => {
                    for frame in frames {
                        if let Some(outcome) = self.dispatcher.handle_frame(&frame, &conn).await {
                            identities.insert(outcome.device_id);
                        }
                    }
                }
                Err(e) => {
                    warn!("Closing connection: {e}");
                    break e.to_string();
                }
            }
        };

        let registry = self.dispatcher.registry();
        for device_id in &identities {
            if registry.remove_if(device_id, conn_id).await {
                records::submit(
                    &self.records_tx,
                    Contact {
                        device_id: device_id.clone(),
                        addr: peer,
                        connected: false,
                        keyword: None,
                    },
                );
            }
        }

        // The writer exits once every sender is gone, after flushing what is
        // already queued.
        drop(conn);
        if tokio::time::timeout(WRITER_DRAIN, &mut writer_task).await.is_err() {
            debug!("Writer did not drain in time");
            writer_task.abort();
        }
        info!(
            reason = %reason,
            devices = ?identities,
            pending = decoder.pending(),
            "Device connection closed"
        );
    }
}

/// One socket read, bounded by the idle timeout when configured.
async fn read_chunk(
    reader: &mut OwnedReadHalf,
    buf: &mut [u8],
    idle: Option<Duration>,
) -> io::Result<usize> {
    match idle {
        Some(limit) => tokio::time::timeout(limit, reader.read(buf))
            .await
            .unwrap_or_else(|_| {
                debug!("Idle timeout");
                Err(io::Error::new(io::ErrorKind::TimedOut, "idle timeout"))
            }),
        None => reader.read(buf).await,
    }
}
