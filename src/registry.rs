//! Live device sessions: `device_id` → the connection currently speaking for it.
//!
//! The registry is the only bridge between inbound device traffic and
//! operator-initiated commands. Every well-formed message re-binds its
//! `device_id` to the connection it arrived on (last writer wins). A closing
//! connection only removes the entries that still point at itself, so a
//! device that reconnected on a new socket keeps its newer binding.

use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("connection {conn_id} writer closed")]
    WriterClosed { conn_id: u64 },
}

/// Outbound side of one device connection.
///
/// Cloning is cheap; all clones feed the same writer task.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    /// Unique per accepted TCP connection.
    pub conn_id: u64,
    pub peer: SocketAddr,
    /// Protocol tag the device used on its latest message.
    pub protocol_tag: String,
    pub connected_since: Instant,
    tx: mpsc::Sender<String>,
}

impl ConnectionHandle {
    pub fn new(
        conn_id: u64,
        peer: SocketAddr,
        protocol_tag: String,
        tx: mpsc::Sender<String>,
    ) -> Self {
        Self {
            conn_id,
            peer,
            protocol_tag,
            connected_since: Instant::now(),
            tx,
        }
    }

    /// Same handle with a different protocol tag.
    #[must_use]
    pub fn with_tag(&self, protocol_tag: &str) -> Self {
        Self {
            protocol_tag: protocol_tag.to_string(),
            ..self.clone()
        }
    }

    /// Queue a frame for the connection's writer task.
    ///
    /// Fails only when the writer has gone away (connection closing).
    pub async fn send(&self, frame: String) -> Result<(), SendError> {
        self.tx.send(frame).await.map_err(|_| SendError::WriterClosed {
            conn_id: self.conn_id,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Reporting view of one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub device_id: String,
    pub conn_id: u64,
    pub peer: String,
    pub protocol_tag: String,
    pub connected_secs: u64,
}

/// Process-wide session map. Clone to share; all clones see the same map.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, ConnectionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `device_id` to `handle`, replacing any previous binding.
    ///
    /// Returns the replaced handle, if any.
    pub async fn set(&self, device_id: &str, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let conn_id = handle.conn_id;
        let previous = self
            .sessions
            .write()
            .await
            .insert(device_id.to_string(), handle);

        match &previous {
            Some(old) if old.conn_id != conn_id => {
                warn!(
                    device_id,
                    old_conn = old.conn_id,
                    new_conn = conn_id,
                    "Device identity claimed by a new connection, replacing binding"
                );
            }
            Some(_) => {}
            None => debug!(device_id, conn_id, "Session bound"),
        }
        previous
    }

    pub async fn get(&self, device_id: &str) -> Option<ConnectionHandle> {
        self.sessions.read().await.get(device_id).cloned()
    }

    /// Remove `device_id` only if it is still bound to `conn_id`.
    ///
    /// Returns `true` when an entry was removed.
    pub async fn remove_if(&self, device_id: &str, conn_id: u64) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get(device_id) {
            Some(handle) if handle.conn_id == conn_id => {
                sessions.remove(device_id);
                debug!(device_id, conn_id, "Session removed");
                true
            }
            Some(handle) => {
                debug!(
                    device_id,
                    conn_id,
                    current_conn = handle.conn_id,
                    "Closing connection no longer owns identity, leaving binding"
                );
                false
            }
            None => false,
        }
    }

    /// Every device id with a live session, sorted.
    pub async fn identities(&self) -> BTreeSet<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    /// Snapshot of all sessions, sorted by device id.
    pub async fn list(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.read().await;
        let mut list: Vec<SessionInfo> = sessions
            .iter()
            .map(|(device_id, h)| SessionInfo {
                device_id: device_id.clone(),
                conn_id: h.conn_id,
                peer: h.peer.to_string(),
                protocol_tag: h.protocol_tag.clone(),
                connected_secs: h.connected_since.elapsed().as_secs(),
            })
            .collect();
        list.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        list
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
