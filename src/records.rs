//! Device contact records.
//!
//! The protocol core only needs to say "this device was just seen" and "this
//! device went away"; [`DeviceRecordSink`] is that seam. [`MemoryRecordStore`]
//! is the in-process implementation used by the server and the admin API.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

/// Sink failures. Logged by callers, never propagated to the device.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("record store unavailable: {0}")]
    Unavailable(String),
}

/// One contact observation.
#[derive(Debug, Clone)]
pub struct Contact {
    pub device_id: String,
    pub addr: SocketAddr,
    pub connected: bool,
    /// Command keyword that produced the contact (`None` for disconnects).
    pub keyword: Option<String>,
}

/// Write-only view of the device record store.
pub trait DeviceRecordSink: Send + Sync {
    /// Create or update the record for `contact.device_id`.
    fn upsert(&self, contact: Contact) -> BoxFuture<'_, Result<(), RecordError>>;
}

/// Persisted state for one device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceRecord {
    pub device_id: String,
    /// Unix seconds.
    pub first_seen: u64,
    /// Unix seconds.
    pub last_seen: u64,
    pub last_addr: String,
    pub connected: bool,
    pub messages_total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_command: Option<String>,
}

/// In-memory record store keyed by device id.
#[derive(Clone, Default)]
pub struct MemoryRecordStore {
    records: Arc<RwLock<HashMap<String, DeviceRecord>>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, device_id: &str) -> Option<DeviceRecord> {
        self.records.read().await.get(device_id).cloned()
    }

    /// All records, most recently seen first.
    pub async fn list(&self) -> Vec<DeviceRecord> {
        let mut list: Vec<DeviceRecord> = self.records.read().await.values().cloned().collect();
        list.sort_by(|a, b| {
            b.last_seen
                .cmp(&a.last_seen)
                .then_with(|| a.device_id.cmp(&b.device_id))
        });
        list
    }

    async fn apply(&self, contact: Contact) {
        let now = unix_now();
        let mut records = self.records.write().await;
        let record = records
            .entry(contact.device_id.clone())
            .or_insert_with(|| DeviceRecord {
                device_id: contact.device_id.clone(),
                first_seen: now,
                last_seen: now,
                last_addr: contact.addr.to_string(),
                connected: contact.connected,
                messages_total: 0,
                last_command: None,
            });

        record.last_addr = contact.addr.to_string();
        record.connected = contact.connected;
        if let Some(keyword) = contact.keyword {
            record.last_seen = now;
            record.messages_total += 1;
            record.last_command = Some(keyword);
        }
    }
}

impl DeviceRecordSink for MemoryRecordStore {
    fn upsert(&self, contact: Contact) -> BoxFuture<'_, Result<(), RecordError>> {
        Box::pin(async move {
            self.apply(contact).await;
            Ok(())
        })
    }
}

/// Spawn the task that feeds contacts into `sink` one at a time, in order.
///
/// The queue is unbounded: [`submit`] never waits on the sink and never
/// drops a contact while the writer is running.
pub fn spawn_record_writer(
    sink: Arc<dyn DeviceRecordSink>,
) -> (mpsc::UnboundedSender<Contact>, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Contact>();
    let task = tokio::spawn(async move {
        while let Some(contact) = rx.recv().await {
            let device_id = contact.device_id.clone();
            if let Err(e) = sink.upsert(contact).await {
                warn!(device_id = %device_id, "Record upsert failed: {e}");
            }
        }
        debug!("Record writer stopped");
    });
    (tx, task)
}

/// Queue a contact without waiting. Only fails once the writer has stopped.
pub fn submit(tx: &mpsc::UnboundedSender<Contact>, contact: Contact) {
    if let Err(mpsc::error::SendError(contact)) = tx.send(contact) {
        warn!(device_id = %contact.device_id, "Dropped record update: writer stopped");
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
