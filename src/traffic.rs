//! In-memory traffic journal.
//!
//! Keeps the most recent frames seen or sent by the gateway in a fixed-size
//! ring buffer so operators can inspect what a device actually said without
//! turning on debug logging.
//!
//! - **Ring buffer**: `VecDeque<TrafficEntry>` capped at `max_entries`; the
//!   oldest entry is dropped when full.
//! - **Monotonic IDs**: clients poll with `since_id` and never see gaps except
//!   through eviction.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Frames longer than this are truncated in the journal.
const MAX_FRAME_CHARS: usize = 512;

/// Which way the frame travelled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Device → gateway.
    Inbound,
    /// Gateway → device, acknowledgement produced by the dispatcher.
    Reply,
    /// Gateway → device, issued by an operator.
    Command,
    /// Device → gateway, rejected as malformed.
    Malformed,
}

impl Direction {
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "inbound" => Some(Self::Inbound),
            "reply" => Some(Self::Reply),
            "command" => Some(Self::Command),
            "malformed" => Some(Self::Malformed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficEntry {
    pub id: u64,
    /// Unix milliseconds.
    pub timestamp: u64,
    pub direction: Direction,
    /// Empty for malformed frames that never yielded an identity.
    pub device_id: String,
    pub conn_id: u64,
    pub frame: String,
}

pub struct TrafficLog {
    entries: RwLock<VecDeque<TrafficEntry>>,
    next_id: AtomicU64,
    max_entries: usize,
}

impl TrafficLog {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(max_entries.min(1024))),
            next_id: AtomicU64::new(1),
            max_entries,
        }
    }

    /// Append an entry and return its ID.
    pub async fn record(
        &self,
        direction: Direction,
        device_id: &str,
        conn_id: u64,
        frame: &str,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if self.max_entries == 0 {
            return id;
        }

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        let entry = TrafficEntry {
            id,
            timestamp,
            direction,
            device_id: device_id.to_string(),
            conn_id,
            frame: truncate_frame(frame, MAX_FRAME_CHARS),
        };

        let mut entries = self.entries.write().await;
        if entries.len() >= self.max_entries {
            entries.pop_front();
        }
        entries.push_back(entry);
        id
    }

    /// Entries with `id > since_id`, oldest first, optionally filtered (AND).
    pub async fn read_since(
        &self,
        since_id: u64,
        limit: usize,
        device_id: Option<&str>,
        direction: Option<Direction>,
    ) -> Vec<TrafficEntry> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .filter(|e| e.id > since_id)
            .filter(|e| device_id.map_or(true, |d| e.device_id == d))
            .filter(|e| direction.map_or(true, |d| e.direction == d))
            .take(limit)
            .cloned()
            .collect()
    }
}

fn truncate_frame(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(3)).collect();
    out.push_str("...");
    out
}
