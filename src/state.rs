//! Shared application state passed to every admin handler via Axum's `State` extractor.

use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::records::MemoryRecordStore;
use crate::registry::SessionRegistry;
use crate::traffic::TrafficLog;

#[derive(Clone)]
pub struct AppState {
    /// Immutable configuration loaded at startup.
    pub config: Arc<Config>,
    /// Monotonic instant when the server started (for uptime calculation).
    pub start_time: Instant,
    /// Live device sessions, shared with the gateway.
    pub registry: SessionRegistry,
    /// Device contact records.
    pub records: MemoryRecordStore,
    /// Recent inbound/outbound frames.
    pub traffic: Arc<TrafficLog>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let traffic = Arc::new(TrafficLog::new(config.traffic.max_entries));
        Self {
            config: Arc::new(config),
            start_time: Instant::now(),
            registry: SessionRegistry::new(),
            records: MemoryRecordStore::new(),
            traffic,
        }
    }
}
