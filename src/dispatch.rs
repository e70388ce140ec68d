//! Per-message dispatch: identify, then act on the command keyword.
//!
//! Every well-formed message, whatever its keyword:
//!
//! 1. queues a "connected" contact for the record store, and
//! 2. re-binds its `device_id` to the connection it arrived on.
//!
//! Then the [`Command`] decides whether an acknowledgement is owed:
//!
//! | Keyword                           | Reply        |
//! |-----------------------------------|--------------|
//! | `LK`                              | `LK`         |
//! | `UD`, `UD_LTE`, `UD_WCDMA`, `UD2` | —            |
//! | `AL`, `AL_LTE`                    | `AL`         |
//! | `CONFIG`                          | `CONFIG,1`   |
//! | `TS`, `VERNO`                     | —            |
//! | anything else                     | —            |
//!
//! At most one reply is produced per message. A failed reply write is logged
//! and otherwise ignored: the connection and its session stay up.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::protocol::{encode_frame, Command, Message};
use crate::records::{self, Contact};
use crate::registry::{ConnectionHandle, SessionRegistry};
use crate::traffic::{Direction, TrafficLog};

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub device_id: String,
    pub command: Command,
    /// The acknowledgement frame, if one was owed (sent or not).
    pub reply: Option<String>,
}

/// Shared, cheap-to-clone dispatcher used by every connection task.
#[derive(Clone)]
pub struct Dispatcher {
    registry: SessionRegistry,
    records_tx: mpsc::UnboundedSender<Contact>,
    traffic: Arc<TrafficLog>,
}

impl Dispatcher {
    pub fn new(
        registry: SessionRegistry,
        records_tx: mpsc::UnboundedSender<Contact>,
        traffic: Arc<TrafficLog>,
    ) -> Self {
        Self {
            registry,
            records_tx,
            traffic,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Parse and dispatch one frame interior.
    ///
    /// Returns `None` for malformed frames, which are logged and dropped with
    /// no reply and no state change.
    pub async fn handle_frame(&self, frame: &str, conn: &ConnectionHandle) -> Option<Outcome> {
        match Message::parse(frame) {
            Ok(msg) => {
                self.traffic
                    .record(Direction::Inbound, &msg.device_id, conn.conn_id, frame)
                    .await;
                Some(self.dispatch(&msg, conn).await)
            }
            Err(e) => {
                warn!(conn_id = conn.conn_id, peer = %conn.peer, frame, "Dropping frame: {e}");
                self.traffic
                    .record(Direction::Malformed, "", conn.conn_id, frame)
                    .await;
                None
            }
        }
    }

    /// Apply the side effects of one well-formed message.
    pub async fn dispatch(&self, msg: &Message, conn: &ConnectionHandle) -> Outcome {
        let device_id = msg.device_id.as_str();
        let command = msg.command();

        if let Some((declared, actual)) = msg.length_mismatch() {
            debug!(
                device_id,
                declared = %declared,
                actual,
                "Declared length does not match body"
            );
        }

        records::submit(
            &self.records_tx,
            Contact {
                device_id: device_id.to_string(),
                addr: conn.peer,
                connected: true,
                keyword: Some(msg.keyword().to_string()),
            },
        );
        self.registry
            .set(device_id, conn.with_tag(&msg.protocol_tag))
            .await;

        match &command {
            Command::KeepAlive | Command::Alarm | Command::Config => {
                debug!(device_id, %command, "Acknowledging");
            }
            Command::Position => debug!(device_id, body = %msg.body, "Position report"),
            Command::StatusRequest | Command::VersionRequest => {
                info!(device_id, %command, body = %msg.body, "Device report");
            }
            Command::Unknown(keyword) => {
                info!(device_id, keyword = %keyword, "Unrecognized command, ignoring");
            }
        }

        let reply = command
            .reply_body()
            .map(|body| encode_frame(&msg.protocol_tag, device_id, body));

        if let Some(frame) = &reply {
            self.traffic
                .record(Direction::Reply, device_id, conn.conn_id, frame)
                .await;
            if let Err(e) = conn.send(frame.clone()).await {
                warn!(device_id, "Reply write failed: {e}");
            }
        }

        Outcome {
            device_id: device_id.to_string(),
            command,
            reply,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::future;
    use std::net::SocketAddr;

    use futures::future::BoxFuture;

    use super::*;
    use crate::records::{
        spawn_record_writer, DeviceRecordSink, MemoryRecordStore, RecordError,
    };

    struct Harness {
        dispatcher: Dispatcher,
        store: MemoryRecordStore,
        conn: ConnectionHandle,
        wire: mpsc::Receiver<String>,
        traffic: Arc<TrafficLog>,
    }

    fn harness_with_sink(sink: Arc<dyn DeviceRecordSink>) -> Harness {
        let (records_tx, _task) = spawn_record_writer(sink);
        let traffic = Arc::new(TrafficLog::new(100));
        let dispatcher = Dispatcher::new(SessionRegistry::new(), records_tx, traffic.clone());
        let (tx, wire) = mpsc::channel(8);
        let peer: SocketAddr = "203.0.113.9:51000".parse().unwrap();
        Harness {
            dispatcher,
            store: MemoryRecordStore::new(),
            conn: ConnectionHandle::new(7, peer, "3G".into(), tx),
            wire,
            traffic,
        }
    }

    fn harness() -> Harness {
        let store = MemoryRecordStore::new();
        let mut h = harness_with_sink(Arc::new(store.clone()));
        h.store = store;
        h
    }

    async fn settle_records(store: &MemoryRecordStore, device_id: &str) {
        for _ in 0..100 {
            if store.get(device_id).await.is_some() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("record for {device_id} never written");
    }

    #[tokio::test]
    async fn test_keep_alive_reply_and_binding() {
        let mut h = harness();
        let out = h
            .dispatcher
            .handle_frame("3G*D*0009*LK,0,0,21", &h.conn)
            .await
            .unwrap();

        assert_eq!(out.command, Command::KeepAlive);
        assert_eq!(out.reply.as_deref(), Some("[3G*D*0002*LK]"));
        assert_eq!(h.wire.recv().await.as_deref(), Some("[3G*D*0002*LK]"));
        assert!(h.wire.try_recv().is_err());

        let bound = h.dispatcher.registry().get("D").await.unwrap();
        assert_eq!(bound.conn_id, 7);
    }

    #[tokio::test]
    async fn test_alarm_and_config_replies() {
        let mut h = harness();
        h.dispatcher
            .handle_frame("3G*D*0002*AL", &h.conn)
            .await
            .unwrap();
        assert_eq!(h.wire.recv().await.as_deref(), Some("[3G*D*0002*AL]"));

        h.dispatcher
            .handle_frame("3G*D*0009*AL_LTE,1", &h.conn)
            .await
            .unwrap();
        assert_eq!(h.wire.recv().await.as_deref(), Some("[3G*D*0002*AL]"));

        h.dispatcher
            .handle_frame("3G*D*0006*CONFIG", &h.conn)
            .await
            .unwrap();
        assert_eq!(
            h.wire.recv().await.as_deref(),
            Some("[3G*D*0008*CONFIG,1]")
        );
    }

    #[tokio::test]
    async fn test_position_no_reply_but_binds_and_records() {
        let mut h = harness();
        let out = h
            .dispatcher
            .handle_frame("3G*D*0010*UD,1*2*3,4", &h.conn)
            .await
            .unwrap();
        assert_eq!(out.command, Command::Position);
        assert!(out.reply.is_none());
        assert!(h.wire.try_recv().is_err());
        assert!(h.dispatcher.registry().get("D").await.is_some());

        settle_records(&h.store, "D").await;
        let rec = h.store.get("D").await.unwrap();
        assert!(rec.connected);
        assert_eq!(rec.last_command.as_deref(), Some("UD"));
        assert_eq!(rec.last_addr, "203.0.113.9:51000");
    }

    #[tokio::test]
    async fn test_silent_commands() {
        let mut h = harness();
        for frame in ["3G*D*0002*TS", "3G*D*0005*VERNO", "3G*D*0004*WHAT"] {
            let out = h.dispatcher.handle_frame(frame, &h.conn).await.unwrap();
            assert!(out.reply.is_none(), "{frame}");
        }
        assert!(h.wire.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_malformed_changes_nothing() {
        let mut h = harness();
        assert!(h.dispatcher.handle_frame("3G*D*LK", &h.conn).await.is_none());
        assert!(h.wire.try_recv().is_err());
        assert!(h.dispatcher.registry().is_empty().await);

        let logged = h
            .traffic
            .read_since(0, 10, None, Some(Direction::Malformed))
            .await;
        assert_eq!(logged.len(), 1);
    }

    #[tokio::test]
    async fn test_reply_uses_device_tag() {
        let mut h = harness();
        h.dispatcher
            .handle_frame("CS*D*0002*LK", &h.conn)
            .await
            .unwrap();
        assert_eq!(h.wire.recv().await.as_deref(), Some("[CS*D*0002*LK]"));
        let bound = h.dispatcher.registry().get("D").await.unwrap();
        assert_eq!(bound.protocol_tag, "CS");
    }

    #[tokio::test]
    async fn test_closed_writer_does_not_fail_dispatch() {
        let h = harness();
        drop(h.wire);
        let out = h
            .dispatcher
            .handle_frame("3G*D*0002*LK", &h.conn)
            .await
            .unwrap();
        assert!(out.reply.is_some());
        assert!(h.dispatcher.registry().get("D").await.is_some());
    }

    struct FailingSink;

    impl DeviceRecordSink for FailingSink {
        fn upsert(&self, _contact: Contact) -> BoxFuture<'_, Result<(), RecordError>> {
            Box::pin(async { Err(RecordError::Unavailable("down".into())) })
        }
    }

    struct StuckSink;

    impl DeviceRecordSink for StuckSink {
        fn upsert(&self, _contact: Contact) -> BoxFuture<'_, Result<(), RecordError>> {
            Box::pin(future::pending())
        }
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_block_reply() {
        for sink in [
            Arc::new(FailingSink) as Arc<dyn DeviceRecordSink>,
            Arc::new(StuckSink) as Arc<dyn DeviceRecordSink>,
        ] {
            let mut h = harness_with_sink(sink);
            for _ in 0..40 {
                h.dispatcher
                    .handle_frame("3G*D*0002*LK", &h.conn)
                    .await
                    .unwrap();
                assert_eq!(h.wire.recv().await.as_deref(), Some("[3G*D*0002*LK]"));
            }
        }
    }
}
