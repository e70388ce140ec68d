//! Operator-initiated commands.
//!
//! These are fire-and-forget: the frame is written to the device's live
//! connection if it has one, and nothing is queued otherwise.

use std::net::IpAddr;
use std::sync::Arc;

use tracing::{info, warn};

use crate::protocol::encode_frame;
use crate::registry::SessionRegistry;
use crate::traffic::{Direction, TrafficLog};

/// Commands an operator can push to a connected device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    /// `IP,<ip>,<port>` — reconnect to another server.
    ChangeServer { ip: IpAddr, port: u16 },
    /// `TS` — ask the device for its status report.
    StatusCheck,
    /// `CR` — request a burst of real-time position reports.
    Locate,
}

impl OperatorCommand {
    pub fn body(&self) -> String {
        match self {
            Self::ChangeServer { ip, port } => format!("IP,{ip},{port}"),
            Self::StatusCheck => "TS".to_string(),
            Self::Locate => "CR".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("device '{0}' has no live session")]
    NotConnected(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("write to device '{0}' failed: connection closing")]
    WriteFailed(String),
}

impl CommandError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotConnected(_) => "DEVICE_NOT_CONNECTED",
            Self::InvalidArgument(_) => "INVALID_ARGUMENT",
            Self::WriteFailed(_) => "WRITE_FAILED",
        }
    }
}

/// Build a `ChangeServer` command from operator-supplied strings.
pub fn change_server(ip: &str, port: u16) -> Result<OperatorCommand, CommandError> {
    let ip: IpAddr = ip
        .trim()
        .parse()
        .map_err(|_| CommandError::InvalidArgument(format!("'{ip}' is not an IP address")))?;
    if port == 0 {
        return Err(CommandError::InvalidArgument("port must be non-zero".into()));
    }
    Ok(OperatorCommand::ChangeServer { ip, port })
}

/// Encode `command` for `device_id` and write it to the live session.
///
/// Returns the frame that was sent. No write happens when the device has no
/// session.
pub async fn send_command(
    registry: &SessionRegistry,
    traffic: &Arc<TrafficLog>,
    device_id: &str,
    command: &OperatorCommand,
) -> Result<String, CommandError> {
    let Some(handle) = registry.get(device_id).await else {
        info!(device_id, ?command, "Command for device without session");
        return Err(CommandError::NotConnected(device_id.to_string()));
    };

    let frame = encode_frame(&handle.protocol_tag, device_id, &command.body());
    if let Err(e) = handle.send(frame.clone()).await {
        warn!(device_id, "Command write failed: {e}");
        return Err(CommandError::WriteFailed(device_id.to_string()));
    }

    traffic
        .record(Direction::Command, device_id, handle.conn_id, &frame)
        .await;
    info!(device_id, conn_id = handle.conn_id, frame = %frame, "Command sent");
    Ok(frame)
}
