//! Bracket-delimited tracker protocol.
//!
//! Every unit on the wire is an ASCII frame:
//!
//! ```text
//! [<tag>*<device_id>*<LLLL>*<body>]
//! ```
//!
//! - `tag` — protocol/transport identifier (e.g. `3G`)
//! - `device_id` — hardware identity (IMEI), the key for sessions and records
//! - `LLLL` — body byte length, decimal, zero padded to 4 digits
//! - `body` — `KEYWORD[,field...]`, may itself contain `*`
//!
//! Submodules:
//! - [`framer`] — per-connection byte stream → frames (with hex wrapper detection)
//! - [`message`] — frame text → [`Message`] and [`Command`]
//! - [`encoder`] — outbound frame construction

pub mod encoder;
pub mod framer;
pub mod message;

pub use encoder::encode_frame;
pub use framer::FrameDecoder;
pub use message::{Command, Message};

/// Start-of-frame marker.
pub const FRAME_START: char = '[';
/// End-of-frame marker.
pub const FRAME_END: char = ']';
/// Separator between the four header/body fields.
pub const FIELD_SEPARATOR: char = '*';

/// Protocol-level failures. None of these are fatal to the process.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame had fewer than four `*`-separated fields.
    #[error("malformed frame: expected at least 4 fields, got {fields}")]
    Malformed { fields: usize },
    /// Pending buffer grew past the configured cap without completing a frame.
    #[error("receive buffer exceeded {limit} bytes without a complete frame")]
    BufferOverflow { limit: usize },
}
