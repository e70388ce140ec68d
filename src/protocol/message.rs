//! Frame text → structured [`Message`].

use std::fmt;

use super::{ProtocolError, FIELD_SEPARATOR};

/// One parsed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub protocol_tag: String,
    pub device_id: String,
    /// Sender's claim about the body byte length. Not trusted.
    pub declared_length: String,
    /// Everything after the third separator, verbatim.
    pub body: String,
}

impl Message {
    /// Parse the interior of one frame (markers already stripped).
    ///
    /// Fields past the fourth are part of the body and are rejoined with `*`.
    pub fn parse(frame: &str) -> Result<Self, ProtocolError> {
        let fields: Vec<&str> = frame.split(FIELD_SEPARATOR).collect();
        if fields.len() < 4 {
            return Err(ProtocolError::Malformed {
                fields: fields.len(),
            });
        }

        Ok(Self {
            protocol_tag: fields[0].to_string(),
            device_id: fields[1].to_string(),
            declared_length: fields[2].to_string(),
            body: fields[3..].join(&FIELD_SEPARATOR.to_string()),
        })
    }

    /// The command keyword: body up to the first comma.
    pub fn keyword(&self) -> &str {
        self.body.split(',').next().unwrap_or_default()
    }

    /// Classified command for dispatch.
    pub fn command(&self) -> Command {
        Command::from_keyword(self.keyword())
    }

    /// `Some((declared, actual))` when the declared length disagrees with the
    /// body byte length, or cannot be parsed as decimal.
    pub fn length_mismatch(&self) -> Option<(String, usize)> {
        let actual = self.body.len();
        match self.declared_length.parse::<usize>() {
            Ok(declared) if declared == actual => None,
            _ => Some((self.declared_length.clone(), actual)),
        }
    }
}

/// Closed set of command keywords the gateway understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `LK` — keep-alive.
    KeepAlive,
    /// `UD`, `UD_LTE`, `UD_WCDMA`, `UD2` — position report.
    Position,
    /// `AL`, `AL_LTE` — alarm.
    Alarm,
    /// `CONFIG` — device announcing its configuration.
    Config,
    /// `TS` — status response/request from the device.
    StatusRequest,
    /// `VERNO` — firmware version.
    VersionRequest,
    /// Well-formed frame with a keyword outside the table.
    Unknown(String),
}

impl Command {
    pub fn from_keyword(keyword: &str) -> Self {
        match keyword {
            "LK" => Self::KeepAlive,
            "UD" | "UD_LTE" | "UD_WCDMA" | "UD2" => Self::Position,
            "AL" | "AL_LTE" => Self::Alarm,
            "CONFIG" => Self::Config,
            "TS" => Self::StatusRequest,
            "VERNO" => Self::VersionRequest,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Body of the acknowledgement the server owes for this command, if any.
    pub fn reply_body(&self) -> Option<&'static str> {
        match self {
            Self::KeepAlive => Some("LK"),
            Self::Alarm => Some("AL"),
            Self::Config => Some("CONFIG,1"),
            Self::Position | Self::StatusRequest | Self::VersionRequest | Self::Unknown(_) => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::KeepAlive => "keep_alive",
            Self::Position => "position",
            Self::Alarm => "alarm",
            Self::Config => "config",
            Self::StatusRequest => "status",
            Self::VersionRequest => "version",
            Self::Unknown(_) => "unknown",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(kw) => write!(f, "unknown({kw})"),
            other => f.write_str(other.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_keep_alive() {
        let msg = Message::parse("3G*8800000015*0009*LK,0,0,21").unwrap();
        assert_eq!(msg.protocol_tag, "3G");
        assert_eq!(msg.device_id, "8800000015");
        assert_eq!(msg.declared_length, "0009");
        assert_eq!(msg.body, "LK,0,0,21");
        assert_eq!(msg.keyword(), "LK");
        assert_eq!(msg.command(), Command::KeepAlive);
    }

    #[test]
    fn test_body_keeps_separators() {
        let msg = Message::parse("3G*1*0011*UD,a*b,c*d").unwrap();
        assert_eq!(msg.device_id, "1");
        assert_eq!(msg.body, "UD,a*b,c*d");
        assert_eq!(msg.command(), Command::Position);
    }

    #[test]
    fn test_too_few_fields() {
        assert_eq!(
            Message::parse("3G*123*0002"),
            Err(ProtocolError::Malformed { fields: 3 })
        );
        assert_eq!(
            Message::parse(""),
            Err(ProtocolError::Malformed { fields: 1 })
        );
    }

    #[test]
    fn test_empty_body_is_well_formed() {
        let msg = Message::parse("3G*123*0000*").unwrap();
        assert_eq!(msg.body, "");
        assert_eq!(msg.command(), Command::Unknown(String::new()));
    }

    #[test]
    fn test_command_table() {
        for kw in ["UD", "UD_LTE", "UD_WCDMA", "UD2"] {
            assert_eq!(Command::from_keyword(kw), Command::Position, "{kw}");
        }
        assert_eq!(Command::from_keyword("AL_LTE"), Command::Alarm);
        assert_eq!(Command::from_keyword("VERNO"), Command::VersionRequest);
        assert_eq!(Command::from_keyword("TS"), Command::StatusRequest);
        assert_eq!(
            Command::from_keyword("LKX"),
            Command::Unknown("LKX".to_string())
        );
    }

    #[test]
    fn test_reply_bodies() {
        assert_eq!(Command::KeepAlive.reply_body(), Some("LK"));
        assert_eq!(Command::Alarm.reply_body(), Some("AL"));
        assert_eq!(Command::Config.reply_body(), Some("CONFIG,1"));
        assert_eq!(Command::Position.reply_body(), None);
        assert_eq!(Command::StatusRequest.reply_body(), None);
        assert_eq!(Command::VersionRequest.reply_body(), None);
        assert_eq!(Command::Unknown("X".into()).reply_body(), None);
    }

    #[test]
    fn test_length_mismatch() {
        let ok = Message::parse("3G*1*0009*LK,0,0,21").unwrap();
        assert_eq!(ok.length_mismatch(), None);

        let short = Message::parse("3G*1*0002*LK,0,0,21").unwrap();
        assert_eq!(short.length_mismatch(), Some(("0002".to_string(), 9)));

        let garbage = Message::parse("3G*1*00A2*LK").unwrap();
        assert!(garbage.length_mismatch().is_some());
    }
}
