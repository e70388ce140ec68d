//! Outbound frame construction.

use super::{FIELD_SEPARATOR, FRAME_END, FRAME_START};

/// Build `[tag*device_id*LLLL*body]`.
///
/// `LLLL` is the body byte length in decimal, zero padded to four digits.
/// Bodies longer than 9999 bytes print a wider field; devices never send or
/// accept anything close to that.
pub fn encode_frame(tag: &str, device_id: &str, body: &str) -> String {
    format!(
        "{FRAME_START}{tag}{FIELD_SEPARATOR}{device_id}{FIELD_SEPARATOR}{len:04}{FIELD_SEPARATOR}{body}{FRAME_END}",
        len = body.len()
    )
}
