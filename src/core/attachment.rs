//! Versioned attachment codec.
//!
//! Attachments are arbitrary JSON values that a handler pins to a socket. They are the only
//! piece of handler state that survives hibernation, so the encoding is versioned: a buffer
//! written by a different format version is rejected instead of being silently misread.
//!
//! Layout: `[0xFF, FORMAT_VERSION, json...]`. An empty buffer means "no attachment".

use bytes::{BufMut, Bytes, BytesMut};

use super::types::AttachmentError;

/// Attachment value as seen by handlers.
pub type Attachment = sonic_rs::Value;

/// Leading byte of every serialized attachment.
pub const HEADER_TAG: u8 = 0xFF;

/// Current attachment format version.
pub const FORMAT_VERSION: u8 = 15;

pub fn serialize_attachment(value: &Attachment) -> Result<Bytes, AttachmentError> {
    let json = sonic_rs::to_vec(value).map_err(|e| AttachmentError::Encode(e.to_string()))?;
    let mut buf = BytesMut::with_capacity(json.len() + 2);
    buf.put_u8(HEADER_TAG);
    buf.put_u8(FORMAT_VERSION);
    buf.extend_from_slice(&json);
    Ok(buf.freeze())
}

pub fn deserialize_attachment(buf: &[u8]) -> Result<Option<Attachment>, AttachmentError> {
    if buf.is_empty() {
        return Ok(None);
    }
    let [tag, version, json @ ..] = buf else {
        return Err(AttachmentError::MissingHeader);
    };
    if *tag != HEADER_TAG {
        return Err(AttachmentError::MissingHeader);
    }
    if *version != FORMAT_VERSION {
        return Err(AttachmentError::UnsupportedVersion {
            found: *version,
            expected: FORMAT_VERSION,
        });
    }
    sonic_rs::from_slice(json)
        .map(Some)
        .map_err(|e| AttachmentError::Decode(e.to_string()))
}
