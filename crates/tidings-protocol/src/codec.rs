//! Codec for encoding and decoding Tidings frames.
//!
//! Frames are compact JSON objects terminated by a single `\n`. JSON escapes
//! control characters inside strings, so the delimiter never appears inside
//! an encoded frame.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::frames::{Frame, FrameType};

/// Frame delimiter.
pub const FRAME_DELIMITER: u8 = b'\n';

/// Maximum encoded frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Default limit for a single inbound record (64 KiB).
pub const DEFAULT_MAX_INBOUND_FRAME: usize = 64 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// JSON encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    /// Record is not valid UTF-8.
    #[error("Invalid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// Record is not a `{"type": ..., "data": ...}` object.
    #[error("Malformed frame: {0}")]
    Malformed(String),

    /// Record carries a type tag this protocol does not define.
    #[error("Unknown message type '{0}'")]
    UnknownType(String),

    /// Known type tag with missing or ill-typed fields.
    #[error("Invalid '{kind}' frame: {reason}")]
    InvalidFields { kind: FrameType, reason: String },
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

/// Encode a frame to bytes, delimiter included.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode(frame: &Frame) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    encode_into(frame, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a frame into an existing buffer.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode_into(frame: &Frame, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    let payload = serde_json::to_vec(frame)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: payload.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    buf.reserve(payload.len() + 1);
    buf.extend_from_slice(&payload);
    buf.put_u8(FRAME_DELIMITER);

    Ok(())
}

/// Parse one record (without its delimiter) into a frame.
///
/// # Errors
///
/// Returns an error describing why the record is not a valid frame.
pub fn parse_record(record: &[u8]) -> Result<Frame, ProtocolError> {
    let text = std::str::from_utf8(record)?;
    let envelope: Envelope =
        serde_json::from_str(text.trim()).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    let kind: FrameType = envelope.kind.parse().map_err(ProtocolError::UnknownType)?;

    // Field-less frames may omit "data" entirely.
    let data = match envelope.data {
        Value::Null => Value::Object(serde_json::Map::new()),
        other => other,
    };

    serde_json::from_value(serde_json::json!({ "type": kind.as_str(), "data": data })).map_err(
        |e| ProtocolError::InvalidFields {
            kind,
            reason: e.to_string(),
        },
    )
}

/// Decode one record, turning any failure into an `Error` frame.
#[must_use]
pub fn decode_record(record: &[u8]) -> Frame {
    parse_record(record).unwrap_or_else(|e| Frame::error(e.to_string()))
}

/// Drain every complete frame from `buf`, leaving the unterminated tail.
///
/// Uses a fresh [`FrameCodec`]; streaming readers should keep their own codec
/// so oversized records are skipped consistently across reads.
#[must_use]
pub fn decode(buf: &mut BytesMut) -> Vec<Frame> {
    FrameCodec::new().decode(buf)
}

/// Streaming decoder state for one connection.
#[derive(Debug)]
pub struct FrameCodec {
    max_frame_size: usize,
    // Set while skipping the rest of an oversized record.
    discarding: bool,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_INBOUND_FRAME)
    }
}

impl FrameCodec {
    /// Create a codec with the default inbound limit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a codec that rejects inbound records longer than `max_frame_size`.
    #[must_use]
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            discarding: false,
        }
    }

    /// Try to decode the next frame from a buffer.
    ///
    /// Returns `None` when the buffer holds no complete record. Never fails:
    /// bad records come back as `Error` frames.
    pub fn decode_from(&mut self, buf: &mut BytesMut) -> Option<Frame> {
        loop {
            let Some(pos) = buf.iter().position(|&b| b == FRAME_DELIMITER) else {
                if !self.discarding && buf.len() > self.max_frame_size {
                    let size = buf.len();
                    buf.clear();
                    self.discarding = true;
                    return Some(self.too_large(size));
                }
                if self.discarding {
                    buf.clear();
                }
                return None;
            };

            let line = buf.split_to(pos + 1);

            if self.discarding {
                self.discarding = false;
                continue;
            }

            let record = strip_line_ending(&line);

            if record.len() > self.max_frame_size {
                return Some(self.too_large(record.len()));
            }

            if record.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            return Some(decode_record(record));
        }
    }

    /// Drain every complete frame from `buf`.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = self.decode_from(buf) {
            frames.push(frame);
        }
        frames
    }

    fn too_large(&self, size: usize) -> Frame {
        Frame::error(
            ProtocolError::FrameTooLarge {
                size,
                max: self.max_frame_size,
            }
            .to_string(),
        )
    }
}

fn strip_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(&[FRAME_DELIMITER]).unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
