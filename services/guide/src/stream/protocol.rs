//! services/guide/src/stream/protocol.rs
//!
//! Defines the websocket message protocol between the mobile client and the
//! narration backend, plus the binary audio frame codec.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tour_guide_core::domain::{CapturePrefs, GeoLocation, GuideMeta};

//=========================================================================================
// Messages Sent FROM the Client TO the Server
//=========================================================================================

/// The structured text messages the client can send to the server. Field
/// names on the wire are camelCase, matching the backend schema.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Starts a fresh narration for a captured/imported image. Must carry
    /// the device id resolved before the first send.
    #[serde(rename_all = "camelCase")]
    Init {
        device_id: String,
        image_base64: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        identify_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        geo: Option<GeoLocation>,
        prefs: CapturePrefs,
    },

    /// Replays a previously generated guide from an offset.
    #[serde(rename_all = "camelCase")]
    Replay {
        device_id: String,
        guide_id: String,
        from_ms: u64,
    },

    /// Requests retransmission starting at a missing sequence number.
    Nack { seq: u64 },

    /// Liveness probe, sent on a fixed interval while connected.
    Ping,

    /// Polite teardown notice so the server can stop streaming early.
    Close,
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client
//=========================================================================================

/// The structured text messages the server can send to the client.
///
/// Unknown `type` tags map to `Unknown` and are logged and ignored rather
/// than treated as protocol errors. Audio also arrives as raw binary
/// frames, decoded separately by [`decode_binary_frame`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// Identifies the subject of the session; arrives once per session.
    /// Extra backend fields (`spot`, `estimatedDurationMs`, ...) are ignored.
    Meta(GuideMeta),

    /// An incremental transcript fragment. Arrival order on a single
    /// logical connection is authoritative; there is no ordering field.
    Text { delta: String },

    /// One playable audio segment as a JSON envelope with base64 payload.
    Audio { seq: u64, bytes: String },

    /// Marks end of stream; no further meta/text/audio follow.
    #[serde(rename_all = "camelCase")]
    Eos {
        guide_id: String,
        #[serde(default)]
        total_duration_ms: Option<u64>,
        #[serde(default)]
        transcript: Option<String>,
    },

    /// Keepalive reply.
    Pong {
        #[serde(default)]
        ts: i64,
    },

    /// A fatal, session-ending error. The backend tags these as either
    /// `err` or `error` and is inconsistent about the message field name.
    #[serde(rename = "err", alias = "error")]
    Err {
        #[serde(default)]
        code: Option<String>,
        #[serde(default)]
        msg: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },

    #[serde(other)]
    Unknown,
}

impl InboundMessage {
    /// Flattens the backend's inconsistent error message fields (`msg` on
    /// some paths, `message` on others) into one string.
    pub fn error_text(msg: &Option<String>, message: &Option<String>) -> String {
        msg.as_deref()
            .or(message.as_deref())
            .unwrap_or("Server error")
            .to_string()
    }
}

//=========================================================================================
// Binary Audio Frames
//=========================================================================================

/// The JSON header of a binary audio frame. The backend also sends
/// `start_ms`, `end_ms`, `format` and `bytes_len`; only `seq` matters here
/// and unrecognized fields are ignored.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct AudioFrameHeader {
    pub seq: u64,
}

/// Why a binary frame could not be decoded. All of these are recovered
/// locally: the frame is dropped and the connection stays up.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("binary frame too short: {0} bytes")]
    Truncated(usize),
    #[error("declared header length {declared} exceeds frame payload of {available} bytes")]
    HeaderOutOfBounds { declared: usize, available: usize },
    #[error("binary frame header is not valid JSON: {0}")]
    HeaderJson(#[from] serde_json::Error),
}

/// Decodes a binary audio frame:
/// `[4 bytes big-endian u32 header_len][header_len bytes UTF-8 JSON header][raw audio]`.
pub fn decode_binary_frame(frame: &Bytes) -> Result<(AudioFrameHeader, Bytes), FrameError> {
    if frame.len() < 4 {
        return Err(FrameError::Truncated(frame.len()));
    }
    let header_len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
    let available = frame.len() - 4;
    if header_len > available {
        return Err(FrameError::HeaderOutOfBounds {
            declared: header_len,
            available,
        });
    }
    let header: AudioFrameHeader = serde_json::from_slice(&frame[4..4 + header_len])?;
    Ok((header, frame.slice(4 + header_len..)))
}

/// Encodes a binary audio frame in the backend's format. The client itself
/// never sends audio; this exists for the stub servers in the tests.
#[cfg(test)]
pub(crate) fn encode_binary_frame(seq: u64, payload: &[u8]) -> Vec<u8> {
    let header = serde_json::to_vec(&AudioFrameHeader { seq }).expect("header serializes");
    let mut frame = Vec::with_capacity(4 + header.len() + payload.len());
    frame.extend_from_slice(&(header.len() as u32).to_be_bytes());
    frame.extend_from_slice(&header);
    frame.extend_from_slice(payload);
    frame
}
