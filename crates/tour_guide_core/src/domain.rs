//! crates/tour_guide_core/src/domain.rs
//!
//! Defines the core data structures for the guide streaming client.
//! The wire-facing types (`GeoLocation`, `CapturePrefs`, `GuideMeta`) carry
//! serde derives with the camelCase field names the server speaks; the
//! session-level types (`GuideRequest`, `SessionSummary`) are plain structs.

use serde::{Deserialize, Serialize};

/// Geographic coordinates with optional accuracy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoLocation {
    pub lat: f64,
    pub lng: f64,
    /// Accuracy in meters, if the location provider reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy_m: Option<f64>,
}

/// Narration language requested for a guide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Language {
    #[serde(rename = "zh")]
    Zh,
    #[serde(rename = "en")]
    En,
}

/// User preferences sent along with every fresh narration request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturePrefs {
    pub language: Language,
    pub voice_speed: f64,
    pub auto_return: bool,
    pub haptic_feedback: bool,
    pub subtitles: bool,
}

impl Default for CapturePrefs {
    fn default() -> Self {
        Self {
            language: Language::Zh,
            voice_speed: 1.0,
            auto_return: true,
            haptic_feedback: true,
            subtitles: true,
        }
    }
}

/// Bounding box of the identified subject within the captured image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Metadata identifying the subject of a guide, sent once per session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuideMeta {
    pub guide_id: String,
    pub title: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_image: Option<String>,
}

/// What the caller wants out of a streaming session: a fresh narration for
/// a captured image, or a replay of a previously generated guide.
#[derive(Debug, Clone, PartialEq)]
pub enum GuideRequest {
    Init {
        image_base64: String,
        image_url: Option<String>,
        identify_id: Option<String>,
        geo: Option<GeoLocation>,
        prefs: CapturePrefs,
    },
    Replay {
        guide_id: String,
        from_ms: u64,
    },
}

/// Everything the caller needs to persist a history record when a session
/// completes. Persistence itself is the caller's job.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub guide_id: String,
    pub title: String,
    pub confidence: f64,
    pub transcript: String,
    pub cover_image_ref: Option<String>,
}

/// Lifecycle of the underlying streaming transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Errored,
}
