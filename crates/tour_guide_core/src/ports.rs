//! crates/tour_guide_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the streaming client's core
//! logic. These traits form the boundary of the hexagonal architecture,
//! allowing the core to be independent of specific external implementations
//! like the filesystem or the platform audio stack.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external facilities (e.g.
/// filesystem, audio device).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Facility unavailable: {0}")]
    Unavailable(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Segment Resources
//=========================================================================================

/// Opaque handle to one persisted audio segment. The `SegmentPlayer` owns
/// every handle it receives from creation until the segment has been played
/// or the session is torn down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentHandle {
    path: PathBuf,
}

impl SegmentHandle {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Status notifications emitted by an `AudioEngine`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    /// Playback of the current source has started.
    Started,
    /// The current source has been played to completion.
    Finished,
}

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// Persists audio segments to a local resource before playback.
#[async_trait]
pub trait SegmentStore: Send + Sync {
    /// Writes the segment bytes to a uniquely-named local resource.
    async fn write(&self, bytes: &[u8]) -> PortResult<SegmentHandle>;

    /// Deletes a previously written resource. Failures are non-fatal to
    /// callers, which swallow and count them.
    async fn delete(&self, handle: &SegmentHandle) -> PortResult<()>;
}

/// The single facility that can produce real-time audio output.
///
/// The underlying engine instance is created lazily on the first source and
/// reused for subsequent segments (`replace_source`) to avoid engine-startup
/// latency between segments.
#[async_trait]
pub trait AudioEngine: Send + Sync {
    /// Creates the underlying engine instance loaded with `source`.
    async fn create_from_source(&self, source: &SegmentHandle) -> PortResult<()>;

    /// Swaps the loaded source in place on the existing engine instance.
    async fn replace_source(&self, source: &SegmentHandle) -> PortResult<()>;

    /// Starts playback of the loaded source. A successful return confirms
    /// that playback has started.
    async fn play(&self) -> PortResult<()>;

    /// Releases the underlying engine instance and stops any playback.
    async fn release(&self) -> PortResult<()>;

    /// Returns the receiving side of the engine's status notifications.
    /// A later call supersedes earlier subscriptions.
    fn status_events(&self) -> mpsc::UnboundedReceiver<EngineStatus>;
}

/// Supplies the stable device identifier, consulted once per session before
/// the first `init`/`replay` send.
#[async_trait]
pub trait DeviceIdentity: Send + Sync {
    async fn device_id(&self) -> PortResult<String>;
}
