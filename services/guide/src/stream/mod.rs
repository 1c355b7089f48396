pub mod connection;
pub mod player;
pub mod protocol;
pub mod session;

#[cfg(test)]
pub(crate) mod support;

// Re-export the session-level surface, which is all most consumers need.
pub use connection::{ConnectionClient, ConnectionError, ConnectionEvents};
pub use player::{PlayerEvents, SegmentPlayer};
pub use session::{GuideEvents, GuideSession, StreamOrchestrator};
