//! services/guide/src/stream/player.rs
//!
//! Turns a duplicate/gap-prone stream of `(seq, bytes)` pairs into
//! continuous, ordered, gapless playback, and owns the lifecycle of every
//! persisted segment resource from write to played-or-destroyed.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tour_guide_core::ports::{AudioEngine, EngineStatus, SegmentHandle, SegmentStore};
use tracing::{debug, trace, warn};

/// Events a `SegmentPlayer` raises toward its owner.
#[async_trait]
pub trait PlayerEvents: Send + Sync {
    /// A gap opened: segments from `expected_seq` onward are missing. Raised
    /// exactly once per contiguous gap so the owner can request one resend.
    async fn on_gap(&self, expected_seq: u64);

    /// Playback went from inactive to active.
    async fn on_playback_started(&self);

    /// The backlog drained; stream audio has ended (for now).
    async fn on_playback_ended(&self);

    /// A non-fatal playback error. The affected segment stays queued and is
    /// retried on the next advance trigger.
    async fn on_error(&self, message: String);
}

/// The advance routine's explicit state machine. `Advancing` refuses
/// re-entry, since an engine status callback can fire inside a call that is
/// itself advancing the backlog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AdvanceState {
    Idle,
    Advancing,
}

#[derive(Debug)]
struct QueuedSegment {
    seq: u64,
    handle: SegmentHandle,
}

/// Consumes ordered audio segments, persists them locally, and drives
/// continuous playback through a lazily-created audio engine.
///
/// `expected_seq` starts at 1 and lives here, so a fresh player per session
/// resets the stream position. Segments arriving ahead of sequence are
/// persisted and parked until the gap fills; play order is therefore always
/// strictly increasing in `seq`.
pub struct SegmentPlayer {
    store: Arc<dyn SegmentStore>,
    engine: Arc<dyn AudioEngine>,
    events: Arc<dyn PlayerEvents>,
    expected_seq: u64,
    /// Contiguous segments awaiting playback, in seq order.
    ready: VecDeque<QueuedSegment>,
    /// Ahead-of-sequence segments waiting for a gap to fill.
    parked: BTreeMap<u64, SegmentHandle>,
    current: Option<QueuedSegment>,
    active: bool,
    advance_state: AdvanceState,
    engine_created: bool,
    destroyed: bool,
    cleanup_failures: u64,
}

impl SegmentPlayer {
    pub fn new(
        store: Arc<dyn SegmentStore>,
        engine: Arc<dyn AudioEngine>,
        events: Arc<dyn PlayerEvents>,
    ) -> Self {
        Self {
            store,
            engine,
            events,
            expected_seq: 1,
            ready: VecDeque::new(),
            parked: BTreeMap::new(),
            current: None,
            active: false,
            advance_state: AdvanceState::Idle,
            engine_created: false,
            destroyed: false,
            cleanup_failures: 0,
        }
    }

    pub fn expected_seq(&self) -> u64 {
        self.expected_seq
    }

    /// Accepts a segment delivered as a base64 JSON payload.
    pub async fn enqueue_base64(&mut self, seq: u64, bytes_base64: &str) {
        let bytes = match BASE64.decode(bytes_base64) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("dropping audio segment {} with invalid base64: {}", seq, e);
                return;
            }
        };
        self.enqueue_bytes(seq, &bytes).await;
    }

    /// Accepts a segment delivered as raw bytes.
    pub async fn enqueue_bytes(&mut self, seq: u64, bytes: &[u8]) {
        if self.destroyed {
            trace!("dropping segment {} after destroy", seq);
            return;
        }
        if seq < self.expected_seq {
            trace!("dropping duplicate segment {} (expected {})", seq, self.expected_seq);
            return;
        }

        if seq > self.expected_seq {
            if self.parked.contains_key(&seq) {
                trace!("dropping duplicate parked segment {}", seq);
                return;
            }
            // One nack per contiguous gap: the resend request covers every
            // segment from expected_seq onward, so later arrivals into the
            // same gap stay quiet.
            if self.parked.is_empty() {
                debug!("gap detected: expected {}, got {}", self.expected_seq, seq);
                self.events.on_gap(self.expected_seq).await;
            }
            match self.store.write(bytes).await {
                Ok(handle) => {
                    self.parked.insert(seq, handle);
                }
                Err(e) => warn!("failed to persist segment {}: {}", seq, e),
            }
        } else {
            match self.store.write(bytes).await {
                Ok(handle) => {
                    self.ready.push_back(QueuedSegment { seq, handle });
                    self.expected_seq = seq + 1;
                    while let Some(handle) = self.parked.remove(&self.expected_seq) {
                        self.ready.push_back(QueuedSegment {
                            seq: self.expected_seq,
                            handle,
                        });
                        self.expected_seq += 1;
                    }
                    debug!("segment {} enqueued; backlog={}", seq, self.ready.len());
                }
                // Not fatal: without the expected_seq advance the next
                // arrival reopens this as a gap and the segment is resent.
                Err(e) => warn!("failed to persist segment {}: {}", seq, e),
            }
        }

        self.advance().await;
    }

    /// Reacts to engine status notifications.
    pub async fn handle_engine_status(&mut self, status: EngineStatus) {
        if self.destroyed {
            return;
        }
        match status {
            EngineStatus::Started => trace!("engine reported playback start"),
            EngineStatus::Finished => {
                if let Some(segment) = self.current.take() {
                    trace!("segment {} finished", segment.seq);
                    self.release(segment.handle).await;
                }
                self.advance().await;
            }
        }
    }

    /// Starts the next queued segment if nothing is playing.
    pub async fn advance(&mut self) {
        if self.destroyed {
            return;
        }
        if self.advance_state == AdvanceState::Advancing {
            trace!("advance re-entered; ignoring");
            return;
        }
        self.advance_state = AdvanceState::Advancing;
        self.try_start_next().await;
        self.advance_state = AdvanceState::Idle;
    }

    async fn try_start_next(&mut self) {
        if self.current.is_some() {
            return;
        }
        let handle = match self.ready.front() {
            Some(segment) => segment.handle.clone(),
            None => {
                if self.active {
                    self.active = false;
                    debug!("backlog empty; stream audio ended");
                    self.events.on_playback_ended().await;
                }
                return;
            }
        };

        let start = if self.engine_created {
            match self.engine.replace_source(&handle).await {
                Ok(()) => self.engine.play().await,
                Err(e) => Err(e),
            }
        } else {
            match self.engine.create_from_source(&handle).await {
                Ok(()) => {
                    self.engine_created = true;
                    self.engine.play().await
                }
                Err(e) => Err(e),
            }
        };

        match start {
            Ok(()) => {
                // Dequeue only after the engine confirms the start, so a
                // failure leaves the head retryable instead of lost.
                if let Some(segment) = self.ready.pop_front() {
                    debug!("segment {} playing", segment.seq);
                    self.current = Some(segment);
                }
                if !self.active {
                    self.active = true;
                    self.events.on_playback_started().await;
                }
            }
            Err(e) => {
                warn!("audio engine failed to start segment: {}", e);
                self.events
                    .on_error(format!("Audio engine failed to start: {}", e))
                    .await;
            }
        }
    }

    /// Marks the player destroyed, releases the engine, and deletes every
    /// resource still referenced. Deletion failures are swallowed but
    /// counted. Idempotent.
    pub async fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.active = false;

        if let Err(e) = self.engine.release().await {
            debug!("engine release failed: {}", e);
        }

        let mut handles: Vec<SegmentHandle> = Vec::new();
        if let Some(segment) = self.current.take() {
            handles.push(segment.handle);
        }
        handles.extend(self.ready.drain(..).map(|segment| segment.handle));
        let parked = std::mem::take(&mut self.parked);
        handles.extend(parked.into_values());
        for handle in handles {
            self.release(handle).await;
        }

        if self.cleanup_failures > 0 {
            warn!(
                "suppressed {} cleanup failure(s) during player teardown",
                self.cleanup_failures
            );
        }
    }

    async fn release(&mut self, handle: SegmentHandle) {
        if let Err(e) = self.store.delete(&handle).await {
            self.cleanup_failures += 1;
            warn!("failed to delete segment resource: {}", e);
        }
    }
}
