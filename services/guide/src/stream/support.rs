//! services/guide/src/stream/support.rs
//!
//! Test doubles shared by the streaming module tests: an in-memory segment
//! store, a scriptable audio engine, event recorders, and small helpers for
//! loopback websocket stub servers.

use crate::stream::connection::{ConnectionError, ConnectionEvents};
use crate::stream::player::PlayerEvents;
use crate::stream::protocol::AudioFrameHeader;
use crate::stream::session::GuideEvents;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tour_guide_core::domain::{ConnectionState, GuideMeta, SessionSummary};
use tour_guide_core::ports::{
    AudioEngine, EngineStatus, PortError, PortResult, SegmentHandle, SegmentStore,
};

/// Polls `pred` until it holds or the timeout elapses.
pub(crate) async fn wait_until<F: Fn() -> bool>(timeout: Duration, pred: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if pred() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    pred()
}

/// Binds a loopback listener and returns it with its `ws://` URL.
pub(crate) async fn bind_stub_server() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let url = format!("ws://{}", listener.local_addr().expect("local addr"));
    (listener, url)
}

//=========================================================================================
// Segment store double
//=========================================================================================

#[derive(Default)]
pub(crate) struct MockStore {
    files: StdMutex<HashMap<PathBuf, Vec<u8>>>,
    /// Everything ever written, so tests can inspect bytes of segments that
    /// have already been played and deleted.
    history: StdMutex<HashMap<PathBuf, Vec<u8>>>,
    counter: AtomicU64,
    writes: AtomicU64,
    fail_next_write: AtomicBool,
}

impl MockStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Resources written but not yet deleted.
    pub(crate) fn outstanding(&self) -> usize {
        self.files.lock().unwrap().len()
    }

    pub(crate) fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub(crate) fn bytes_for(&self, path: &Path) -> Option<Vec<u8>> {
        self.history.lock().unwrap().get(path).cloned()
    }

    pub(crate) fn fail_next_write(&self) {
        self.fail_next_write.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SegmentStore for MockStore {
    async fn write(&self, bytes: &[u8]) -> PortResult<SegmentHandle> {
        if self.fail_next_write.swap(false, Ordering::SeqCst) {
            return Err(PortError::Unexpected("mock write failure".to_string()));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let path = PathBuf::from(format!("mock/seg_{}", n));
        self.files.lock().unwrap().insert(path.clone(), bytes.to_vec());
        self.history.lock().unwrap().insert(path.clone(), bytes.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(SegmentHandle::new(path))
    }

    async fn delete(&self, handle: &SegmentHandle) -> PortResult<()> {
        match self.files.lock().unwrap().remove(handle.path()) {
            Some(_) => Ok(()),
            None => Err(PortError::NotFound(handle.path().display().to_string())),
        }
    }
}

//=========================================================================================
// Audio engine double
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum EngineCall {
    CreateFrom(PathBuf),
    Replace(PathBuf),
    Play,
    Release,
}

pub(crate) struct MockEngine {
    auto_finish: bool,
    calls: StdMutex<Vec<EngineCall>>,
    started_sources: StdMutex<Vec<PathBuf>>,
    loaded: StdMutex<Option<PathBuf>>,
    fail_next_start: AtomicBool,
    status: StdMutex<Option<mpsc::UnboundedSender<EngineStatus>>>,
}

impl MockEngine {
    /// With `auto_finish`, every successful `play` immediately reports
    /// `Started` and `Finished` through the status channel; without it the
    /// test drives status by hand.
    pub(crate) fn new(auto_finish: bool) -> Self {
        Self {
            auto_finish,
            calls: StdMutex::new(Vec::new()),
            started_sources: StdMutex::new(Vec::new()),
            loaded: StdMutex::new(None),
            fail_next_start: AtomicBool::new(false),
            status: StdMutex::new(None),
        }
    }

    pub(crate) fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Sources whose playback actually started, in order.
    pub(crate) fn started_sources(&self) -> Vec<PathBuf> {
        self.started_sources.lock().unwrap().clone()
    }

    pub(crate) fn fail_next_start(&self) {
        self.fail_next_start.store(true, Ordering::SeqCst);
    }

    fn emit(&self, status: EngineStatus) {
        if let Some(tx) = self.status.lock().unwrap().as_ref() {
            let _ = tx.send(status);
        }
    }
}

#[async_trait]
impl AudioEngine for MockEngine {
    async fn create_from_source(&self, source: &SegmentHandle) -> PortResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(EngineCall::CreateFrom(source.path().to_path_buf()));
        if self.fail_next_start.swap(false, Ordering::SeqCst) {
            return Err(PortError::Unavailable("mock engine failure".to_string()));
        }
        *self.loaded.lock().unwrap() = Some(source.path().to_path_buf());
        Ok(())
    }

    async fn replace_source(&self, source: &SegmentHandle) -> PortResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(EngineCall::Replace(source.path().to_path_buf()));
        if self.fail_next_start.swap(false, Ordering::SeqCst) {
            return Err(PortError::Unavailable("mock engine failure".to_string()));
        }
        *self.loaded.lock().unwrap() = Some(source.path().to_path_buf());
        Ok(())
    }

    async fn play(&self) -> PortResult<()> {
        self.calls.lock().unwrap().push(EngineCall::Play);
        if let Some(path) = self.loaded.lock().unwrap().take() {
            self.started_sources.lock().unwrap().push(path);
        }
        self.emit(EngineStatus::Started);
        if self.auto_finish {
            self.emit(EngineStatus::Finished);
        }
        Ok(())
    }

    async fn release(&self) -> PortResult<()> {
        self.calls.lock().unwrap().push(EngineCall::Release);
        Ok(())
    }

    fn status_events(&self) -> mpsc::UnboundedReceiver<EngineStatus> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.status.lock().unwrap() = Some(tx);
        rx
    }
}

//=========================================================================================
// Event recorders
//=========================================================================================

#[derive(Default)]
pub(crate) struct RecordingPlayerEvents {
    pub(crate) gaps: StdMutex<Vec<u64>>,
    pub(crate) started: AtomicU64,
    pub(crate) ended: AtomicU64,
    pub(crate) errors: StdMutex<Vec<String>>,
}

#[async_trait]
impl PlayerEvents for RecordingPlayerEvents {
    async fn on_gap(&self, expected_seq: u64) {
        self.gaps.lock().unwrap().push(expected_seq);
    }

    async fn on_playback_started(&self) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_playback_ended(&self) {
        self.ended.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_error(&self, message: String) {
        self.errors.lock().unwrap().push(message);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ConnEvent {
    State(ConnectionState),
    Meta(GuideMeta),
    Text(String),
    AudioJson(u64, String),
    AudioBinary(u64, Vec<u8>),
    Complete(String),
    Error(ConnectionError),
    Pong(i64),
}

#[derive(Default)]
pub(crate) struct RecordingConnectionEvents {
    pub(crate) events: StdMutex<Vec<ConnEvent>>,
}

impl RecordingConnectionEvents {
    pub(crate) fn snapshot(&self) -> Vec<ConnEvent> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn states(&self) -> Vec<ConnectionState> {
        self.snapshot()
            .into_iter()
            .filter_map(|event| match event {
                ConnEvent::State(state) => Some(state),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: ConnEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl ConnectionEvents for RecordingConnectionEvents {
    async fn on_connection_state_change(&self, state: ConnectionState) {
        self.push(ConnEvent::State(state));
    }

    async fn on_meta(&self, meta: GuideMeta) {
        self.push(ConnEvent::Meta(meta));
    }

    async fn on_text(&self, delta: String) {
        self.push(ConnEvent::Text(delta));
    }

    async fn on_audio_json(&self, seq: u64, bytes_base64: String) {
        self.push(ConnEvent::AudioJson(seq, bytes_base64));
    }

    async fn on_audio_binary(&self, header: AudioFrameHeader, payload: Bytes) {
        self.push(ConnEvent::AudioBinary(header.seq, payload.to_vec()));
    }

    async fn on_complete(&self, guide_id: String) {
        self.push(ConnEvent::Complete(guide_id));
    }

    async fn on_error(&self, error: ConnectionError) {
        self.push(ConnEvent::Error(error));
    }

    async fn on_pong(&self, ts: i64) {
        self.push(ConnEvent::Pong(ts));
    }
}

#[derive(Default)]
pub(crate) struct RecordingGuideEvents {
    pub(crate) metas: StdMutex<Vec<GuideMeta>>,
    pub(crate) deltas: StdMutex<Vec<String>>,
    pub(crate) playback: StdMutex<Vec<bool>>,
    pub(crate) completions: StdMutex<Vec<SessionSummary>>,
    pub(crate) errors: StdMutex<Vec<String>>,
    pub(crate) audio_errors: StdMutex<Vec<String>>,
}

impl RecordingGuideEvents {
    pub(crate) fn transcript(&self) -> String {
        self.deltas.lock().unwrap().concat()
    }
}

#[async_trait]
impl GuideEvents for RecordingGuideEvents {
    async fn on_meta(&self, meta: GuideMeta) {
        self.metas.lock().unwrap().push(meta);
    }

    async fn on_text(&self, delta: String) {
        self.deltas.lock().unwrap().push(delta);
    }

    async fn on_playback_started(&self) {
        self.playback.lock().unwrap().push(true);
    }

    async fn on_playback_stopped(&self) {
        self.playback.lock().unwrap().push(false);
    }

    async fn on_complete(&self, summary: SessionSummary) {
        self.completions.lock().unwrap().push(summary);
    }

    async fn on_error(&self, message: String) {
        self.errors.lock().unwrap().push(message);
    }

    async fn on_audio_error(&self, message: String) {
        self.audio_errors.lock().unwrap().push(message);
    }
}
