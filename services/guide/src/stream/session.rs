//! services/guide/src/stream/session.rs
//!
//! Composes one `ConnectionClient` and one `SegmentPlayer` into a single
//! externally-controlled session, and translates low-level events into the
//! vocabulary the rest of the application expects.

use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::stream::connection::{ConnectionClient, ConnectionError, ConnectionEvents};
use crate::stream::player::{PlayerEvents, SegmentPlayer};
use crate::stream::protocol::{AudioFrameHeader, OutboundMessage};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tour_guide_core::domain::{
    CapturePrefs, ConnectionState, GuideMeta, GuideRequest, SessionSummary,
};
use tour_guide_core::ports::{AudioEngine, DeviceIdentity, SegmentStore};
use tracing::{debug, info, trace, warn};

/// The callback contract between a session and its caller (the UI layer).
/// One implementation per consumer, injected into `open`.
#[async_trait]
pub trait GuideEvents: Send + Sync {
    async fn on_meta(&self, meta: GuideMeta);
    async fn on_text(&self, delta: String);
    async fn on_playback_started(&self);
    async fn on_playback_stopped(&self);
    /// End of session. The summary carries everything the caller needs to
    /// persist a history record; persisting it is the caller's job.
    async fn on_complete(&self, summary: SessionSummary);
    /// Fatal, session-ending failure; present as "please retry".
    async fn on_error(&self, message: String);
    /// Non-fatal playback failure; the segment stays queued for retry.
    async fn on_audio_error(&self, message: String);
}

/// Late-bound weak reference to the session's connection, so the event
/// bridges can send without creating an `Arc` cycle through the client's
/// handler.
#[derive(Default)]
struct ClientHandle(OnceLock<Weak<ConnectionClient>>);

impl ClientHandle {
    fn bind(&self, client: &Arc<ConnectionClient>) {
        let _ = self.0.set(Arc::downgrade(client));
    }

    fn upgrade(&self) -> Option<Arc<ConnectionClient>> {
        self.0.get().and_then(Weak::upgrade)
    }

    async fn send(&self, message: OutboundMessage) {
        if let Some(client) = self.upgrade() {
            client.send(message).await;
        }
    }
}

/// Player events → nack requests and caller playback state.
struct PlayerBridge {
    client: Arc<ClientHandle>,
    events: Arc<dyn GuideEvents>,
}

#[async_trait]
impl PlayerEvents for PlayerBridge {
    async fn on_gap(&self, expected_seq: u64) {
        debug!("requesting resend from seq {}", expected_seq);
        self.client.send(OutboundMessage::Nack { seq: expected_seq }).await;
    }

    async fn on_playback_started(&self) {
        self.events.on_playback_started().await;
    }

    async fn on_playback_ended(&self) {
        self.events.on_playback_stopped().await;
    }

    async fn on_error(&self, message: String) {
        self.events.on_audio_error(message).await;
    }
}

#[derive(Default)]
struct Progress {
    meta: Option<GuideMeta>,
    transcript: String,
    completed: bool,
}

/// Connection events → player enqueues and caller events.
struct ConnectionBridge {
    client: Arc<ClientHandle>,
    player: Arc<Mutex<SegmentPlayer>>,
    events: Arc<dyn GuideEvents>,
    device_id: String,
    request: GuideRequest,
    progress: Mutex<Progress>,
}

impl ConnectionBridge {
    fn initial_message(&self) -> OutboundMessage {
        match &self.request {
            GuideRequest::Init {
                image_base64,
                image_url,
                identify_id,
                geo,
                prefs,
            } => OutboundMessage::Init {
                device_id: self.device_id.clone(),
                image_base64: image_base64.clone(),
                image_url: image_url.clone(),
                identify_id: identify_id.clone(),
                geo: geo.clone(),
                prefs: prefs.clone(),
            },
            GuideRequest::Replay { guide_id, from_ms } => OutboundMessage::Replay {
                device_id: self.device_id.clone(),
                guide_id: guide_id.clone(),
                from_ms: *from_ms,
            },
        }
    }

    fn cover_image_ref(&self) -> Option<String> {
        match &self.request {
            GuideRequest::Init { image_url, .. } => image_url.clone(),
            GuideRequest::Replay { .. } => None,
        }
    }
}

#[async_trait]
impl ConnectionEvents for ConnectionBridge {
    async fn on_connection_state_change(&self, state: ConnectionState) {
        match state {
            ConnectionState::Connected => {
                // Sent on every connected transition: after a mid-session
                // reconnect the server has no context for this socket, so
                // the stream only resumes once re-initiated.
                debug!("connected; sending session request");
                self.client.send(self.initial_message()).await;
            }
            ConnectionState::Disconnected => {
                if self.progress.lock().await.completed {
                    return;
                }
                if let Some(client) = self.client.upgrade() {
                    if !client.reconnect_pending().await && !client.user_closed().await {
                        warn!("reconnect budget exhausted; session failed");
                        self.events
                            .on_error("Connection lost. Please retry.".to_string())
                            .await;
                    }
                }
            }
            ConnectionState::Connecting | ConnectionState::Errored => {}
        }
    }

    async fn on_meta(&self, meta: GuideMeta) {
        {
            let mut progress = self.progress.lock().await;
            if progress.meta.is_some() {
                // One meta per session; the backend should never send more.
                warn!("ignoring duplicate meta for guide {}", meta.guide_id);
                return;
            }
            progress.meta = Some(meta.clone());
        }
        self.events.on_meta(meta).await;
    }

    async fn on_text(&self, delta: String) {
        self.progress.lock().await.transcript.push_str(&delta);
        self.events.on_text(delta).await;
    }

    async fn on_audio_json(&self, seq: u64, bytes_base64: String) {
        self.player.lock().await.enqueue_base64(seq, &bytes_base64).await;
    }

    async fn on_audio_binary(&self, header: AudioFrameHeader, payload: Bytes) {
        self.player.lock().await.enqueue_bytes(header.seq, &payload).await;
    }

    async fn on_complete(&self, guide_id: String) {
        let summary = {
            let mut progress = self.progress.lock().await;
            progress.completed = true;
            let (title, confidence) = progress
                .meta
                .as_ref()
                .map(|meta| (meta.title.clone(), meta.confidence))
                .unwrap_or_default();
            SessionSummary {
                guide_id,
                title,
                confidence,
                transcript: progress.transcript.clone(),
                cover_image_ref: self.cover_image_ref(),
            }
        };
        info!("guide {} completed ({} chars)", summary.guide_id, summary.transcript.len());
        self.events.on_complete(summary).await;
    }

    async fn on_error(&self, error: ConnectionError) {
        match error {
            ConnectionError::Server { .. } => {
                self.events.on_error(error.to_string()).await;
            }
            // Transport errors are recovered through the reconnect state
            // machine; only state changes reach the caller.
            ConnectionError::Transport(message) => warn!("transport error: {}", message),
        }
    }

    async fn on_pong(&self, ts: i64) {
        trace!("keepalive pong ts={}", ts);
    }
}

/// One open streaming session. Obtained from `StreamOrchestrator::open`;
/// `close` is the teardown handle and is safe to call any number of times.
pub struct GuideSession {
    client: Arc<ConnectionClient>,
    player: Arc<Mutex<SegmentPlayer>>,
    pump: JoinHandle<()>,
    request: GuideRequest,
    closed: AtomicBool,
}

impl GuideSession {
    /// Tears the session down: connection first, then the player and its
    /// resources, then the engine status pump. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("session already closed");
            return;
        }
        // Best-effort politeness so the server can stop streaming early.
        self.client.send(OutboundMessage::Close).await;
        self.client.disconnect().await;
        self.player.lock().await.destroy().await;
        self.pump.abort();
        info!("guide session closed");
    }

    pub fn request(&self) -> &GuideRequest {
        &self.request
    }
}

impl Drop for GuideSession {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) {
            warn!("guide session dropped without close; aborting status pump");
            self.pump.abort();
        }
    }
}

/// Builds sessions out of the injected collaborators. Sessions are strictly
/// sequential: `restart` tears the old one down completely before opening
/// the next.
pub struct StreamOrchestrator {
    config: Arc<StreamConfig>,
    store: Arc<dyn SegmentStore>,
    engine: Arc<dyn AudioEngine>,
    identity: Arc<dyn DeviceIdentity>,
}

impl StreamOrchestrator {
    pub fn new(
        config: Arc<StreamConfig>,
        store: Arc<dyn SegmentStore>,
        engine: Arc<dyn AudioEngine>,
        identity: Arc<dyn DeviceIdentity>,
    ) -> Self {
        Self {
            config,
            store,
            engine,
            identity,
        }
    }

    /// Opens a session for `request` and starts connecting. The returned
    /// handle is the only way to tear the session down.
    pub async fn open(
        &self,
        request: GuideRequest,
        events: Arc<dyn GuideEvents>,
    ) -> Result<GuideSession, StreamError> {
        let device_id = self.identity.device_id().await?;

        let handle = Arc::new(ClientHandle::default());
        let player_bridge = Arc::new(PlayerBridge {
            client: handle.clone(),
            events: events.clone(),
        });
        let player = Arc::new(Mutex::new(SegmentPlayer::new(
            self.store.clone(),
            self.engine.clone(),
            player_bridge,
        )));

        let bridge = Arc::new(ConnectionBridge {
            client: handle.clone(),
            player: player.clone(),
            events,
            device_id,
            request: request.clone(),
            progress: Mutex::new(Progress::default()),
        });
        let client = Arc::new(ConnectionClient::new(self.config.clone(), bridge));
        handle.bind(&client);

        let mut status_rx = self.engine.status_events();
        let pump_player = player.clone();
        let pump = tokio::spawn(async move {
            while let Some(status) = status_rx.recv().await {
                pump_player.lock().await.handle_engine_status(status).await;
            }
        });

        client.connect().await;
        info!("guide session opened");
        Ok(GuideSession {
            client,
            player,
            pump,
            request,
            closed: AtomicBool::new(false),
        })
    }

    /// Fully tears down `session`, then opens a fresh one for the same
    /// request, optionally with different capture preferences ("change
    /// narration style"). Never a resume.
    pub async fn restart(
        &self,
        session: GuideSession,
        prefs_override: Option<CapturePrefs>,
        events: Arc<dyn GuideEvents>,
    ) -> Result<GuideSession, StreamError> {
        session.close().await;
        let mut request = session.request.clone();
        if let Some(prefs_override) = prefs_override {
            if let GuideRequest::Init { prefs, .. } = &mut request {
                *prefs = prefs_override;
            }
        }
        self.open(request, events).await
    }
}
