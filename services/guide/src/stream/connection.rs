//! services/guide/src/stream/connection.rs
//!
//! Owns one logical websocket connection to the narration backend:
//! connect/reconnect, keepalive, frame parsing, and dispatch of typed
//! events to the injected handler in arrival order.

use crate::config::StreamConfig;
use crate::stream::protocol::{decode_binary_frame, AudioFrameHeader, InboundMessage, OutboundMessage};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tour_guide_core::domain::{ConnectionState, GuideMeta};
use tracing::{debug, info, trace, warn};

/// Errors surfaced through [`ConnectionEvents::on_error`]. Transport errors
/// are recoverable noise (the state machine handles them); server-reported
/// errors are fatal to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionError {
    Transport(String),
    Server {
        code: Option<String>,
        message: String,
    },
}

impl std::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionError::Transport(message) => write!(f, "{}", message),
            ConnectionError::Server { code: Some(code), message } => {
                write!(f, "{}: {}", code, message)
            }
            ConnectionError::Server { code: None, message } => write!(f, "{}", message),
        }
    }
}

/// The full set of events a `ConnectionClient` can deliver. One
/// implementation per consumer, injected at construction, so an incomplete
/// handler cannot silently ignore events.
///
/// Events are dispatched in frame arrival order; each callback is awaited
/// before the next inbound frame is read.
#[async_trait]
pub trait ConnectionEvents: Send + Sync {
    async fn on_connection_state_change(&self, state: ConnectionState);
    async fn on_meta(&self, meta: GuideMeta);
    async fn on_text(&self, delta: String);
    async fn on_audio_json(&self, seq: u64, bytes_base64: String);
    async fn on_audio_binary(&self, header: AudioFrameHeader, payload: Bytes);
    async fn on_complete(&self, guide_id: String);
    async fn on_error(&self, error: ConnectionError);
    async fn on_pong(&self, ts: i64);
}

struct Inner {
    state: ConnectionState,
    attempts: u32,
    outbound: Option<mpsc::UnboundedSender<OutboundMessage>>,
    cancel: CancellationToken,
    reconnect_pending: bool,
    user_closed: bool,
}

/// One logical streaming connection. There is exactly one live transport
/// per instance at a time; reconnection after an unclean close is bounded
/// by the configured attempt budget.
pub struct ConnectionClient {
    config: Arc<StreamConfig>,
    handler: Arc<dyn ConnectionEvents>,
    inner: Mutex<Inner>,
    /// Bumped on every explicit `disconnect()`. Timer and transport tasks
    /// capture the value they were spawned under and stop acting once it
    /// moves on, so nothing from a previous session can fire after teardown.
    generation: AtomicU64,
}

impl ConnectionClient {
    pub fn new(config: Arc<StreamConfig>, handler: Arc<dyn ConnectionEvents>) -> Self {
        Self {
            config,
            handler,
            inner: Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                attempts: 0,
                outbound: None,
                cancel: CancellationToken::new(),
                reconnect_pending: false,
                user_closed: false,
            }),
            generation: AtomicU64::new(0),
        }
    }

    /// Opens a new transport unless one is already live. Idempotent.
    pub async fn connect(self: &Arc<Self>) {
        let (generation, cancel) = {
            let mut inner = self.inner.lock().await;
            if matches!(
                inner.state,
                ConnectionState::Connecting | ConnectionState::Connected
            ) {
                trace!("connect ignored; transport already live");
                return;
            }
            inner.state = ConnectionState::Connecting;
            inner.user_closed = false;
            inner.reconnect_pending = false;
            inner.cancel = CancellationToken::new();
            (self.generation.load(Ordering::SeqCst), inner.cancel.clone())
        };
        self.handler
            .on_connection_state_change(ConnectionState::Connecting)
            .await;

        let client = Arc::clone(self);
        tokio::spawn(async move {
            client.run_transport(generation, cancel).await;
        });
    }

    /// Hands a message to the live transport. Only effective while
    /// connected; silently dropped otherwise.
    pub async fn send(&self, message: OutboundMessage) {
        let inner = self.inner.lock().await;
        if inner.state != ConnectionState::Connected {
            trace!("dropping outbound message while not connected");
            return;
        }
        if let Some(outbound) = &inner.outbound {
            let _ = outbound.send(message);
        }
    }

    /// Cancels every pending timer, closes the transport if open, and
    /// transitions to `Disconnected`. Suppresses any pending reconnect.
    pub async fn disconnect(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        {
            let mut inner = self.inner.lock().await;
            inner.user_closed = true;
            inner.reconnect_pending = false;
            inner.outbound = None;
            inner.cancel.cancel();
        }
        self.set_state(ConnectionState::Disconnected).await;
    }

    pub async fn state(&self) -> ConnectionState {
        self.inner.lock().await.state
    }

    /// Reconnection attempts consumed since the last successful open.
    pub async fn reconnect_attempts(&self) -> u32 {
        self.inner.lock().await.attempts
    }

    /// True while a reconnect is scheduled. Set before the `Disconnected`
    /// transition is announced, so state-change observers can tell a
    /// retrying drop from a final one.
    pub async fn reconnect_pending(&self) -> bool {
        self.inner.lock().await.reconnect_pending
    }

    /// True once the owner has called `disconnect()`.
    pub async fn user_closed(&self) -> bool {
        self.inner.lock().await.user_closed
    }

    fn is_stale(&self, generation: u64, cancel: &CancellationToken) -> bool {
        self.generation.load(Ordering::SeqCst) != generation || cancel.is_cancelled()
    }

    async fn set_state(&self, next: ConnectionState) {
        let changed = {
            let mut inner = self.inner.lock().await;
            if inner.state == next {
                false
            } else {
                inner.state = next;
                true
            }
        };
        if changed {
            self.handler.on_connection_state_change(next).await;
        }
    }

    async fn run_transport(self: Arc<Self>, generation: u64, cancel: CancellationToken) {
        debug!("opening websocket to {}", self.config.ws_url);
        let stream = tokio::select! {
            _ = cancel.cancelled() => return,
            result = connect_async(self.config.ws_url.as_str()) => match result {
                Ok((stream, _response)) => stream,
                Err(e) => {
                    if self.is_stale(generation, &cancel) {
                        return;
                    }
                    warn!("websocket connect failed: {}", e);
                    self.set_state(ConnectionState::Errored).await;
                    self.handler
                        .on_error(ConnectionError::Transport(format!(
                            "Failed to open WebSocket: {}",
                            e
                        )))
                        .await;
                    // A failed open behaves like an unclean close and is
                    // retried within the same attempt budget.
                    self.finish_disconnected(true, generation, &cancel).await;
                    return;
                }
            },
        };

        if self.is_stale(generation, &cancel) {
            return;
        }

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<OutboundMessage>();
        {
            let mut inner = self.inner.lock().await;
            inner.attempts = 0;
            inner.outbound = Some(outbound_tx);
            inner.reconnect_pending = false;
        }
        info!("websocket connected to {}", self.config.ws_url);
        self.set_state(ConnectionState::Connected).await;

        let (mut sink, mut stream) = stream.split();
        let mut keepalive = tokio::time::interval(self.config.ping_interval);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it.
        keepalive.tick().await;

        let clean = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    break true;
                }
                Some(message) = outbound_rx.recv() => {
                    match serde_json::to_string(&message) {
                        Ok(json) => {
                            trace!("send frame: {} bytes", json.len());
                            if let Err(e) = sink.send(Message::Text(json.into())).await {
                                warn!("websocket send failed: {}", e);
                                self.handler
                                    .on_error(ConnectionError::Transport(format!(
                                        "Failed to send WS message: {}",
                                        e
                                    )))
                                    .await;
                            }
                        }
                        Err(e) => warn!("failed to encode outbound message: {}", e),
                    }
                }
                _ = keepalive.tick() => {
                    debug!("send ping");
                    if let Ok(json) = serde_json::to_string(&OutboundMessage::Ping) {
                        // A send failure here surfaces on the stream side as
                        // an error or close; nothing more to do.
                        let _ = sink.send(Message::Text(json.into())).await;
                    }
                }
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.dispatch_text(text.as_str()).await,
                    Some(Ok(Message::Binary(data))) => self.dispatch_binary(Bytes::from(data)).await,
                    Some(Ok(Message::Close(frame))) => {
                        debug!("websocket closed by server: {:?}", frame);
                        break true;
                    }
                    Some(Ok(_)) => {} // transport-level ping/pong frames
                    Some(Err(e)) => {
                        warn!("websocket error: {}", e);
                        self.handler
                            .on_error(ConnectionError::Transport(format!(
                                "WebSocket error: {}",
                                e
                            )))
                            .await;
                        break false;
                    }
                    None => {
                        debug!("websocket stream ended");
                        break false;
                    }
                }
            }
        };

        self.finish_disconnected(!clean, generation, &cancel).await;
    }

    /// Tears down transport bookkeeping and, after an unclean close within
    /// the attempt budget, schedules a single reconnect. The reconnect
    /// decision is recorded before the `Disconnected` transition is
    /// announced so observers can query it from the callback.
    async fn finish_disconnected(
        self: &Arc<Self>,
        unclean: bool,
        generation: u64,
        cancel: &CancellationToken,
    ) {
        let will_retry = {
            let mut inner = self.inner.lock().await;
            inner.outbound = None;
            let retry = unclean
                && !cancel.is_cancelled()
                && inner.attempts < self.config.max_reconnect_attempts;
            if retry {
                inner.attempts += 1;
            }
            inner.reconnect_pending = retry;
            retry
        };

        if self.generation.load(Ordering::SeqCst) != generation {
            // An explicit disconnect already reported the state change.
            return;
        }
        self.set_state(ConnectionState::Disconnected).await;

        if will_retry {
            let client = Arc::clone(self);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(client.config.reconnect_interval) => {}
                }
                if client.generation.load(Ordering::SeqCst) != generation {
                    return;
                }
                {
                    let mut inner = client.inner.lock().await;
                    inner.reconnect_pending = false;
                }
                client.connect().await;
            });
        } else if unclean {
            debug!("reconnect budget exhausted; staying disconnected");
        }
    }

    async fn dispatch_text(&self, text: &str) {
        let message: InboundMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                // Malformed frames are recovered locally; the connection
                // stays up.
                warn!("failed to parse server message: {}", e);
                return;
            }
        };
        match message {
            InboundMessage::Meta(meta) => {
                debug!("recv meta guideId={} title={}", meta.guide_id, meta.title);
                self.handler.on_meta(meta).await;
            }
            InboundMessage::Text { delta } => {
                trace!("recv text delta of {} chars", delta.len());
                self.handler.on_text(delta).await;
            }
            InboundMessage::Audio { seq, bytes } => {
                debug!("recv audio (json) seq={}", seq);
                self.handler.on_audio_json(seq, bytes).await;
            }
            InboundMessage::Eos { guide_id, .. } => {
                debug!("recv eos guideId={}", guide_id);
                self.handler.on_complete(guide_id).await;
            }
            InboundMessage::Pong { ts } => {
                trace!("recv pong ts={}", ts);
                self.handler.on_pong(ts).await;
            }
            InboundMessage::Err { code, msg, message } => {
                let text = InboundMessage::error_text(&msg, &message);
                warn!("recv server error: {}", text);
                self.handler
                    .on_error(ConnectionError::Server {
                        code,
                        message: text,
                    })
                    .await;
            }
            InboundMessage::Unknown => warn!("unknown message type: {}", text),
        }
    }

    async fn dispatch_binary(&self, frame: Bytes) {
        match decode_binary_frame(&frame) {
            Ok((header, payload)) => {
                debug!(
                    "recv audio (binary) seq={} bytes={}",
                    header.seq,
                    payload.len()
                );
                self.handler.on_audio_binary(header, payload).await;
            }
            Err(e) => warn!("dropping invalid binary frame: {}", e),
        }
    }
}
