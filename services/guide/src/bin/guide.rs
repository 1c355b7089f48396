//! services/guide/src/bin/guide.rs
//!
//! Command-line composition root: opens one guide streaming session against
//! the configured backend and plays it through the default audio output,
//! printing transcript deltas as they arrive.
//!
//! Usage: `guide replay <guide-id> [from-ms]` or `guide init <image-path>`.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use guide_lib::{
    adapters::{FsDeviceIdentity, FsSegmentStore, RodioAudioEngine},
    config::StreamConfig,
    error::StreamError,
    stream::{GuideEvents, StreamOrchestrator},
};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tour_guide_core::domain::{CapturePrefs, GuideMeta, GuideRequest, SessionSummary};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Prints session events to the terminal and signals `done` once both the
/// stream and its audio have ended.
#[derive(Default)]
struct ConsoleEvents {
    done: Notify,
    completed: AtomicBool,
    playing: AtomicBool,
}

impl ConsoleEvents {
    fn maybe_finish(&self) {
        if self.completed.load(Ordering::SeqCst) && !self.playing.load(Ordering::SeqCst) {
            self.done.notify_one();
        }
    }
}

#[async_trait]
impl GuideEvents for ConsoleEvents {
    async fn on_meta(&self, meta: GuideMeta) {
        info!("guide: {} (confidence {:.2})", meta.title, meta.confidence);
    }

    async fn on_text(&self, delta: String) {
        print!("{}", delta);
        let _ = std::io::stdout().flush();
    }

    async fn on_playback_started(&self) {
        self.playing.store(true, Ordering::SeqCst);
        info!("audio playing");
    }

    async fn on_playback_stopped(&self) {
        self.playing.store(false, Ordering::SeqCst);
        info!("audio idle");
        self.maybe_finish();
    }

    async fn on_complete(&self, summary: SessionSummary) {
        println!();
        info!(
            "guide {} complete: {} transcript chars",
            summary.guide_id,
            summary.transcript.len()
        );
        self.completed.store(true, Ordering::SeqCst);
        self.maybe_finish();
    }

    async fn on_error(&self, message: String) {
        error!("session failed: {}", message);
        self.completed.store(true, Ordering::SeqCst);
        self.playing.store(false, Ordering::SeqCst);
        self.done.notify_one();
    }

    async fn on_audio_error(&self, message: String) {
        warn!("audio: {}", message);
    }
}

fn parse_request() -> Result<GuideRequest, StreamError> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("replay") if args.len() >= 2 => {
            let from_ms = match args.get(2) {
                Some(raw) => raw
                    .parse::<u64>()
                    .map_err(|e| StreamError::Internal(format!("bad from-ms '{}': {}", raw, e)))?,
                None => 0,
            };
            Ok(GuideRequest::Replay {
                guide_id: args[1].clone(),
                from_ms,
            })
        }
        Some("init") if args.len() >= 2 => {
            let bytes = std::fs::read(&args[1])?;
            Ok(GuideRequest::Init {
                image_base64: BASE64.encode(bytes),
                image_url: None,
                identify_id: None,
                geo: None,
                prefs: CapturePrefs::default(),
            })
        }
        _ => Err(StreamError::Internal(
            "usage: guide replay <guide-id> [from-ms] | guide init <image-path>".to_string(),
        )),
    }
}

#[tokio::main]
async fn main() -> Result<(), StreamError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(StreamConfig::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- 2. Parse the Request ---
    let request = parse_request()?;

    // --- 3. Initialize Service Adapters ---
    let store = Arc::new(FsSegmentStore::new(config.segment_dir.clone())?);
    let engine = Arc::new(RodioAudioEngine::new()?);
    let identity = Arc::new(FsDeviceIdentity::new(config.device_id_path.clone()));

    // --- 4. Open the Session ---
    info!("connecting to {}", config.ws_url);
    let orchestrator = StreamOrchestrator::new(config, store, engine, identity);
    let events = Arc::new(ConsoleEvents::default());
    let session = orchestrator.open(request, events.clone()).await?;

    // --- 5. Wait for Completion or Interrupt ---
    tokio::select! {
        _ = events.done.notified() => {}
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
    }
    session.close().await;

    Ok(())
}
