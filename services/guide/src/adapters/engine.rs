//! services/guide/src/adapters/engine.rs
//!
//! Rodio implementation of the `AudioEngine` port. The rodio output stream
//! is not `Send`, so a dedicated playback thread owns it for the adapter's
//! whole lifetime; the async side talks to it over a command channel and
//! receives acks through oneshots.

use async_trait::async_trait;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use rodio::{Decoder, OutputStream, Sink};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tour_guide_core::ports::{AudioEngine, EngineStatus, PortError, PortResult, SegmentHandle};
use tracing::{debug, warn};

/// How often the playback thread checks whether the sink has drained.
const DRAIN_POLL: Duration = Duration::from_millis(50);

enum EngineCommand {
    CreateFrom(PathBuf, oneshot::Sender<PortResult<()>>),
    Replace(PathBuf, oneshot::Sender<PortResult<()>>),
    Play(oneshot::Sender<PortResult<()>>),
    Release(oneshot::Sender<PortResult<()>>),
}

type StatusSlot = Arc<StdMutex<Option<mpsc::UnboundedSender<EngineStatus>>>>;

/// An adapter that plays segment files through the default rodio output.
pub struct RodioAudioEngine {
    commands: Sender<EngineCommand>,
    status: StatusSlot,
}

impl RodioAudioEngine {
    pub fn new() -> PortResult<Self> {
        let (commands, command_rx) = crossbeam_channel::unbounded();
        let status: StatusSlot = Arc::new(StdMutex::new(None));
        let thread_status = status.clone();
        std::thread::Builder::new()
            .name("guide-audio".to_string())
            .spawn(move || playback_thread(command_rx, thread_status))
            .map_err(|e| PortError::Unavailable(format!("spawn audio thread: {}", e)))?;
        Ok(Self { commands, status })
    }

    async fn request(
        &self,
        make: impl FnOnce(oneshot::Sender<PortResult<()>>) -> EngineCommand,
    ) -> PortResult<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.commands
            .send(make(ack_tx))
            .map_err(|_| PortError::Unavailable("audio thread stopped".to_string()))?;
        ack_rx
            .await
            .map_err(|_| PortError::Unavailable("audio thread stopped".to_string()))?
    }
}

#[async_trait]
impl AudioEngine for RodioAudioEngine {
    async fn create_from_source(&self, source: &SegmentHandle) -> PortResult<()> {
        let path = source.path().to_path_buf();
        self.request(|ack| EngineCommand::CreateFrom(path, ack)).await
    }

    async fn replace_source(&self, source: &SegmentHandle) -> PortResult<()> {
        let path = source.path().to_path_buf();
        self.request(|ack| EngineCommand::Replace(path, ack)).await
    }

    async fn play(&self) -> PortResult<()> {
        self.request(EngineCommand::Play).await
    }

    async fn release(&self) -> PortResult<()> {
        self.request(EngineCommand::Release).await
    }

    fn status_events(&self) -> mpsc::UnboundedReceiver<EngineStatus> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.status.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(tx);
        rx
    }
}

struct Output {
    // Dropping the stream kills the audio device handle; it must outlive
    // the sink even though nothing reads it directly.
    _stream: OutputStream,
    sink: Sink,
}

fn emit(status: &StatusSlot, event: EngineStatus) {
    let guard = status.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(tx) = guard.as_ref() {
        let _ = tx.send(event);
    }
}

fn ensure_output(output: &mut Option<Output>) -> PortResult<&mut Output> {
    if output.is_none() {
        let (stream, handle) = OutputStream::try_default()
            .map_err(|e| PortError::Unavailable(format!("open audio output: {}", e)))?;
        let sink = Sink::try_new(&handle)
            .map_err(|e| PortError::Unavailable(format!("create audio sink: {}", e)))?;
        sink.pause();
        *output = Some(Output {
            _stream: stream,
            sink,
        });
        debug!("audio output opened");
    }
    match output.as_mut() {
        Some(ready) => Ok(ready),
        None => Err(PortError::Unavailable("audio output unavailable".to_string())),
    }
}

fn load_source(output: &mut Option<Output>, path: &Path) -> PortResult<()> {
    let output = ensure_output(output)?;
    let file = File::open(path)
        .map_err(|e| PortError::Unexpected(format!("open {}: {}", path.display(), e)))?;
    let decoder = Decoder::new(BufReader::new(file))
        .map_err(|e| PortError::Unexpected(format!("decode {}: {}", path.display(), e)))?;
    // Clear anything still queued, park the sink, and stage the new source;
    // playback resumes on the next Play command.
    output.sink.stop();
    output.sink.pause();
    output.sink.append(decoder);
    Ok(())
}

fn playback_thread(commands: Receiver<EngineCommand>, status: StatusSlot) {
    let mut output: Option<Output> = None;
    let mut playing = false;

    loop {
        match commands.recv_timeout(DRAIN_POLL) {
            Ok(EngineCommand::CreateFrom(path, ack)) | Ok(EngineCommand::Replace(path, ack)) => {
                let result = load_source(&mut output, &path);
                if let Err(e) = &result {
                    warn!("failed to load audio source: {}", e);
                }
                playing = false;
                let _ = ack.send(result);
            }
            Ok(EngineCommand::Play(ack)) => {
                let result = match output.as_ref() {
                    Some(output) => {
                        output.sink.play();
                        playing = true;
                        emit(&status, EngineStatus::Started);
                        Ok(())
                    }
                    None => Err(PortError::Unavailable("no source loaded".to_string())),
                };
                let _ = ack.send(result);
            }
            Ok(EngineCommand::Release(ack)) => {
                output = None;
                playing = false;
                debug!("audio output released");
                let _ = ack.send(Ok(()));
            }
            Err(RecvTimeoutError::Timeout) => {
                if playing && output.as_ref().map_or(true, |o| o.sink.empty()) {
                    playing = false;
                    emit(&status, EngineStatus::Finished);
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}
