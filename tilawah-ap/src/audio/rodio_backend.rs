//! Rodio-based audio backend
//!
//! The `OutputStream` is not `Send`, so a dedicated thread owns it and
//! hands freshly-connected sinks back over a channel. Sinks themselves are
//! `Send + Sync`, so all further control happens from async context.
//!
//! Remote sources play through `stream-download`, which buffers the HTTP
//! stream to temporary storage so rodio can decode and seek while bytes are
//! still arriving. The cache manager's own download of the same resource
//! runs independently; neither depends on the other.

use super::{AudioBackend, AudioEvent, AudioHandle, LoadOptions, LoadedAudio};
use crate::cache::PlaybackSource;
use crate::error::{Error, Result};
use async_trait::async_trait;
use rodio::{Decoder, OutputStreamBuilder, Sink, Source};
use std::fs::File;
use std::io::BufReader;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stream_download::storage::temp::TempStorageProvider;
use stream_download::{Settings, StreamDownload};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Request for a new sink, served by the audio thread
struct SinkRequest {
    reply: oneshot::Sender<Sink>,
}

/// Audio backend producing rodio sinks on a shared output stream
pub struct RodioBackend {
    requests: std::sync::mpsc::Sender<SinkRequest>,
}

impl RodioBackend {
    /// Open the default output device on a dedicated thread
    pub fn new() -> Result<Self> {
        let (requests, request_rx) = std::sync::mpsc::channel::<SinkRequest>();
        let (init_tx, init_rx) = std::sync::mpsc::channel::<std::result::Result<(), String>>();

        std::thread::Builder::new()
            .name("tilawah-audio".into())
            .spawn(move || {
                let stream = match OutputStreamBuilder::open_default_stream() {
                    Ok(stream) => {
                        let _ = init_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = init_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                // The thread lives as long as the backend; dropping the
                // request sender ends the loop and releases the stream.
                while let Ok(request) = request_rx.recv() {
                    let sink = Sink::connect_new(stream.mixer());
                    sink.pause();
                    let _ = request.reply.send(sink);
                }
                debug!("Audio output thread exiting");
            })
            .map_err(|e| Error::Audio(format!("failed to spawn audio thread: {e}")))?;

        init_rx
            .recv()
            .map_err(|_| Error::Audio("audio thread died during init".into()))?
            .map_err(|e| Error::Audio(format!("failed to open output device: {e}")))?;

        Ok(Self { requests })
    }

    async fn new_sink(&self) -> Result<Sink> {
        let (reply, reply_rx) = oneshot::channel();
        self.requests
            .send(SinkRequest { reply })
            .map_err(|_| Error::Audio("audio thread unavailable".into()))?;
        reply_rx
            .await
            .map_err(|_| Error::Audio("audio thread unavailable".into()))
    }
}

fn decode_file(path: &std::path::Path) -> Result<Decoder<BufReader<File>>> {
    let file = File::open(path)?;
    Decoder::new(BufReader::new(file)).map_err(|e| Error::Audio(format!("decode failed: {e}")))
}

#[async_trait]
impl AudioBackend for RodioBackend {
    async fn load(&self, source: PlaybackSource, opts: LoadOptions) -> Result<LoadedAudio> {
        let sink = self.new_sink().await?;
        sink.set_speed(opts.speed);

        let duration = match &source {
            PlaybackSource::Local(path) => {
                let path = path.clone();
                let decoder =
                    tokio::task::spawn_blocking(move || decode_file(&path))
                        .await
                        .map_err(|e| Error::Internal(e.to_string()))??;
                let duration = decoder.total_duration();
                sink.append(decoder);
                duration
            }
            PlaybackSource::Remote(url) => {
                let parsed = url
                    .parse()
                    .map_err(|e| Error::Download(format!("invalid URL {url}: {e}")))?;
                let reader = StreamDownload::new_http(
                    parsed,
                    TempStorageProvider::new(),
                    Settings::default(),
                )
                .await
                .map_err(|e| Error::Download(e.to_string()))?;
                let decoder = tokio::task::spawn_blocking(move || {
                    Decoder::new(reader)
                        .map_err(|e| Error::Audio(format!("stream decode failed: {e}")))
                })
                .await
                .map_err(|e| Error::Internal(e.to_string()))??;
                let duration = decoder.total_duration();
                sink.append(decoder);
                duration
            }
        };

        let sink = Arc::new(sink);
        let stopped = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel(64);

        // Poll the sink at the configured interval and translate its state
        // into the event stream the engines consume.
        let poll_sink = Arc::clone(&sink);
        let poll_stopped = Arc::clone(&stopped);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(opts.update_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut finished_sent = false;
            let mut last_position = None;
            let mut buffering = false;
            loop {
                ticker.tick().await;
                if poll_stopped.load(Ordering::Acquire) {
                    break;
                }
                if poll_sink.empty() {
                    if !finished_sent {
                        finished_sent = true;
                        if tx.send(AudioEvent::Finished).await.is_err() {
                            break;
                        }
                    }
                    continue;
                }
                finished_sent = false;
                if poll_sink.is_paused() {
                    continue;
                }
                let position = poll_sink.get_pos();
                if last_position == Some(position) {
                    // No new frames since the last tick while unpaused: the
                    // decoder is starved of source data
                    if !buffering {
                        buffering = true;
                        if tx.send(AudioEvent::Buffering(true)).await.is_err() {
                            break;
                        }
                    }
                    continue;
                }
                if buffering {
                    buffering = false;
                    if tx.send(AudioEvent::Buffering(false)).await.is_err() {
                        break;
                    }
                }
                last_position = Some(position);
                if tx.send(AudioEvent::Position(position)).await.is_err() {
                    break;
                }
            }
        });

        Ok(LoadedAudio {
            handle: Box::new(RodioHandle {
                sink,
                stopped,
                source,
                duration,
            }),
            events: rx,
        })
    }
}

struct RodioHandle {
    sink: Arc<Sink>,
    stopped: Arc<AtomicBool>,
    /// Kept to re-append a drained local source on replay
    source: PlaybackSource,
    duration: Option<Duration>,
}

impl AudioHandle for RodioHandle {
    fn play(&self) {
        self.sink.play();
    }

    fn pause(&self) {
        self.sink.pause();
    }

    fn try_seek(&self, position: Duration) -> Result<()> {
        if self.sink.empty() {
            // The source drained at natural completion; only a local file
            // can be re-opened for replay.
            match &self.source {
                PlaybackSource::Local(path) => {
                    let decoder = decode_file(path)?;
                    self.sink.append(decoder);
                }
                PlaybackSource::Remote(url) => {
                    warn!(url, "Cannot replay a drained streamed source");
                    return Err(Error::Audio("streamed source cannot be replayed".into()));
                }
            }
        }
        self.sink
            .try_seek(position)
            .map_err(|e| Error::Audio(format!("seek failed: {e}")))
    }

    fn set_speed(&self, speed: f32) {
        self.sink.set_speed(speed);
    }

    fn position(&self) -> Duration {
        self.sink.get_pos()
    }

    fn duration(&self) -> Option<Duration> {
        self.duration
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.sink.stop();
    }
}

impl Drop for RodioHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
