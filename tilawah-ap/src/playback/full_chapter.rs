//! Full-chapter playback engine ("Method A")
//!
//! Loads one audio resource per chapter, seeks into a verse's timestamp
//! window and detects the verse boundary from asynchronous position
//! updates.
//!
//! The underlying position updates cannot be cancelled mid-flight, so a
//! superseded segment's detection may still arrive after the user has
//! skipped on. Each armed segment therefore carries a monotonically
//! increasing boundary token; a detection only acts if its token still
//! matches the active segment at resolution time. Correctness comes from
//! comparison, not cancellation.
//!
//! This engine never auto-advances: at a segment end it pauses, snaps the
//! position exactly to the segment end so the next verse's audio never
//! bleeds through, and signals completion to the caller.

use crate::audio::{AudioBackend, AudioEvent, AudioHandle, LoadOptions, LoadedAudio};
use crate::cache::AudioCache;
use crate::error::{Error, Result};
use crate::playback::{StatusHub, VerseEngine};
use crate::segments::VerseSegment;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tilawah_common::events::{PlayerEvent, RepeatMode};
use tilawah_common::quran::VerseRef;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, warn};

fn ms(d: Duration) -> u64 {
    d.as_millis() as u64
}

/// Identity of the currently loaded chapter resource
#[derive(Debug, Clone, PartialEq, Eq)]
struct LoadedChapter {
    reciter: String,
    chapter: u16,
}

/// The armed segment the boundary detector is watching
struct ActiveSegment {
    verse: VerseRef,
    start: Duration,
    end: Duration,
    /// Boundary token: compared at resolution time to reject stale
    /// detections from superseded segments
    token: u64,
    /// Latched once this token's boundary has been handled
    handled: bool,
}

struct Inner {
    loaded: Option<LoadedChapter>,
    handle: Option<Box<dyn AudioHandle>>,
    active: Option<ActiveSegment>,
    /// Bumped on every load/unload; event pumps from older loads observe
    /// the mismatch and exit
    load_gen: u64,
}

/// Full-chapter engine state machine:
/// `NotLoaded -> Loading -> Loaded -> Playing/Paused -> (boundary) -> ... -> Unloaded`
pub struct FullChapterEngine {
    backend: Arc<dyn AudioBackend>,
    cache: Arc<AudioCache>,
    hub: Arc<StatusHub>,
    repeat: Arc<RwLock<RepeatMode>>,
    update_interval: Duration,
    tolerance: Duration,
    inner: Arc<Mutex<Inner>>,
    token_seq: Arc<AtomicU64>,
}

impl FullChapterEngine {
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        cache: Arc<AudioCache>,
        hub: Arc<StatusHub>,
        repeat: Arc<RwLock<RepeatMode>>,
        update_interval: Duration,
        tolerance: Duration,
    ) -> Self {
        Self {
            backend,
            cache,
            hub,
            repeat,
            update_interval,
            tolerance,
            inner: Arc::new(Mutex::new(Inner {
                loaded: None,
                handle: None,
                active: None,
                load_gen: 0,
            })),
            token_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Load the chapter resource unless it is already loaded
    ///
    /// A repeated call with the same (reciter, chapter) is a no-op and
    /// triggers no second load or download. Otherwise the current resource
    /// is released, `is_loading` is emitted, and the source is resolved
    /// through the cache (local file if present, else streaming URL).
    pub async fn ensure_chapter_loaded(
        &self,
        reciter: &str,
        chapter: u16,
        url: &str,
        speed: f32,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let wanted = LoadedChapter {
            reciter: reciter.to_string(),
            chapter,
        };
        if inner.loaded.as_ref() == Some(&wanted) && inner.handle.is_some() {
            debug!(reciter, chapter, "Chapter already loaded");
            return Ok(());
        }

        if let Some(old) = inner.handle.take() {
            old.stop();
        }
        inner.loaded = None;
        inner.active = None;
        inner.load_gen += 1;
        let gen = inner.load_gen;

        self.hub.update(|s| {
            s.is_loading = true;
            s.error = None;
        });

        let local = self.cache.chapter_path(reciter, chapter);
        let source = self.cache.resolve(url, &local).await;
        let loaded = match self
            .backend
            .load(
                source,
                LoadOptions {
                    speed,
                    update_interval: self.update_interval,
                },
            )
            .await
        {
            Ok(loaded) => loaded,
            Err(e) => {
                self.hub.update(|s| s.is_loading = false);
                return Err(e);
            }
        };

        let LoadedAudio { handle, events } = loaded;
        self.hub.update(|s| {
            s.is_loading = false;
            s.is_buffering = false;
            s.duration_ms = handle.duration().map(ms);
        });
        inner.loaded = Some(wanted);
        inner.handle = Some(handle);
        drop(inner);

        self.spawn_pump(events, gen);
        Ok(())
    }

    /// Arm a segment under a fresh boundary token, seek to its start and play
    pub async fn start_segment(&self, verse: VerseRef, segment: &VerseSegment) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let reciter = inner
            .loaded
            .as_ref()
            .map(|l| l.reciter.clone())
            .ok_or_else(|| Error::InvalidState("no chapter loaded".into()))?;
        if inner.handle.is_none() {
            return Err(Error::InvalidState("no chapter loaded".into()));
        }

        let token = self.token_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let start = segment.start();
        inner.active = Some(ActiveSegment {
            verse,
            start,
            end: segment.end(),
            token,
            handled: false,
        });
        let handle = inner
            .handle
            .as_ref()
            .ok_or_else(|| Error::InvalidState("no chapter loaded".into()))?;
        handle.try_seek(start)?;
        handle.play();
        drop(inner);

        self.hub.update(|s| {
            s.is_playing = true;
            s.position_ms = ms(start);
            s.error = None;
        });
        self.hub.emit(PlayerEvent::VerseStarted {
            reciter,
            verse,
            timestamp: chrono::Utc::now(),
        });
        Ok(())
    }

    /// The (reciter, chapter) currently loaded, if any
    pub async fn loaded_chapter(&self) -> Option<(String, u16)> {
        let inner = self.inner.lock().await;
        inner.loaded.as_ref().map(|l| (l.reciter.clone(), l.chapter))
    }

    fn spawn_pump(&self, mut events: mpsc::Receiver<AudioEvent>, gen: u64) {
        let engine = self.clone_refs();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    AudioEvent::Position(position) => {
                        if !engine.on_position(position, gen).await {
                            break;
                        }
                    }
                    AudioEvent::Finished => {
                        engine.on_finished(gen).await;
                    }
                    AudioEvent::Buffering(stalled) => {
                        engine.hub.update(|s| s.is_buffering = stalled);
                    }
                    AudioEvent::Error(message) => {
                        warn!(message, "Audio backend error");
                        engine.hub.error(message);
                    }
                }
            }
        });
    }

    fn clone_refs(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            cache: Arc::clone(&self.cache),
            hub: Arc::clone(&self.hub),
            repeat: Arc::clone(&self.repeat),
            update_interval: self.update_interval,
            tolerance: self.tolerance,
            inner: Arc::clone(&self.inner),
            token_seq: Arc::clone(&self.token_seq),
        }
    }

    /// Handle one position update. Returns false when this pump belongs to
    /// a superseded load and must exit.
    async fn on_position(&self, position: Duration, gen: u64) -> bool {
        let detected = {
            let mut inner = self.inner.lock().await;
            if inner.load_gen != gen {
                return false;
            }
            self.hub.update(|s| s.position_ms = ms(position));

            match inner.active.as_mut() {
                Some(active) if !active.handled && position + self.tolerance >= active.end => {
                    // Mark handled under the lock so a queued update for the
                    // same segment cannot double-fire
                    active.handled = true;
                    Some(active.token)
                }
                _ => None,
            }
        };

        if let Some(token) = detected {
            self.handle_segment_end(token, gen).await;
        }
        true
    }

    /// Natural end of the chapter resource: the last armed segment is
    /// complete even if its end offset lies past the audio's actual end
    async fn on_finished(&self, gen: u64) {
        let detected = {
            let mut inner = self.inner.lock().await;
            if inner.load_gen != gen {
                return;
            }
            match inner.active.as_mut() {
                Some(active) if !active.handled => {
                    active.handled = true;
                    Some(active.token)
                }
                _ => None,
            }
        };
        if let Some(token) = detected {
            self.handle_segment_end(token, gen).await;
        }
    }

    /// Resolve a boundary detection for `token`
    ///
    /// The token is re-compared against the active segment here: if the
    /// user skipped on and a newer segment is armed, this detection is
    /// stale and must be ignored.
    async fn handle_segment_end(&self, token: u64, gen: u64) {
        let repeat = *self.repeat.read().await;
        let completed = {
            let mut inner = self.inner.lock().await;
            if inner.load_gen != gen {
                return;
            }
            let Some(active) = inner.active.as_mut() else {
                return;
            };
            if active.token != token {
                debug!(token, current = active.token, "Ignoring stale boundary detection");
                return;
            }

            if repeat == RepeatMode::Verse {
                // Re-arm the same segment under a fresh token and restart
                let fresh = self.token_seq.fetch_add(1, Ordering::SeqCst) + 1;
                active.token = fresh;
                active.handled = false;
                let start = active.start;
                if let Some(handle) = inner.handle.as_ref() {
                    if let Err(e) = handle.try_seek(start) {
                        warn!(error = %e, "Repeat restart seek failed");
                    }
                    handle.play();
                }
                self.hub.update(|s| {
                    s.is_playing = true;
                    s.position_ms = ms(start);
                });
                None
            } else {
                let end = active.end;
                let verse = active.verse;
                if let Some(handle) = inner.handle.as_ref() {
                    handle.pause();
                    // Snap exactly to the segment end so the next verse's
                    // audio never bleeds through
                    if let Err(e) = handle.try_seek(end) {
                        warn!(error = %e, "Boundary snap seek failed");
                    }
                }
                self.hub.update(|s| {
                    s.is_playing = false;
                    s.position_ms = ms(end);
                });
                inner
                    .loaded
                    .as_ref()
                    .map(|l| (l.reciter.clone(), verse))
            }
        };

        if let Some((reciter, verse)) = completed {
            self.hub.emit(PlayerEvent::VerseCompleted {
                reciter,
                verse,
                timestamp: chrono::Utc::now(),
            });
        }
    }
}

#[async_trait]
impl VerseEngine for FullChapterEngine {
    async fn pause(&self) {
        let inner = self.inner.lock().await;
        if let Some(handle) = inner.handle.as_ref() {
            handle.pause();
            self.hub.update(|s| s.is_playing = false);
        }
    }

    async fn resume(&self) {
        let inner = self.inner.lock().await;
        if let Some(handle) = inner.handle.as_ref() {
            handle.play();
            self.hub.update(|s| s.is_playing = true);
        }
    }

    async fn seek(&self, position: Duration) {
        let inner = self.inner.lock().await;
        if let Some(handle) = inner.handle.as_ref() {
            if let Err(e) = handle.try_seek(position) {
                warn!(error = %e, "Seek failed");
                return;
            }
            self.hub.update(|s| s.position_ms = ms(position));
        }
    }

    async fn set_speed(&self, speed: f32) {
        let inner = self.inner.lock().await;
        if let Some(handle) = inner.handle.as_ref() {
            handle.set_speed(speed);
        }
    }

    async fn position(&self) -> Option<(Duration, Option<Duration>)> {
        let inner = self.inner.lock().await;
        inner
            .handle
            .as_ref()
            .map(|h| (h.position(), h.duration()))
    }

    async fn unload(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(handle) = inner.handle.take() {
            handle.stop();
        }
        inner.loaded = None;
        inner.active = None;
        inner.load_gen += 1;
    }
}
