//! Playback session controller
//!
//! The public-facing orchestrator. Exactly one session is active per
//! process; callers issue commands sequentially and observe results through
//! the status subscription and the event bus.
//!
//! Strategy selection happens per call: if a manifest entry exists for the
//! current (reciter, chapter) and its segment map validates, the
//! full-chapter engine is attempted; any structural or resource failure
//! falls back transparently to the per-verse engine. Callers never observe
//! which engine served a request.

use crate::audio::AudioBackend;
use crate::cache::AudioCache;
use crate::config::PlayerConfig;
use crate::db::settings;
use crate::error::{Error, Result};
use crate::manifest::{Manifest, ManifestEntry, Reciters};
use crate::playback::full_chapter::FullChapterEngine;
use crate::playback::per_verse::PerVerseEngine;
use crate::playback::{EngineKind, StatusHub, VerseEngine};
use crate::segments::{SegmentStore, VerseSegment};
use sqlx::{Pool, Sqlite};
use std::sync::Arc;
use std::time::Duration;
use tilawah_common::events::{AudioStatus, PlaybackState, PlayerEvent, RepeatMode};
use tilawah_common::quran::VerseRef;
use tokio::sync::{broadcast, watch, RwLock};
use tracing::{debug, info, warn};

/// The single playback session
pub struct PlayerSession {
    config: PlayerConfig,
    manifest: Arc<Manifest>,
    segments: Arc<SegmentStore>,
    reciters: Arc<Reciters>,
    cache: Arc<AudioCache>,
    hub: Arc<StatusHub>,
    db: Pool<Sqlite>,
    repeat: Arc<RwLock<RepeatMode>>,
    speed: RwLock<f32>,
    reciter: RwLock<String>,
    full: FullChapterEngine,
    legacy: PerVerseEngine,
    active: RwLock<Option<EngineKind>>,
}

impl PlayerSession {
    /// Build the session: restore persisted settings, wire both engines to
    /// the backend, and kick off the eager prefetch of short chapters
    pub async fn new(
        config: PlayerConfig,
        manifest: Manifest,
        segments: SegmentStore,
        reciters: Reciters,
        backend: Arc<dyn AudioBackend>,
        db: Pool<Sqlite>,
    ) -> Result<Self> {
        config.validate()?;
        let cache = Arc::new(AudioCache::new(config.cache_dir())?);
        let hub = Arc::new(StatusHub::new(config.event_bus_capacity));

        let mut selected =
            settings::get_selected_reciter(&db, &config.default_reciter).await?;
        if !reciters.contains(&selected) {
            warn!(reciter = %selected, "Persisted reciter unknown, using default");
            selected = config.default_reciter.clone();
        }
        let speed = settings::get_playback_speed(&db).await?;
        let repeat = Arc::new(RwLock::new(settings::get_repeat_mode(&db).await?));

        let full = FullChapterEngine::new(
            Arc::clone(&backend),
            Arc::clone(&cache),
            Arc::clone(&hub),
            Arc::clone(&repeat),
            config.position_update_interval(),
            config.boundary_tolerance(),
        );
        let legacy = PerVerseEngine::new(
            backend,
            Arc::clone(&cache),
            Arc::clone(&hub),
            Arc::clone(&repeat),
            config.position_update_interval(),
        );

        let session = Self {
            config,
            manifest: Arc::new(manifest),
            segments: Arc::new(segments),
            reciters: Arc::new(reciters),
            cache,
            hub,
            db,
            repeat,
            speed: RwLock::new(speed),
            reciter: RwLock::new(selected.clone()),
            full,
            legacy,
            active: RwLock::new(None),
        };
        session.spawn_eager_prefetch(&selected);
        info!(reciter = %selected, "Playback session ready");
        Ok(session)
    }

    /// Play one verse, selecting a strategy for this call
    pub async fn play_verse(&self, chapter: u16, verse: u16) -> Result<()> {
        let verse_ref = VerseRef::new(chapter, verse);
        if !verse_ref.is_valid() {
            let e = Error::BadRequest(format!("no such verse {verse_ref}"));
            self.hub.error(e.to_string());
            return Err(e);
        }

        let reciter = self.reciter.read().await.clone();
        let profile = match self.reciters.get(&reciter) {
            Some(profile) => profile.clone(),
            None => {
                let e = Error::NotFound(format!("unknown reciter {reciter}"));
                self.hub.error(e.to_string());
                return Err(e);
            }
        };
        let speed = *self.speed.read().await;

        // Silence whatever is currently audible before resolving the new
        // source; a slow load must not leave the old verse playing over it
        if let Some(kind) = self.active_kind().await {
            self.engine(kind).pause().await;
        }

        if let Some((entry, segments)) =
            self.manifest
                .full_chapter_entry(&self.segments, &reciter, chapter)
        {
            let entry = entry.clone();
            let segment = segments.iter().find(|s| s.verse == verse).copied();
            match segment {
                Some(segment) => {
                    match self
                        .play_full_chapter(&entry, verse_ref, &segment, speed)
                        .await
                    {
                        Ok(()) => {
                            self.switch_active(EngineKind::FullChapter).await;
                            return Ok(());
                        }
                        Err(e) => {
                            // Transparent fallback; the caller never sees this
                            warn!(%verse_ref, error = %e, "Full-chapter playback failed, falling back");
                        }
                    }
                }
                None => {
                    debug!(%verse_ref, "Verse missing from segment map, falling back");
                }
            }
        }

        match self.legacy.play_verse(&profile, verse_ref, speed).await {
            Ok(()) => {
                self.switch_active(EngineKind::PerVerse).await;
                Ok(())
            }
            Err(e) => {
                self.hub.error(e.to_string());
                *self.active.write().await = None;
                Err(e)
            }
        }
    }

    async fn play_full_chapter(
        &self,
        entry: &ManifestEntry,
        verse_ref: VerseRef,
        segment: &VerseSegment,
        speed: f32,
    ) -> Result<()> {
        self.full
            .ensure_chapter_loaded(&entry.reciter, entry.chapter, &entry.resource_url, speed)
            .await?;
        self.full.start_segment(verse_ref, segment).await
    }

    /// Record the serving engine and release the other one
    ///
    /// Exactly one engine owns an audio resource at any time; unload on the
    /// idle engine is a no-op when it holds nothing.
    async fn switch_active(&self, kind: EngineKind) {
        match kind {
            EngineKind::FullChapter => self.legacy.unload().await,
            EngineKind::PerVerse => self.full.unload().await,
        }
        *self.active.write().await = Some(kind);
    }

    fn engine(&self, kind: EngineKind) -> &dyn VerseEngine {
        match kind {
            EngineKind::FullChapter => &self.full,
            EngineKind::PerVerse => &self.legacy,
        }
    }

    async fn active_kind(&self) -> Option<EngineKind> {
        *self.active.read().await
    }

    pub async fn pause(&self) {
        if let Some(kind) = self.active_kind().await {
            let old = self.current_state();
            self.engine(kind).pause().await;
            self.emit_state_change(old, PlaybackState::Paused);
        }
    }

    pub async fn resume(&self) {
        if let Some(kind) = self.active_kind().await {
            let old = self.current_state();
            self.engine(kind).resume().await;
            self.emit_state_change(old, PlaybackState::Playing);
        }
    }

    /// Stop playback and release all resources
    pub async fn stop(&self) {
        let old = self.current_state();
        self.unload().await;
        self.emit_state_change(old, PlaybackState::Stopped);
    }

    /// Seek to an absolute position, clamped to `[0, duration]`
    pub async fn seek(&self, position_ms: u64) {
        if let Some(kind) = self.active_kind().await {
            let engine = self.engine(kind);
            let target = match engine.position().await {
                Some((_, Some(duration))) => {
                    Duration::from_millis(position_ms).min(duration)
                }
                _ => Duration::from_millis(position_ms),
            };
            engine.seek(target).await;
        }
    }

    /// Seek backward by the fixed step, clamped at zero
    pub async fn seek_backward(&self) {
        if let Some(kind) = self.active_kind().await {
            if let Some((position, _)) = self.engine(kind).position().await {
                let step = Duration::from_millis(self.config.seek_step_ms);
                let target = position.saturating_sub(step);
                self.engine(kind).seek(target).await;
            }
        }
    }

    /// Seek forward by the fixed step, clamped at the duration
    pub async fn seek_forward(&self) {
        if let Some(kind) = self.active_kind().await {
            if let Some((position, duration)) = self.engine(kind).position().await {
                let step = Duration::from_millis(self.config.seek_step_ms);
                let mut target = position + step;
                if let Some(duration) = duration {
                    target = target.min(duration);
                }
                self.engine(kind).seek(target).await;
            }
        }
    }

    /// Switch the active reciter
    ///
    /// Persists the selection, discards the preloaded-next resource (it
    /// belonged to the old reciter) and unloads both engines. Does not
    /// auto-replay; the next `play_verse` goes through the full load path.
    pub async fn set_reciter(&self, id: &str) -> Result<()> {
        if !self.reciters.contains(id) {
            return Err(Error::NotFound(format!("unknown reciter {id}")));
        }
        let old = {
            let mut reciter = self.reciter.write().await;
            let old = reciter.clone();
            *reciter = id.to_string();
            old
        };
        settings::set_selected_reciter(&self.db, id).await?;

        self.legacy.clear_preload().await;
        self.unload().await;

        self.hub.emit(PlayerEvent::ReciterChanged {
            old_reciter: old,
            new_reciter: id.to_string(),
            timestamp: chrono::Utc::now(),
        });
        self.spawn_eager_prefetch(id);
        Ok(())
    }

    /// Change playback speed in place on the active resource, no reload
    pub async fn set_speed(&self, multiplier: f32) -> Result<()> {
        let clamped = multiplier.clamp(0.5, 3.0);
        *self.speed.write().await = clamped;
        settings::set_playback_speed(&self.db, clamped).await?;
        if let Some(kind) = self.active_kind().await {
            self.engine(kind).set_speed(clamped).await;
        }
        Ok(())
    }

    /// Set the repeat mode governing segment/clip-end handling
    ///
    /// Chapter-level looping is not implemented here: the caller re-invokes
    /// `play_verse` at the chapter's first verse upon receiving the last
    /// verse's completion signal.
    pub async fn set_repeat_mode(&self, mode: RepeatMode) -> Result<()> {
        *self.repeat.write().await = mode;
        settings::set_repeat_mode(&self.db, mode).await?;
        Ok(())
    }

    /// Release both engines' resources and clear all boundary and preload
    /// state. Called on engine switch, reciter change and explicit stop.
    pub async fn unload(&self) {
        self.full.unload().await;
        self.legacy.unload().await;
        *self.active.write().await = None;
        self.hub.update(|s| {
            s.is_playing = false;
            s.is_loading = false;
            s.is_buffering = false;
            s.position_ms = 0;
            s.duration_ms = None;
        });
    }

    /// Subscribe to status snapshots; the receiver always observes the
    /// single most-recent snapshot
    pub fn subscribe_status(&self) -> watch::Receiver<AudioStatus> {
        self.hub.subscribe_status()
    }

    /// Subscribe to discrete player events (verse completion, errors)
    pub fn subscribe_events(&self) -> broadcast::Receiver<PlayerEvent> {
        self.hub.subscribe_events()
    }

    /// Current status snapshot
    pub fn status(&self) -> AudioStatus {
        self.hub.snapshot()
    }

    pub async fn current_reciter(&self) -> String {
        self.reciter.read().await.clone()
    }

    pub async fn repeat_mode(&self) -> RepeatMode {
        *self.repeat.read().await
    }

    fn current_state(&self) -> PlaybackState {
        if self.hub.snapshot().is_playing {
            PlaybackState::Playing
        } else {
            PlaybackState::Paused
        }
    }

    fn emit_state_change(&self, old_state: PlaybackState, new_state: PlaybackState) {
        if old_state == new_state {
            return;
        }
        self.hub.emit(PlayerEvent::PlaybackStateChanged {
            old_state,
            new_state,
            timestamp: chrono::Utc::now(),
        });
    }

    /// Fully download the allowlisted short chapters for `reciter` in the
    /// background. Fire-and-forget: failures only log.
    fn spawn_eager_prefetch(&self, reciter: &str) {
        let Some(profile) = self.reciters.get(reciter).cloned() else {
            return;
        };
        if self.config.eager_chapters.is_empty() {
            return;
        }
        let cache = Arc::clone(&self.cache);
        let chapters = self.config.eager_chapters.clone();
        tokio::spawn(async move {
            cache.prefetch_chapters(&profile, &chapters).await;
        });
    }
}
