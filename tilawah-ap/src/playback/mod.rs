//! Playback engines and the session controller
//!
//! Two mutually-exclusive strategies sit behind one transport contract:
//! [`full_chapter::FullChapterEngine`] (one resource per chapter plus a
//! per-verse timestamp map) and [`per_verse::PerVerseEngine`] (one discrete
//! resource per verse). [`session::PlayerSession`] selects a strategy per
//! call and falls back transparently; callers never observe which engine
//! served a request.

pub mod full_chapter;
pub mod per_verse;
pub mod session;

use async_trait::async_trait;
use std::time::Duration;
use tilawah_common::events::{AudioStatus, EventBus, PlayerEvent};
use tokio::sync::{broadcast, watch};

/// Which engine currently owns playback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    FullChapter,
    PerVerse,
}

/// Transport contract shared by both engines
///
/// Strategy selection happens in the session controller; once a verse is
/// playing, transport controls dispatch through this trait regardless of
/// which engine serves it.
#[async_trait]
pub trait VerseEngine: Send + Sync {
    async fn pause(&self);
    async fn resume(&self);
    /// Seek to an absolute position within the loaded resource
    async fn seek(&self, position: Duration);
    async fn set_speed(&self, speed: f32);
    /// Last observed position and duration of the loaded resource
    async fn position(&self) -> Option<(Duration, Option<Duration>)>;
    /// Release the engine's audio resources and boundary state
    async fn unload(&self);
}

/// Status and event fan-out shared by the session and both engines
///
/// The `watch` channel holds the single authoritative most-recent
/// [`AudioStatus`]; every engine-level update publishes a fresh snapshot.
/// Discrete events (verse completion, errors) go out on the broadcast bus.
pub struct StatusHub {
    status_tx: watch::Sender<AudioStatus>,
    bus: EventBus,
}

impl StatusHub {
    pub fn new(bus_capacity: usize) -> Self {
        let (status_tx, _) = watch::channel(AudioStatus::default());
        Self {
            status_tx,
            bus: EventBus::new(bus_capacity),
        }
    }

    /// Mutate the status in place and publish the new snapshot
    pub fn update(&self, f: impl FnOnce(&mut AudioStatus)) {
        self.status_tx.send_modify(f);
    }

    /// Publish an error snapshot and broadcast it as an event
    ///
    /// Errors are reported, never thrown; the session stays addressable
    /// for retry.
    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        self.update(|s| {
            s.is_playing = false;
            s.is_loading = false;
            s.error = Some(message.clone());
        });
        self.bus.emit(PlayerEvent::PlaybackError {
            message,
            timestamp: chrono::Utc::now(),
        });
    }

    pub fn emit(&self, event: PlayerEvent) {
        self.bus.emit(event);
    }

    pub fn subscribe_status(&self) -> watch::Receiver<AudioStatus> {
        self.status_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PlayerEvent> {
        self.bus.subscribe()
    }

    /// Current snapshot (for tests and the CLI)
    pub fn snapshot(&self) -> AudioStatus {
        self.status_tx.borrow().clone()
    }
}
