//! Audio backend seam
//!
//! The playback engines never talk to an audio device directly. They load
//! sources through an [`AudioBackend`] and drive the returned handle, while
//! position and completion updates arrive asynchronously on a channel —
//! approximately timed and impossible to cancel mid-flight, which is exactly
//! the environment the boundary-token mechanism in the full-chapter engine
//! defends against.
//!
//! Two implementations ship: [`rodio_backend::RodioBackend`] for real output
//! and [`simulated::SimulatedBackend`], a deterministic clock-driven backend
//! for headless environments and tests.

pub mod rodio_backend;
pub mod simulated;

use crate::cache::PlaybackSource;
use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

/// Asynchronous update from a loaded audio resource
#[derive(Debug, Clone, PartialEq)]
pub enum AudioEvent {
    /// Approximate playback position, delivered at the configured interval
    /// while playing
    Position(Duration),
    /// The resource played to its natural end
    Finished,
    /// True while the backend is starved of source data (a stalled remote
    /// stream); false once playback resumes
    Buffering(bool),
    /// The backend hit an unrecoverable error for this resource
    Error(String),
}

/// Options applied when constructing an audio resource
#[derive(Debug, Clone, Copy)]
pub struct LoadOptions {
    /// Initial playback speed multiplier
    pub speed: f32,
    /// Interval between position updates. Fine granularity (~50 ms) is
    /// required for accurate boundary detection, not cosmetic polish.
    pub update_interval: Duration,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            speed: 1.0,
            update_interval: Duration::from_millis(50),
        }
    }
}

/// A constructed audio resource: its control handle and its update stream
///
/// Every construction must be matched by exactly one release
/// ([`AudioHandle::stop`] or drop); the engines own at most one primary
/// handle each at any time.
pub struct LoadedAudio {
    pub handle: Box<dyn AudioHandle>,
    pub events: mpsc::Receiver<AudioEvent>,
}

/// Constructs playable resources from resolved sources
#[async_trait]
pub trait AudioBackend: Send + Sync {
    /// Load (but do not start) a source. Resources start paused at
    /// position zero.
    async fn load(&self, source: PlaybackSource, opts: LoadOptions) -> Result<LoadedAudio>;
}

/// Transport control over one loaded resource
///
/// Control operations are synchronous and cheap; their audible effect is
/// reported back through the event stream.
pub trait AudioHandle: Send + Sync {
    fn play(&self);
    fn pause(&self);
    /// Seek to an absolute position. Best effort; the next position update
    /// reflects the outcome.
    fn try_seek(&self, position: Duration) -> Result<()>;
    fn set_speed(&self, speed: f32);
    /// Last observed playback position
    fn position(&self) -> Duration;
    /// Total duration, when the backend knows it
    fn duration(&self) -> Option<Duration>;
    /// Release the underlying resource. Idempotent; also ends the event
    /// stream.
    fn stop(&self);
}
