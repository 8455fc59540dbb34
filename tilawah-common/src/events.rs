//! Event types for the Tilawah player
//!
//! Provides the shared event definitions and the `EventBus` used to fan
//! player events out to subscribers (UI layer, sequencing caller, logs).
//!
//! Status snapshots (`AudioStatus`) travel on a separate `watch` channel
//! owned by the session controller so subscribers always see the single
//! most-recent snapshot; the broadcast bus carries discrete events such
//! as verse completion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::quran::VerseRef;

/// Coarse playback state of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Playing,
    Paused,
    Stopped,
}

/// Repeat behavior applied at segment/clip end
///
/// Chapter-level looping is driven by the caller: on receiving
/// `VerseCompleted` for the last verse it re-requests the first verse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    None,
    Verse,
    Chapter,
}

impl RepeatMode {
    /// Parse the persisted settings representation
    pub fn from_setting(value: &str) -> Option<Self> {
        match value {
            "none" => Some(RepeatMode::None),
            "verse" => Some(RepeatMode::Verse),
            "chapter" => Some(RepeatMode::Chapter),
            _ => None,
        }
    }

    /// Settings representation, stable across releases
    pub fn as_setting(&self) -> &'static str {
        match self {
            RepeatMode::None => "none",
            RepeatMode::Verse => "verse",
            RepeatMode::Chapter => "chapter",
        }
    }
}

/// Snapshot of the audible state, emitted on every engine-level update
///
/// Ephemeral: never persisted. Errors are carried here rather than
/// returned to the caller so the session stays addressable for retry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioStatus {
    pub is_playing: bool,
    pub is_loading: bool,
    pub is_buffering: bool,
    /// Playback position in milliseconds
    pub position_ms: u64,
    /// Total duration of the loaded resource, when known
    pub duration_ms: Option<u64>,
    /// Most recent playback error, cleared on the next successful operation
    pub error: Option<String>,
}

/// Player event types
///
/// Events are broadcast via `EventBus` and can be serialized for
/// transport to a UI layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlayerEvent {
    /// Playback state changed (Playing / Paused / Stopped)
    PlaybackStateChanged {
        old_state: PlaybackState,
        new_state: PlaybackState,
        timestamp: DateTime<Utc>,
    },

    /// A verse began playing
    VerseStarted {
        reciter: String,
        verse: VerseRef,
        timestamp: DateTime<Utc>,
    },

    /// A verse finished playing
    ///
    /// The engine never auto-advances; the caller drives sequencing (and
    /// chapter-level looping) from this signal.
    VerseCompleted {
        reciter: String,
        verse: VerseRef,
        timestamp: DateTime<Utc>,
    },

    /// The active reciter was switched
    ReciterChanged {
        old_reciter: String,
        new_reciter: String,
        timestamp: DateTime<Utc>,
    },

    /// A playback error occurred; the session remains usable
    PlaybackError {
        message: String,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast bus for player events
///
/// Thin wrapper over `tokio::sync::broadcast`. Emitting with no
/// subscribers is not an error: events are advisory.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PlayerEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all current subscribers
    pub fn emit(&self, event: PlayerEvent) {
        // No subscribers is fine; drop the event silently
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
