//! # Tilawah Common Library
//!
//! Shared code for the Tilawah recitation player:
//! - Verse addressing and per-chapter verse counts
//! - Event types (`PlayerEvent` enum) and the `EventBus`
//! - Playback status snapshots (`AudioStatus`)

pub mod events;
pub mod quran;

pub use events::{AudioStatus, EventBus, PlaybackState, PlayerEvent, RepeatMode};
pub use quran::{verse_count, VerseRef, CHAPTER_COUNT};
