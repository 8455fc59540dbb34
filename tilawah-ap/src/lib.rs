//! # Tilawah Audio Player Library (tilawah-ap)
//!
//! Hybrid verse-audio playback engine for recited chapters.
//!
//! **Purpose:** Play individual verses using one of two mutually-exclusive
//! strategies: one audio resource per chapter plus a per-verse timestamp map
//! ("full-chapter"), or one discrete resource per verse ("per-verse"). The
//! session falls back transparently between the strategies, caches remote
//! sources in the background, and starts and stops segment-accurately from
//! asynchronous position updates.
//!
//! **Architecture:** A single `PlayerSession` orchestrates the two engines,
//! owns the active audio handle, and publishes `AudioStatus` snapshots plus
//! `PlayerEvent`s. Verse sequencing across a chapter is a caller decision,
//! driven by the `VerseCompleted` event.

pub mod audio;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod manifest;
pub mod playback;
pub mod segments;

pub use config::PlayerConfig;
pub use error::{Error, Result};
pub use playback::session::PlayerSession;
