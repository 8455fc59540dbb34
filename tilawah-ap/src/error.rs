//! Error types for tilawah-ap
//!
//! Defines module-specific error types using thiserror for clear error
//! propagation.
//!
//! Two of these variants deliberately never reach the caller as errors:
//! `Manifest` and `SegmentMap` only drive the silent fallback from the
//! full-chapter engine to the per-verse engine.

use thiserror::Error;

/// Main error type for the tilawah-ap module
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database connection or query errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Manifest data missing or unusable for a (reciter, chapter)
    #[error("Manifest error: {0}")]
    Manifest(String),

    /// Segment map failed structural validation
    #[error("Segment map error: {0}")]
    SegmentMap(String),

    /// Audio backend errors (device, decode, seek)
    #[error("Audio error: {0}")]
    Audio(String),

    /// Download or stream-open errors
    #[error("Download error: {0}")]
    Download(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed manifest or segment data files
    #[error("Data file error: {0}")]
    Json(#[from] serde_json::Error),

    /// No playable source resolvable at all
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Invalid request parameter (chapter/verse out of range)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience Result type using the tilawah-ap Error
pub type Result<T> = std::result::Result<T, Error>;
