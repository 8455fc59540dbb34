//! Tilawah audio player (tilawah-ap) - Main entry point
//!
//! Command-line recitation player. Loads the data files from the root
//! folder, builds a playback session over the system audio device and plays
//! from the requested verse to the end of the chapter, advancing on each
//! verse-completed signal.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tilawah_common::events::{PlayerEvent, RepeatMode};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tilawah_ap::audio::rodio_backend::RodioBackend;
use tilawah_ap::config::PlayerConfig;
use tilawah_ap::db;
use tilawah_ap::manifest::{Manifest, Reciters};
use tilawah_ap::segments::SegmentStore;
use tilawah_ap::PlayerSession;

/// Command-line arguments for tilawah-ap
#[derive(Parser, Debug)]
#[command(name = "tilawah-ap")]
#[command(about = "Verse-by-verse recitation player")]
#[command(version)]
struct Args {
    /// Chapter to play (1-114)
    chapter: u16,

    /// Verse to start from (defaults to the first verse)
    #[arg(default_value = "1")]
    verse: u16,

    /// Root folder containing data files, settings database and audio cache
    #[arg(short, long, env = "TILAWAH_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// Reciter to use for this run (persisted as the new selection)
    #[arg(long)]
    reciter: Option<String>,

    /// Playback speed multiplier (0.5-3.0)
    #[arg(long)]
    speed: Option<f32>,

    /// Repeat mode: none, verse or chapter
    #[arg(long)]
    repeat: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tilawah_ap=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = PlayerConfig::load(args.root_folder.as_deref())
        .context("Failed to load configuration")?;
    info!("Root folder: {}", config.root_folder.display());

    let db = db::open_database(&config.db_path())
        .await
        .context("Failed to open settings database")?;

    let reciters = Reciters::load(&config.reciters_path())
        .with_context(|| format!("Failed to load {}", config.reciters_path().display()))?;

    // Manifest and segment maps are optional: without them every chapter
    // plays through the per-verse engine.
    let manifest = load_or_default(config.manifest_path(), Manifest::load, "manifest");
    let segments = load_or_default(config.segments_path(), SegmentStore::load, "segment maps");

    let backend = Arc::new(RodioBackend::new().context("Failed to open audio device")?);
    let session = Arc::new(
        PlayerSession::new(config, manifest, segments, reciters, backend, db)
            .await
            .context("Failed to initialize playback session")?,
    );

    if let Some(reciter) = &args.reciter {
        session
            .set_reciter(reciter)
            .await
            .with_context(|| format!("Unknown reciter {reciter}"))?;
    }
    if let Some(speed) = args.speed {
        session.set_speed(speed).await?;
    }
    if let Some(repeat) = &args.repeat {
        let mode = RepeatMode::from_setting(repeat)
            .with_context(|| format!("Unknown repeat mode {repeat}"))?;
        session.set_repeat_mode(mode).await?;
    }

    let mut events = session.subscribe_events();

    info!(
        "Playing {}:{} with reciter {}",
        args.chapter,
        args.verse,
        session.current_reciter().await
    );
    session
        .play_verse(args.chapter, args.verse)
        .await
        .context("Playback failed to start")?;

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C, stopping");
                session.stop().await;
                break;
            }
            event = events.recv() => match event {
                Ok(PlayerEvent::VerseCompleted { verse, .. }) => {
                    if let Some(next) = verse.next_in_chapter() {
                        session.play_verse(next.chapter, next.verse).await?;
                    } else if session.repeat_mode().await == RepeatMode::Chapter {
                        session.play_verse(verse.chapter, 1).await?;
                    } else {
                        info!("Reached the end of chapter {}", verse.chapter);
                        break;
                    }
                }
                Ok(PlayerEvent::PlaybackError { message, .. }) => {
                    error!("Playback error: {message}");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Event stream closed: {e}");
                    break;
                }
            },
        }
    }

    info!("Player shutdown complete");
    Ok(())
}

/// Load an optional data file, falling back to an empty table
fn load_or_default<T: Default>(
    path: PathBuf,
    load: impl Fn(&std::path::Path) -> tilawah_ap::Result<T>,
    what: &str,
) -> T {
    if !path.exists() {
        info!("No {what} file at {}, continuing without", path.display());
        return T::default();
    }
    match load(&path) {
        Ok(value) => value,
        Err(e) => {
            warn!("Failed to load {what} from {}: {e}", path.display());
            T::default()
        }
    }
}
