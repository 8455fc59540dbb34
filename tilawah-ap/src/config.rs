//! Player configuration
//!
//! Root folder resolution follows the priority order:
//! 1. Command-line argument (highest priority)
//! 2. `TILAWAH_ROOT_FOLDER` environment variable
//! 3. `root_folder` key in the TOML config file
//! 4. OS-dependent default (fallback)
//!
//! Engine tuning values ship with defaults; a `tilawah.toml` in the root
//! folder may override any of them.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the root folder
pub const ROOT_FOLDER_ENV: &str = "TILAWAH_ROOT_FOLDER";

/// Engine and storage configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Folder holding data files, the settings database and the audio cache
    pub root_folder: PathBuf,

    /// Reciter used when no selection has been persisted yet
    pub default_reciter: String,

    /// Interval between position updates from the audio backend.
    ///
    /// Must stay well below the boundary tolerance; 50 ms gives the
    /// full-chapter engine enough resolution for segment-accurate stops.
    pub position_update_interval_ms: u64,

    /// Slack applied when comparing a position update against a segment end.
    ///
    /// Must exceed the update interval (so a boundary is never missed) and
    /// stay below the shortest expected verse duration (so it never fires
    /// twice).
    pub boundary_tolerance_ms: u64,

    /// Step applied by seek_forward / seek_backward
    pub seek_step_ms: u64,

    /// Short chapters downloaded in full before first playback, so they are
    /// available offline regardless of network state at request time
    pub eager_chapters: Vec<u16>,

    /// Broadcast capacity of the player event bus
    pub event_bus_capacity: usize,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            root_folder: default_root_folder(),
            default_reciter: "alafasy".to_string(),
            position_update_interval_ms: 50,
            boundary_tolerance_ms: 75,
            seek_step_ms: 5_000,
            eager_chapters: vec![1, 103, 104, 105, 106, 107, 108, 109, 110, 111, 112, 113, 114],
            event_bus_capacity: 256,
        }
    }
}

impl PlayerConfig {
    /// Resolve the root folder and load `tilawah.toml` from it when present
    pub fn load(cli_root: Option<&Path>) -> Result<Self> {
        let root = resolve_root_folder(cli_root)?;
        let config_path = root.join("tilawah.toml");

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str::<PlayerConfig>(&content)
                .map_err(|e| Error::Config(format!("{}: {e}", config_path.display())))?
        } else {
            PlayerConfig::default()
        };
        config.root_folder = root;
        config.validate()?;
        Ok(config)
    }

    /// Reject tuning values that would break boundary detection
    pub fn validate(&self) -> Result<()> {
        if self.boundary_tolerance_ms <= self.position_update_interval_ms {
            return Err(Error::Config(format!(
                "boundary_tolerance_ms ({}) must exceed position_update_interval_ms ({})",
                self.boundary_tolerance_ms, self.position_update_interval_ms
            )));
        }
        if self.default_reciter.is_empty() {
            return Err(Error::Config("default_reciter must not be empty".into()));
        }
        Ok(())
    }

    /// Audio cache root (`<root>/cache`)
    pub fn cache_dir(&self) -> PathBuf {
        self.root_folder.join("cache")
    }

    /// Settings database path (`<root>/tilawah.db`)
    pub fn db_path(&self) -> PathBuf {
        self.root_folder.join("tilawah.db")
    }

    /// Manifest data file (`<root>/manifest.json`)
    pub fn manifest_path(&self) -> PathBuf {
        self.root_folder.join("manifest.json")
    }

    /// Segment map data file (`<root>/segments.json`)
    pub fn segments_path(&self) -> PathBuf {
        self.root_folder.join("segments.json")
    }

    /// Reciter profiles data file (`<root>/reciters.json`)
    pub fn reciters_path(&self) -> PathBuf {
        self.root_folder.join("reciters.json")
    }

    pub fn position_update_interval(&self) -> Duration {
        Duration::from_millis(self.position_update_interval_ms)
    }

    pub fn boundary_tolerance(&self) -> Duration {
        Duration::from_millis(self.boundary_tolerance_ms)
    }
}

fn resolve_root_folder(cli_arg: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = cli_arg {
        return Ok(path.to_path_buf());
    }
    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
        return Ok(PathBuf::from(path));
    }
    Ok(default_root_folder())
}

/// OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("tilawah"))
        .unwrap_or_else(|| PathBuf::from("./tilawah_data"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = PlayerConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.boundary_tolerance_ms > config.position_update_interval_ms);
    }

    #[test]
    fn tolerance_below_interval_rejected() {
        let config = PlayerConfig {
            position_update_interval_ms: 100,
            boundary_tolerance_ms: 35,
            ..PlayerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_overrides_apply() {
        let config: PlayerConfig = toml::from_str(
            r#"
            default_reciter = "husary"
            seek_step_ms = 10000
            "#,
        )
        .unwrap();
        assert_eq!(config.default_reciter, "husary");
        assert_eq!(config.seek_step_ms, 10_000);
        // Untouched keys keep their defaults
        assert_eq!(config.position_update_interval_ms, 50);
    }
}
