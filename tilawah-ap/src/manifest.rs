//! Reciter profiles and the full-chapter audio manifest
//!
//! The manifest is static data mapping (reciter, chapter) to a full-chapter
//! audio resource. A manifest entry alone does not make the full-chapter
//! strategy usable: availability is the conjunction of the entry existing
//! and its segment map passing validation, evaluated on every engine
//! selection.

use crate::error::Result;
use crate::segments::{SegmentStore, VerseSegment};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tilawah_common::quran::VerseRef;
use tracing::debug;

/// Audio quality tier of a reciter's source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Low,
    Medium,
    High,
}

/// Identity and source location of one reciter. Immutable, loaded at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReciterProfile {
    /// Stable identifier used in cache paths and settings
    pub id: String,
    pub display_name: String,
    /// Base URL under which per-verse resources live
    pub base_url: String,
    pub quality: QualityTier,
}

impl ReciterProfile {
    /// Remote URL of a single verse resource
    ///
    /// Deterministic template: base URL + zero-padded chapter + zero-padded
    /// verse. Idempotent and collision-free across reciters because the
    /// base URL is per-reciter.
    pub fn verse_url(&self, verse: VerseRef) -> String {
        format!(
            "{}/{:03}{:03}.mp3",
            self.base_url.trim_end_matches('/'),
            verse.chapter,
            verse.verse
        )
    }
}

/// Registry of reciter profiles, loaded once at startup
#[derive(Debug, Default)]
pub struct Reciters {
    profiles: HashMap<String, ReciterProfile>,
}

impl Reciters {
    /// Load profiles from a JSON data file (array of profiles)
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let list: Vec<ReciterProfile> = serde_json::from_str(&content)?;
        Ok(Self::from_profiles(list))
    }

    pub fn from_profiles(list: Vec<ReciterProfile>) -> Self {
        let profiles = list.into_iter().map(|p| (p.id.clone(), p)).collect();
        Self { profiles }
    }

    pub fn get(&self, id: &str) -> Option<&ReciterProfile> {
        self.profiles.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.profiles.contains_key(id)
    }
}

/// One (reciter, chapter) -> full-chapter resource mapping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub reciter: String,
    pub chapter: u16,
    /// Locator of the chapter audio resource
    pub resource_url: String,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

/// Static table of full-chapter audio entries
#[derive(Debug, Default)]
pub struct Manifest {
    entries: HashMap<(String, u16), ManifestEntry>,
}

impl Manifest {
    /// Load the manifest from a JSON data file (array of entries)
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let list: Vec<ManifestEntry> = serde_json::from_str(&content)?;
        debug!(entries = list.len(), "Loaded manifest");
        Ok(Self::from_entries(list))
    }

    pub fn from_entries(list: Vec<ManifestEntry>) -> Self {
        let entries = list
            .into_iter()
            .map(|e| ((e.reciter.clone(), e.chapter), e))
            .collect();
        Self { entries }
    }

    /// Manifest entry for a (reciter, chapter), if one exists
    pub fn entry(&self, reciter: &str, chapter: u16) -> Option<&ManifestEntry> {
        self.entries.get(&(reciter.to_string(), chapter))
    }

    /// Entry plus validated segment map, when the full-chapter strategy is
    /// usable for this (reciter, chapter)
    ///
    /// Availability is a conjunction, not a single lookup: the entry must
    /// exist and its segment map must pass validation against the chapter's
    /// verse count.
    pub fn full_chapter_entry<'a>(
        &'a self,
        segments: &'a SegmentStore,
        reciter: &str,
        chapter: u16,
    ) -> Option<(&'a ManifestEntry, &'a [VerseSegment])> {
        let entry = self.entry(reciter, chapter)?;
        let segments = segments.validated(reciter, chapter)?;
        Some((entry, segments))
    }

    /// True when the full-chapter strategy is usable for (reciter, chapter)
    pub fn is_full_chapter_available(
        &self,
        segments: &SegmentStore,
        reciter: &str,
        chapter: u16,
    ) -> bool {
        self.full_chapter_entry(segments, reciter, chapter).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn profile() -> ReciterProfile {
        ReciterProfile {
            id: "alafasy".into(),
            display_name: "Mishary Alafasy".into(),
            base_url: "https://audio.example.com/alafasy/".into(),
            quality: QualityTier::High,
        }
    }

    fn entry(reciter: &str, chapter: u16) -> ManifestEntry {
        ManifestEntry {
            reciter: reciter.into(),
            chapter,
            resource_url: format!("https://audio.example.com/{reciter}/{chapter:03}.mp3"),
            checksum: None,
            duration_ms: Some(60_000),
        }
    }

    fn seg(verse: u16, start: f64, end: f64) -> VerseSegment {
        VerseSegment {
            verse,
            start_secs: start,
            end_secs: end,
        }
    }

    #[test]
    fn verse_url_is_zero_padded_and_trims_slash() {
        let url = profile().verse_url(VerseRef::new(2, 5));
        assert_eq!(url, "https://audio.example.com/alafasy/002005.mp3");
    }

    #[test]
    fn availability_requires_entry_and_valid_segments() {
        let manifest = Manifest::from_entries(vec![entry("alafasy", 1), entry("alafasy", 2)]);

        let mut maps = HashMap::new();
        maps.insert(
            ("alafasy".to_string(), 1_u16),
            vec![seg(1, 0.0, 3.0), seg(2, 3.0, 7.0)],
        );
        // Chapter 2 map is structurally broken (overlap)
        maps.insert(
            ("alafasy".to_string(), 2_u16),
            vec![seg(1, 0.0, 3.0), seg(2, 2.0, 7.0)],
        );
        let store = SegmentStore::from_maps(maps);

        assert!(manifest.is_full_chapter_available(&store, "alafasy", 1));
        // Entry exists but segment map is invalid
        assert!(!manifest.is_full_chapter_available(&store, "alafasy", 2));
        // Valid-looking map but no manifest entry
        assert!(!manifest.is_full_chapter_available(&store, "alafasy", 3));
        // Unknown reciter
        assert!(!manifest.is_full_chapter_available(&store, "husary", 1));
    }
}
