//! Per-verse timestamp maps for full-chapter audio
//!
//! A segment map positions every verse of a chapter inside the chapter's
//! single audio resource. Maps are static data shipped alongside the
//! manifest, and may be updated independently of the application, so
//! validation runs before every engine-selection decision rather than once
//! at load time. Trusting a malformed map would silently align audio to
//! the wrong verse.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tilawah_common::quran;
use tracing::debug;

/// One verse's window within a chapter audio resource
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VerseSegment {
    /// Verse number within the chapter (1-based)
    pub verse: u16,
    /// Start offset in seconds from the beginning of the chapter audio
    pub start_secs: f64,
    /// End offset in seconds
    pub end_secs: f64,
}

impl VerseSegment {
    pub fn start(&self) -> Duration {
        Duration::from_secs_f64(self.start_secs)
    }

    pub fn end(&self) -> Duration {
        Duration::from_secs_f64(self.end_secs)
    }
}

/// Structural validation of a segment list
///
/// Rejects:
/// - empty lists
/// - any `end <= start`
/// - overlap with the previous segment (`start[i] < end[i-1]`)
/// - non-consecutive verse numbers
/// - a final verse number exceeding `expected_verse_count` when supplied
pub fn validate_segments(segments: &[VerseSegment], expected_verse_count: Option<u16>) -> bool {
    if segments.is_empty() {
        return false;
    }

    let mut prev_end = 0.0_f64;
    let mut prev_verse: Option<u16> = None;

    for segment in segments {
        if segment.end_secs <= segment.start_secs {
            return false;
        }
        if segment.start_secs < prev_end {
            return false;
        }
        if let Some(prev) = prev_verse {
            if segment.verse != prev + 1 {
                return false;
            }
        }
        prev_end = segment.end_secs;
        prev_verse = Some(segment.verse);
    }

    if let (Some(count), Some(last)) = (expected_verse_count, prev_verse) {
        if last > count {
            return false;
        }
    }

    true
}

/// Static store of segment maps, keyed by (reciter, chapter)
#[derive(Debug, Default)]
pub struct SegmentStore {
    maps: HashMap<(String, u16), Vec<VerseSegment>>,
}

/// On-disk layout: reciter id -> chapter number (as string) -> segments
type SegmentFile = HashMap<String, HashMap<String, Vec<VerseSegment>>>;

impl SegmentStore {
    /// Load segment maps from a JSON data file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let file: SegmentFile = serde_json::from_str(&content)?;

        let mut maps = HashMap::new();
        for (reciter, chapters) in file {
            for (chapter_key, segments) in chapters {
                let chapter: u16 = chapter_key.parse().map_err(|_| {
                    Error::SegmentMap(format!(
                        "invalid chapter key {chapter_key:?} for reciter {reciter}"
                    ))
                })?;
                maps.insert((reciter.clone(), chapter), segments);
            }
        }
        debug!(maps = maps.len(), "Loaded segment maps");
        Ok(Self { maps })
    }

    /// Build a store from already-parsed maps (used by tests and tooling)
    pub fn from_maps(maps: HashMap<(String, u16), Vec<VerseSegment>>) -> Self {
        Self { maps }
    }

    /// Raw (unvalidated) segment list for a (reciter, chapter)
    pub fn get(&self, reciter: &str, chapter: u16) -> Option<&[VerseSegment]> {
        self.maps
            .get(&(reciter.to_string(), chapter))
            .map(|v| v.as_slice())
    }

    /// Segment list for a (reciter, chapter), only if it passes validation
    /// against the chapter's known verse count
    pub fn validated(&self, reciter: &str, chapter: u16) -> Option<&[VerseSegment]> {
        let segments = self.get(reciter, chapter)?;
        if validate_segments(segments, quran::verse_count(chapter)) {
            Some(segments)
        } else {
            debug!(reciter, chapter, "Segment map failed validation");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(verse: u16, start: f64, end: f64) -> VerseSegment {
        VerseSegment {
            verse,
            start_secs: start,
            end_secs: end,
        }
    }

    #[test]
    fn accepts_well_formed_map() {
        let segments = vec![seg(1, 0.0, 3.0), seg(2, 3.0, 7.0), seg(3, 7.0, 10.0)];
        assert!(validate_segments(&segments, Some(7)));
    }

    #[test]
    fn rejects_empty_list() {
        assert!(!validate_segments(&[], None));
    }

    #[test]
    fn rejects_end_not_after_start() {
        assert!(!validate_segments(&[seg(1, 3.0, 3.0)], None));
        assert!(!validate_segments(&[seg(1, 3.0, 2.0)], None));
    }

    #[test]
    fn rejects_overlap_with_previous_segment() {
        let segments = vec![seg(1, 0.0, 3.0), seg(2, 2.5, 7.0)];
        assert!(!validate_segments(&segments, None));
    }

    #[test]
    fn accepts_gap_between_segments() {
        // Silence between verses is legal; only overlap is not
        let segments = vec![seg(1, 0.0, 3.0), seg(2, 3.5, 7.0)];
        assert!(validate_segments(&segments, None));
    }

    #[test]
    fn rejects_regressing_verse_numbers() {
        let segments = vec![seg(1, 0.0, 1.0), seg(3, 1.0, 2.0), seg(2, 2.0, 3.0)];
        assert!(!validate_segments(&segments, None));
    }

    #[test]
    fn rejects_skipped_verse_numbers() {
        let segments = vec![seg(1, 0.0, 1.0), seg(3, 1.0, 2.0)];
        assert!(!validate_segments(&segments, None));
    }

    #[test]
    fn rejects_final_verse_beyond_chapter() {
        let segments: Vec<VerseSegment> = (1..=8)
            .map(|v| seg(v, f64::from(v) - 1.0, f64::from(v)))
            .collect();
        // Chapter 1 has 7 verses
        assert!(!validate_segments(&segments, Some(7)));
        assert!(validate_segments(&segments, None));
    }

    #[test]
    fn validated_lookup_applies_verse_count() {
        let mut maps = HashMap::new();
        maps.insert(
            ("test".to_string(), 1_u16),
            vec![seg(1, 0.0, 3.0), seg(2, 3.0, 7.0)],
        );
        maps.insert(
            ("test".to_string(), 2_u16),
            vec![seg(1, 0.0, 1.0), seg(3, 1.0, 2.0)],
        );
        let store = SegmentStore::from_maps(maps);

        assert!(store.validated("test", 1).is_some());
        // Non-consecutive verse numbers
        assert!(store.validated("test", 2).is_none());
        // Unknown chapter
        assert!(store.validated("test", 3).is_none());
    }
}
