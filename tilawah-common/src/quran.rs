//! Verse addressing and canonical chapter metadata
//!
//! Chapters are numbered 1..=114 and verses 1..=verse_count(chapter).
//! The verse counts follow the Hafs numbering used by the audio sources.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of chapters in the recited text
pub const CHAPTER_COUNT: u16 = 114;

/// Verse count per chapter, indexed by `chapter - 1` (Hafs numbering)
const VERSE_COUNTS: [u16; CHAPTER_COUNT as usize] = [
    7, 286, 200, 176, 120, 165, 206, 75, 129, 109, 123, 111, 43, 52, 99, 128, 111, 110, 98, 135,
    112, 78, 118, 64, 77, 227, 93, 88, 69, 60, 34, 30, 73, 54, 45, 83, 182, 88, 75, 85, 54, 53,
    89, 59, 37, 35, 38, 29, 18, 45, 60, 49, 62, 55, 78, 96, 29, 22, 24, 13, 14, 11, 11, 18, 12,
    12, 30, 52, 52, 44, 28, 28, 20, 56, 40, 31, 50, 40, 46, 42, 29, 19, 36, 25, 22, 17, 19, 26,
    30, 20, 15, 21, 11, 8, 8, 19, 5, 8, 8, 11, 11, 8, 3, 9, 5, 4, 7, 3, 6, 3, 5, 4, 5, 6,
];

/// Number of verses in `chapter`, or None for an out-of-range chapter number
pub fn verse_count(chapter: u16) -> Option<u16> {
    if (1..=CHAPTER_COUNT).contains(&chapter) {
        Some(VERSE_COUNTS[(chapter - 1) as usize])
    } else {
        None
    }
}

/// Address of a single verse within the recited text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VerseRef {
    /// Chapter number (1..=114)
    pub chapter: u16,
    /// Verse number within the chapter (1-based)
    pub verse: u16,
}

impl VerseRef {
    pub fn new(chapter: u16, verse: u16) -> Self {
        Self { chapter, verse }
    }

    /// True if the chapter exists and the verse is within its verse count
    pub fn is_valid(&self) -> bool {
        match verse_count(self.chapter) {
            Some(count) => self.verse >= 1 && self.verse <= count,
            None => false,
        }
    }

    /// The next verse within the same chapter, if any
    ///
    /// Sequencing across chapters is a caller decision, so this never
    /// rolls over into the next chapter.
    pub fn next_in_chapter(&self) -> Option<VerseRef> {
        let count = verse_count(self.chapter)?;
        if self.verse < count {
            Some(VerseRef::new(self.chapter, self.verse + 1))
        } else {
            None
        }
    }

    /// True if this is the last verse of its chapter
    pub fn is_last_in_chapter(&self) -> bool {
        verse_count(self.chapter) == Some(self.verse)
    }
}

impl fmt::Display for VerseRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chapter, self.verse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verse_counts_cover_all_chapters() {
        assert_eq!(verse_count(1), Some(7));
        assert_eq!(verse_count(2), Some(286));
        assert_eq!(verse_count(114), Some(6));
        assert_eq!(verse_count(0), None);
        assert_eq!(verse_count(115), None);
    }

    #[test]
    fn verse_ref_validity() {
        assert!(VerseRef::new(1, 1).is_valid());
        assert!(VerseRef::new(1, 7).is_valid());
        assert!(!VerseRef::new(1, 8).is_valid());
        assert!(!VerseRef::new(1, 0).is_valid());
        assert!(!VerseRef::new(115, 1).is_valid());
    }

    #[test]
    fn next_in_chapter_stops_at_chapter_end() {
        assert_eq!(
            VerseRef::new(114, 5).next_in_chapter(),
            Some(VerseRef::new(114, 6))
        );
        assert_eq!(VerseRef::new(114, 6).next_in_chapter(), None);
        assert!(VerseRef::new(114, 6).is_last_in_chapter());
    }

    #[test]
    fn display_format() {
        assert_eq!(VerseRef::new(2, 255).to_string(), "2:255");
    }
}
