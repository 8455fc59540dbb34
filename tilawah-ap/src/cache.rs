//! On-device audio cache and background downloads
//!
//! Layout under the cache root, keyed deterministically so repeated
//! requests for the same logical resource are idempotent lookups:
//!
//! ```text
//! cache/
//!   chapters/<reciter>/<ccc>.mp3        full-chapter resources
//!   verses/<reciter>/<ccc><vvv>.mp3     per-verse resources
//! ```
//!
//! Playback always starts from the best immediately-available source:
//! the local file when present, otherwise the remote URL, while a copy is
//! downloaded in the background for next time. Downloads write to a
//! `.part` file and rename into place on completion, so a plain existence
//! check at the final path never sees a torn file. At most one download
//! runs toward a given final path at a time; the background and awaited
//! entry points share one in-flight set, since a second writer would
//! truncate the first one's partial file. Download failures only log; they
//! never surface as playback errors.

use crate::error::{Error, Result};
use crate::manifest::ReciterProfile;
use futures::StreamExt;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tilawah_common::quran::{self, VerseRef};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// A resolved, immediately-playable byte source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackSource {
    /// Complete file on local storage
    Local(PathBuf),
    /// Remote URL to stream from while the cache fills in the background
    Remote(String),
}

/// Cache manager for chapter and verse audio resources
pub struct AudioCache {
    root: PathBuf,
    client: reqwest::Client,
    /// Final paths with a download currently in flight
    in_flight: Arc<Mutex<HashSet<PathBuf>>>,
}

impl AudioCache {
    /// Create the cache directories under `root`
    pub fn new(root: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(root.join("chapters"))?;
        std::fs::create_dir_all(root.join("verses"))?;
        Ok(Self {
            root,
            client: reqwest::Client::new(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    /// Local path of a full-chapter resource
    pub fn chapter_path(&self, reciter: &str, chapter: u16) -> PathBuf {
        self.root
            .join("chapters")
            .join(reciter)
            .join(format!("{chapter:03}.mp3"))
    }

    /// Local path of a per-verse resource
    pub fn verse_path(&self, reciter: &str, verse: VerseRef) -> PathBuf {
        self.root
            .join("verses")
            .join(reciter)
            .join(format!("{:03}{:03}.mp3", verse.chapter, verse.verse))
    }

    /// Resolve a playable source for `url`, caching in the background
    ///
    /// A local hit wins. On a miss, a non-network locator is returned as a
    /// local path directly; a network locator is returned for streaming and
    /// a fire-and-forget download begins toward `local`.
    pub async fn resolve(&self, url: &str, local: &Path) -> PlaybackSource {
        if local.exists() {
            debug!(path = %local.display(), "Cache hit");
            return PlaybackSource::Local(local.to_path_buf());
        }
        if !is_remote(url) {
            return PlaybackSource::Local(PathBuf::from(url));
        }
        self.spawn_download(url.to_string(), local.to_path_buf()).await;
        PlaybackSource::Remote(url.to_string())
    }

    /// Download `url` to `local` unless it is already present
    ///
    /// Unlike [`resolve`], this awaits the download. Used by the eager
    /// prefetch of short chapters. When a background download of the same
    /// path is already in flight, returns without starting a second writer;
    /// that download will complete the cache entry.
    pub async fn ensure_cached(&self, url: &str, local: &Path) -> Result<()> {
        if local.exists() {
            return Ok(());
        }
        if !is_remote(url) {
            return Err(Error::NotFound(format!("no local source at {url}")));
        }
        if !self.try_begin_download(local).await {
            debug!(path = %local.display(), "Download already in flight");
            return Ok(());
        }
        let result = download_to(&self.client, url, local).await;
        self.finish_download(local).await;
        result
    }

    /// Fully download the given chapters' per-verse resources for `profile`
    ///
    /// Guarantees offline availability for content users return to often,
    /// regardless of network state at later request time. Failures log and
    /// move on; prefetch never blocks or fails playback.
    pub async fn prefetch_chapters(&self, profile: &ReciterProfile, chapters: &[u16]) {
        for &chapter in chapters {
            let Some(count) = quran::verse_count(chapter) else {
                warn!(chapter, "Skipping eager prefetch of unknown chapter");
                continue;
            };
            for verse in 1..=count {
                let verse_ref = VerseRef::new(chapter, verse);
                let url = profile.verse_url(verse_ref);
                let local = self.verse_path(&profile.id, verse_ref);
                if let Err(e) = self.ensure_cached(&url, &local).await {
                    warn!(%verse_ref, error = %e, "Eager prefetch failed");
                }
            }
            debug!(reciter = %profile.id, chapter, "Eager prefetch complete");
        }
    }

    /// Claim `local` for a download. False when another task already owns
    /// an in-flight download toward it.
    async fn try_begin_download(&self, local: &Path) -> bool {
        self.in_flight.lock().await.insert(local.to_path_buf())
    }

    async fn finish_download(&self, local: &Path) {
        self.in_flight.lock().await.remove(local);
    }

    /// Begin a fire-and-forget background download of `url` to `local`
    ///
    /// De-duplicated per final path: a second request for the same resource
    /// while a download is in flight is a no-op.
    async fn spawn_download(&self, url: String, local: PathBuf) {
        if !self.try_begin_download(&local).await {
            debug!(path = %local.display(), "Download already in flight");
            return;
        }

        let client = self.client.clone();
        let in_flight = Arc::clone(&self.in_flight);
        tokio::spawn(async move {
            if let Err(e) = download_to(&client, &url, &local).await {
                warn!(url, error = %e, "Background download failed");
            }
            in_flight.lock().await.remove(&local);
        });
    }
}

/// True for locators the cache fetches over the network
fn is_remote(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Stream `url` into `<path>.part`, then rename into place
async fn download_to(client: &reqwest::Client, url: &str, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| Error::Download(e.to_string()))?
        .error_for_status()
        .map_err(|e| Error::Download(e.to_string()))?;

    let part_path = path.with_extension("mp3.part");
    let mut file = tokio::fs::File::create(&part_path).await?;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| Error::Download(e.to_string()))?;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    drop(file);

    // Rename is atomic on the same filesystem; the final path either does
    // not exist or holds a complete file.
    tokio::fs::rename(&part_path, path).await?;
    debug!(url, path = %path.display(), "Download complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn paths_are_deterministic_and_zero_padded() {
        let dir = tempdir().unwrap();
        let cache = AudioCache::new(dir.path().to_path_buf()).unwrap();

        let chapter = cache.chapter_path("alafasy", 2);
        assert!(chapter.ends_with("chapters/alafasy/002.mp3"));

        let verse = cache.verse_path("alafasy", VerseRef::new(2, 5));
        assert!(verse.ends_with("verses/alafasy/002005.mp3"));

        // Idempotent: same logical resource, same path
        assert_eq!(verse, cache.verse_path("alafasy", VerseRef::new(2, 5)));
        // Collision-free across reciters
        assert_ne!(verse, cache.verse_path("husary", VerseRef::new(2, 5)));
    }

    #[tokio::test]
    async fn resolve_prefers_local_file() {
        let dir = tempdir().unwrap();
        let cache = AudioCache::new(dir.path().to_path_buf()).unwrap();

        let local = cache.verse_path("alafasy", VerseRef::new(1, 1));
        std::fs::create_dir_all(local.parent().unwrap()).unwrap();
        std::fs::write(&local, b"audio").unwrap();

        let source = cache
            .resolve("https://example.invalid/001001.mp3", &local)
            .await;
        assert_eq!(source, PlaybackSource::Local(local));
    }

    #[tokio::test]
    async fn resolve_miss_returns_remote_without_blocking() {
        let dir = tempdir().unwrap();
        let cache = AudioCache::new(dir.path().to_path_buf()).unwrap();

        let local = cache.verse_path("alafasy", VerseRef::new(1, 1));
        let url = "https://example.invalid/001001.mp3";
        let source = cache.resolve(url, &local).await;
        // Streaming URL handed back immediately; the (failing) download
        // stays in the background and never surfaces here
        assert_eq!(source, PlaybackSource::Remote(url.to_string()));
        assert!(!local.exists());
    }

    #[tokio::test]
    async fn resolve_treats_plain_path_as_local() {
        let dir = tempdir().unwrap();
        let cache = AudioCache::new(dir.path().to_path_buf()).unwrap();

        let missing = dir.path().join("never-downloaded.mp3");
        let source = cache.resolve("/srv/audio/001001.mp3", &missing).await;
        assert_eq!(
            source,
            PlaybackSource::Local(PathBuf::from("/srv/audio/001001.mp3"))
        );
    }

    #[tokio::test]
    async fn ensure_cached_skips_path_already_downloading() {
        let dir = tempdir().unwrap();
        let cache = AudioCache::new(dir.path().to_path_buf()).unwrap();

        let local = cache.verse_path("alafasy", VerseRef::new(1, 1));
        assert!(cache.try_begin_download(&local).await);
        // The path is claimed; a concurrent claim must fail
        assert!(!cache.try_begin_download(&local).await);

        // A prefetch arriving while the background download owns the path
        // must not start a second writer toward the same partial file
        cache
            .ensure_cached("https://example.invalid/001001.mp3", &local)
            .await
            .unwrap();
        assert!(!local.exists());

        cache.finish_download(&local).await;
        assert!(cache.try_begin_download(&local).await);
    }

    #[tokio::test]
    async fn ensure_cached_short_circuits_on_existing_file() {
        let dir = tempdir().unwrap();
        let cache = AudioCache::new(dir.path().to_path_buf()).unwrap();

        let local = cache.verse_path("alafasy", VerseRef::new(1, 1));
        std::fs::create_dir_all(local.parent().unwrap()).unwrap();
        std::fs::write(&local, b"audio").unwrap();

        // No network reachable in tests; an existing file must be enough
        cache
            .ensure_cached("https://example.invalid/001001.mp3", &local)
            .await
            .unwrap();
    }
}
