//! Deterministic clock-driven audio backend
//!
//! Advances a virtual playhead by the update interval (scaled by speed) and
//! emits the same event stream a real device would, without touching any
//! audio hardware. Used for headless operation and by the engine and
//! session tests, where `tokio::test(start_paused = true)` makes the timer
//! ticks instantaneous and fully deterministic.

use super::{AudioBackend, AudioEvent, AudioHandle, LoadOptions, LoadedAudio};
use crate::cache::PlaybackSource;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Stable key identifying a source in the simulation tables
fn source_key(source: &PlaybackSource) -> String {
    match source {
        PlaybackSource::Local(path) => path.display().to_string(),
        PlaybackSource::Remote(url) => url.clone(),
    }
}

/// Simulated audio backend with per-source durations and failure injection
pub struct SimulatedBackend {
    default_duration: Duration,
    durations: Mutex<HashMap<String, Duration>>,
    failing: Mutex<HashSet<String>>,
    stalls: Mutex<HashMap<String, u32>>,
    loads: Mutex<Vec<String>>,
}

impl SimulatedBackend {
    pub fn new(default_duration: Duration) -> Self {
        Self {
            default_duration,
            durations: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            stalls: Mutex::new(HashMap::new()),
            loads: Mutex::new(Vec::new()),
        }
    }

    /// Set the simulated duration for a source (matched by path or URL)
    pub fn set_duration(&self, key: impl Into<String>, duration: Duration) {
        self.durations.lock().unwrap().insert(key.into(), duration);
    }

    /// Make loading a source fail, for error-path tests
    pub fn fail_source(&self, key: impl Into<String>) {
        self.failing.lock().unwrap().insert(key.into());
    }

    /// Starve a source for its first `ticks` position updates, emitting
    /// buffering transitions the way a stalled remote stream would
    pub fn stall_source(&self, key: impl Into<String>, ticks: u32) {
        self.stalls.lock().unwrap().insert(key.into(), ticks);
    }

    /// Every source key loaded so far, in order
    pub fn loads(&self) -> Vec<String> {
        self.loads.lock().unwrap().clone()
    }

    /// Number of loads recorded for one source key
    pub fn load_count(&self, key: &str) -> usize {
        self.loads.lock().unwrap().iter().filter(|k| *k == key).count()
    }
}

struct SimState {
    position: Mutex<Duration>,
    speed: Mutex<f32>,
    playing: AtomicBool,
    stopped: AtomicBool,
    /// Latched after Finished is emitted; cleared by a seek so the same
    /// resource can be replayed
    finished: AtomicBool,
    duration: Duration,
}

#[async_trait]
impl AudioBackend for SimulatedBackend {
    async fn load(&self, source: PlaybackSource, opts: LoadOptions) -> Result<LoadedAudio> {
        let key = source_key(&source);
        if self.failing.lock().unwrap().contains(&key) {
            return Err(Error::Audio(format!("simulated load failure: {key}")));
        }
        self.loads.lock().unwrap().push(key.clone());

        let duration = self
            .durations
            .lock()
            .unwrap()
            .get(&key)
            .copied()
            .unwrap_or(self.default_duration);

        let state = Arc::new(SimState {
            position: Mutex::new(Duration::ZERO),
            speed: Mutex::new(opts.speed),
            playing: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            duration,
        });

        let (tx, rx) = mpsc::channel(64);
        let tick_state = Arc::clone(&state);
        let mut stall_left = self.stalls.lock().unwrap().get(&key).copied().unwrap_or(0);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(opts.update_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut buffering = false;
            loop {
                ticker.tick().await;
                if tick_state.stopped.load(Ordering::Acquire) {
                    break;
                }
                if !tick_state.playing.load(Ordering::Acquire) {
                    continue;
                }

                if stall_left > 0 {
                    stall_left -= 1;
                    if !buffering {
                        buffering = true;
                        if tx.send(AudioEvent::Buffering(true)).await.is_err() {
                            break;
                        }
                    }
                    continue;
                }
                if buffering {
                    buffering = false;
                    if tx.send(AudioEvent::Buffering(false)).await.is_err() {
                        break;
                    }
                }

                let speed = *tick_state.speed.lock().unwrap();
                let position = {
                    let mut pos = tick_state.position.lock().unwrap();
                    *pos += opts.update_interval.mul_f64(f64::from(speed));
                    if *pos > tick_state.duration {
                        *pos = tick_state.duration;
                    }
                    *pos
                };

                if tx.send(AudioEvent::Position(position)).await.is_err() {
                    break;
                }
                if position >= tick_state.duration
                    && !tick_state.finished.swap(true, Ordering::AcqRel)
                {
                    tick_state.playing.store(false, Ordering::Release);
                    if tx.send(AudioEvent::Finished).await.is_err() {
                        break;
                    }
                }
            }
        });

        Ok(LoadedAudio {
            handle: Box::new(SimulatedHandle { state }),
            events: rx,
        })
    }
}

struct SimulatedHandle {
    state: Arc<SimState>,
}

impl AudioHandle for SimulatedHandle {
    fn play(&self) {
        self.state.playing.store(true, Ordering::Release);
    }

    fn pause(&self) {
        self.state.playing.store(false, Ordering::Release);
    }

    fn try_seek(&self, position: Duration) -> Result<()> {
        let clamped = position.min(self.state.duration);
        *self.state.position.lock().unwrap() = clamped;
        if clamped < self.state.duration {
            self.state.finished.store(false, Ordering::Release);
        }
        Ok(())
    }

    fn set_speed(&self, speed: f32) {
        *self.state.speed.lock().unwrap() = speed;
    }

    fn position(&self) -> Duration {
        *self.state.position.lock().unwrap()
    }

    fn duration(&self) -> Option<Duration> {
        Some(self.state.duration)
    }

    fn stop(&self) {
        self.state.playing.store(false, Ordering::Release);
        self.state.stopped.store(true, Ordering::Release);
    }
}

impl Drop for SimulatedHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test(start_paused = true)]
    async fn plays_to_natural_end() {
        let backend = SimulatedBackend::new(Duration::from_millis(200));
        let mut audio = backend
            .load(
                PlaybackSource::Local(PathBuf::from("a.mp3")),
                LoadOptions::default(),
            )
            .await
            .unwrap();

        audio.handle.play();
        let mut finished = false;
        while let Some(event) = audio.events.recv().await {
            if event == AudioEvent::Finished {
                finished = true;
                break;
            }
        }
        assert!(finished);
        assert_eq!(audio.handle.position(), Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn seek_rearms_finished_resource() {
        let backend = SimulatedBackend::new(Duration::from_millis(100));
        let mut audio = backend
            .load(
                PlaybackSource::Local(PathBuf::from("a.mp3")),
                LoadOptions::default(),
            )
            .await
            .unwrap();

        audio.handle.play();
        while let Some(event) = audio.events.recv().await {
            if event == AudioEvent::Finished {
                break;
            }
        }

        audio.handle.try_seek(Duration::ZERO).unwrap();
        audio.handle.play();
        let mut finished_again = false;
        while let Some(event) = audio.events.recv().await {
            if event == AudioEvent::Finished {
                finished_again = true;
                break;
            }
        }
        assert!(finished_again);
    }

    #[tokio::test]
    async fn failure_injection() {
        let backend = SimulatedBackend::new(Duration::from_secs(1));
        backend.fail_source("broken.mp3");
        let result = backend
            .load(
                PlaybackSource::Local(PathBuf::from("broken.mp3")),
                LoadOptions::default(),
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn records_loads_per_source() {
        let backend = SimulatedBackend::new(Duration::from_secs(1));
        for _ in 0..2 {
            backend
                .load(
                    PlaybackSource::Local(PathBuf::from("a.mp3")),
                    LoadOptions::default(),
                )
                .await
                .unwrap();
        }
        assert_eq!(backend.load_count("a.mp3"), 2);
        assert_eq!(backend.load_count("b.mp3"), 0);
    }
}
