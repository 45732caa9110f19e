//! Scripted media backend for tests and headless runs.
//!
//! The element never advances on its own: callers move `position` to model
//! a free-running decoder.

use parking_lot::{Mutex, MutexGuard};
use std::{collections::HashMap, sync::Arc};

use timeline::{Clock, RangedTrack, TrackId};

use crate::{MediaBackend, MediaBackendFactory, MediaError, MediaEvent};

#[derive(Debug, Default)]
pub struct FakeMedia {
    pub loads: Vec<String>,
    pub playing: bool,
    pub play_calls: usize,
    pub position: Clock,
    pub seeks: Vec<Clock>,
    pub rates: Vec<f64>,
    /// Hold back `Ready` after a load until the test pushes it.
    pub manual_ready: bool,
    pending: Vec<MediaEvent>,
    fail_next: Option<MediaError>,
}

#[derive(Debug, Clone, Default)]
pub struct FakeBackend {
    media: Arc<Mutex<FakeMedia>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn media(&self) -> MutexGuard<'_, FakeMedia> {
        self.media.lock()
    }

    pub fn set_position(&self, position: Clock) {
        self.media.lock().position = position;
    }

    pub fn push_event(&self, event: MediaEvent) {
        self.media.lock().pending.push(event);
    }

    /// The next backend call fails with `err`.
    pub fn fail_next(&self, err: MediaError) {
        self.media.lock().fail_next = Some(err);
    }

    fn call(&self, f: impl FnOnce(&mut FakeMedia)) -> Result<(), MediaError> {
        let mut media = self.media.lock();
        if let Some(err) = media.fail_next.take() {
            return Err(err);
        }
        f(&mut media);
        Ok(())
    }
}

impl MediaBackend for FakeBackend {
    fn load(&mut self, src: &str) -> Result<(), MediaError> {
        self.call(|m| {
            m.loads.push(src.to_string());
            if !m.manual_ready {
                m.pending.push(MediaEvent::Ready);
            }
        })
    }

    fn play(&mut self) -> Result<(), MediaError> {
        self.call(|m| {
            m.playing = true;
            m.play_calls += 1;
        })
    }

    fn pause(&mut self) -> Result<(), MediaError> {
        self.call(|m| m.playing = false)
    }

    fn seek(&mut self, position: Clock) -> Result<(), MediaError> {
        self.call(|m| {
            m.position = position;
            m.seeks.push(position);
            m.pending.push(MediaEvent::Seeked);
        })
    }

    fn set_rate(&mut self, rate: f64) -> Result<(), MediaError> {
        self.call(|m| m.rates.push(rate))
    }

    fn current_time(&self) -> Clock {
        self.media.lock().position
    }

    fn poll_events(&mut self) -> Vec<MediaEvent> {
        std::mem::take(&mut self.media.lock().pending)
    }
}

/// Hands out [`FakeBackend`]s and remembers the latest one per track.
#[derive(Debug, Clone, Default)]
pub struct FakeBackendFactory {
    created: Arc<Mutex<HashMap<TrackId, FakeBackend>>>,
}

impl FakeBackendFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backend(&self, id: TrackId) -> Option<FakeBackend> {
        self.created.lock().get(&id).cloned()
    }

    pub fn created(&self) -> usize {
        self.created.lock().len()
    }
}

impl MediaBackendFactory for FakeBackendFactory {
    fn create(&mut self, track: &RangedTrack) -> Box<dyn MediaBackend> {
        let backend = FakeBackend::new();
        self.created.lock().insert(track.id, backend.clone());
        Box::new(backend)
    }
}
