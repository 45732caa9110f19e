use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use timeline::{Clock, RangedTrack, TrackId};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MediaError {
    #[error("failed to load {src}: {reason}")]
    Load { src: String, reason: String },
    #[error("decode error: {0}")]
    Decode(String),
    #[error("media backend: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("player is in error state")]
    Errored,
    #[error("player was disposed")]
    Disposed,
    #[error(transparent)]
    Media(#[from] MediaError),
}

/// Notifications raised by a media element between commands.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    Ready,
    Buffering(bool),
    Seeked,
    TimeUpdate(Clock),
    Ended,
    Error(MediaError),
}

/// One decoder/output for a single clip, e.g. an audio element.
pub trait MediaBackend: Send {
    fn load(&mut self, src: &str) -> Result<(), MediaError>;
    fn play(&mut self) -> Result<(), MediaError>;
    fn pause(&mut self) -> Result<(), MediaError>;
    fn seek(&mut self, position: Clock) -> Result<(), MediaError>;
    fn set_rate(&mut self, rate: f64) -> Result<(), MediaError>;
    /// Position inside the clip as reported by the element.
    fn current_time(&self) -> Clock;
    fn poll_events(&mut self) -> Vec<MediaEvent>;
}

pub trait MediaBackendFactory: Send {
    fn create(&mut self, track: &RangedTrack) -> Box<dyn MediaBackend>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerStatus {
    Init,
    Running,
    Paused,
    Stopped,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerState {
    pub status: PlayerStatus,
    pub loading: bool,
    pub loaded: bool,
    pub buffering: bool,
    pub seeking: bool,
    pub rate: f64,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            status: PlayerStatus::Init,
            loading: false,
            loaded: false,
            buffering: false,
            seeking: false,
            rate: 1.0,
        }
    }
}

impl PlayerState {
    pub fn is_ready(&self) -> bool {
        self.loaded && !self.loading && !self.buffering && !self.seeking
    }
}

/// Drives one ranged media track through its backend.
///
/// Commands are no-ops when the player is already in the requested state,
/// except `seek` which always reaches the backend. Once a backend error is
/// seen the player stays in `Error` and rejects everything but `dispose`.
pub struct TrackPlayer {
    track: RangedTrack,
    backend: Box<dyn MediaBackend>,
    state: PlayerState,
    last_error: Option<MediaError>,
    changed: bool,
    disposed: bool,
}

impl TrackPlayer {
    pub fn new(track: RangedTrack, backend: Box<dyn MediaBackend>) -> Self {
        Self {
            track,
            backend,
            state: PlayerState::default(),
            last_error: None,
            changed: false,
            disposed: false,
        }
    }

    pub fn id(&self) -> TrackId {
        self.track.id
    }

    pub fn track(&self) -> &RangedTrack {
        &self.track
    }

    pub fn state(&self) -> &PlayerState {
        &self.state
    }

    pub fn last_error(&self) -> Option<&MediaError> {
        self.last_error.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.state.status == PlayerStatus::Running
    }

    /// Whether state changed since the last call.
    pub fn take_changed(&mut self) -> bool {
        std::mem::take(&mut self.changed)
    }

    pub fn current_time(&self) -> Clock {
        self.backend.current_time()
    }

    pub fn load(&mut self) -> Result<(), PlayerError> {
        self.check_usable()?;
        if self.state.loaded || self.state.loading {
            return Ok(());
        }
        self.state.loading = true;
        self.changed = true;
        debug!(track = %self.track.id, src = %self.track.src, "loading track");
        let result = self.backend.load(&self.track.src);
        self.check(result)
    }

    pub fn play(&mut self) -> Result<(), PlayerError> {
        self.check_usable()?;
        if self.state.status == PlayerStatus::Running {
            return Ok(());
        }
        let result = self.backend.play();
        self.check(result)?;
        self.set_status(PlayerStatus::Running);
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), PlayerError> {
        self.check_usable()?;
        if matches!(self.state.status, PlayerStatus::Paused | PlayerStatus::Init) {
            return Ok(());
        }
        let result = self.backend.pause();
        self.check(result)?;
        self.set_status(PlayerStatus::Paused);
        Ok(())
    }

    /// Pauses a track that left its range.
    pub fn stop(&mut self) -> Result<(), PlayerError> {
        self.check_usable()?;
        if self.state.status == PlayerStatus::Stopped {
            return Ok(());
        }
        if self.state.status == PlayerStatus::Running {
            let result = self.backend.pause();
            self.check(result)?;
        }
        self.set_status(PlayerStatus::Stopped);
        Ok(())
    }

    pub fn seek(&mut self, position: Clock) -> Result<(), PlayerError> {
        self.check_usable()?;
        self.state.seeking = true;
        self.changed = true;
        let result = self.backend.seek(position.max(0.0));
        self.check(result)
    }

    pub fn set_playback_rate(&mut self, rate: f64) -> Result<(), PlayerError> {
        self.check_usable()?;
        if (self.state.rate - rate).abs() < f64::EPSILON {
            return Ok(());
        }
        let result = self.backend.set_rate(rate);
        self.check(result)?;
        self.state.rate = rate;
        self.changed = true;
        Ok(())
    }

    /// Folds pending backend notifications into the state.
    pub fn poll(&mut self) -> Result<(), PlayerError> {
        self.check_usable()?;
        for event in self.backend.poll_events() {
            match event {
                MediaEvent::Ready => {
                    self.state.loading = false;
                    self.state.loaded = true;
                    self.changed = true;
                }
                MediaEvent::Buffering(buffering) => {
                    self.state.buffering = buffering;
                    self.changed = true;
                }
                MediaEvent::Seeked => {
                    self.state.seeking = false;
                    self.changed = true;
                }
                MediaEvent::TimeUpdate(_) => {}
                MediaEvent::Ended => {
                    if self.state.status == PlayerStatus::Running {
                        self.set_status(PlayerStatus::Stopped);
                    }
                }
                MediaEvent::Error(err) => return Err(self.fail(err)),
            }
        }
        Ok(())
    }

    /// Swaps the track definition; a new source forces a reload.
    pub fn update_track(&mut self, track: RangedTrack) -> Result<(), PlayerError> {
        let reload = track.src != self.track.src;
        self.track = track;
        if reload {
            self.state.loaded = false;
            self.state.loading = false;
            self.load()?;
        }
        Ok(())
    }

    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        if self.state.status == PlayerStatus::Running {
            if let Err(err) = self.backend.pause() {
                debug!(track = %self.track.id, error = %err, "pause on dispose failed");
            }
        }
        self.disposed = true;
    }

    fn check_usable(&self) -> Result<(), PlayerError> {
        if self.disposed {
            return Err(PlayerError::Disposed);
        }
        if self.state.status == PlayerStatus::Error {
            return Err(PlayerError::Errored);
        }
        Ok(())
    }

    fn check(&mut self, result: Result<(), MediaError>) -> Result<(), PlayerError> {
        result.map_err(|err| self.fail(err))
    }

    fn fail(&mut self, err: MediaError) -> PlayerError {
        warn!(track = %self.track.id, error = %err, "track player failed");
        self.state.loading = false;
        self.set_status(PlayerStatus::Error);
        self.last_error = Some(err.clone());
        PlayerError::Media(err)
    }

    fn set_status(&mut self, status: PlayerStatus) {
        if self.state.status != status {
            self.state.status = status;
            self.changed = true;
        }
    }
}
