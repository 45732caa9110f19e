use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, error, info};

use timeline::{
    video_track_at, Clock, EventStore, RangedTrack, Session, TimelineError, TrackId, TrackKind,
    WorkspaceProjector, Worktree,
};

use crate::{
    DriftAction, DriftCorrector, EditorRecorder, MasterClock, MediaBackendFactory, PlayerError,
    Result, RuntimeConfig, RuntimeError, TimeSource, TrackPlayer,
};

/// Clocks closer than this are the same position.
const CLOCK_EPSILON: Clock = 1e-6;

/// Pending events per subscriber. A slow subscriber loses events, never
/// the runtime's progress.
pub const SUBSCRIBER_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeStatus {
    Init,
    Running,
    Paused,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeMode {
    pub status: RuntimeStatus,
    /// While running, the editor track captures instead of replaying.
    pub recording_editor: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSource {
    Editor,
    Track(TrackId),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
    Changed,
    Error { source: ErrorSource, message: String },
}

/// Owns one session and keeps the editor track and every media track locked
/// to a single master clock.
pub struct TimelineRuntime {
    session: Session,
    projector: WorkspaceProjector,
    mode: RuntimeMode,
    clock: Clock,
    master: MasterClock,
    time: Box<dyn TimeSource>,
    factory: Box<dyn MediaBackendFactory>,
    audio: Vec<TrackPlayer>,
    video: Option<TrackPlayer>,
    recorder: Option<Box<dyn EditorRecorder>>,
    drift: DriftCorrector,
    config: RuntimeConfig,
    next_tick_at: Option<f64>,
    subscribers: Vec<Sender<RuntimeEvent>>,
}

impl TimelineRuntime {
    pub fn new(
        session: Session,
        projector: WorkspaceProjector,
        time: impl TimeSource + 'static,
        factory: impl MediaBackendFactory + 'static,
        config: RuntimeConfig,
    ) -> Self {
        let mut runtime = Self {
            session,
            projector,
            mode: RuntimeMode {
                status: RuntimeStatus::Init,
                recording_editor: false,
            },
            clock: 0.0,
            master: MasterClock::default(),
            time: Box::new(time),
            factory: Box::new(factory),
            audio: Vec::new(),
            video: None,
            recorder: None,
            drift: DriftCorrector::new(config.drift.clone()),
            config,
            next_tick_at: None,
            subscribers: Vec::new(),
        };
        for track in runtime.session.tracks.iter().filter(|t| t.kind == TrackKind::Audio) {
            let backend = runtime.factory.create(track);
            runtime.audio.push(TrackPlayer::new(track.clone(), backend));
        }
        runtime
    }

    pub fn set_recorder(&mut self, recorder: impl EditorRecorder + 'static) {
        self.recorder = Some(Box::new(recorder));
    }

    pub fn subscribe(&mut self) -> Receiver<RuntimeEvent> {
        let (tx, rx) = bounded(SUBSCRIBER_CAPACITY);
        self.subscribers.push(tx);
        rx
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn worktree(&self) -> &Worktree {
        self.projector.worktree()
    }

    pub fn projector(&self) -> &WorkspaceProjector {
        &self.projector
    }

    pub fn mode(&self) -> RuntimeMode {
        self.mode
    }

    pub fn clock(&self) -> Clock {
        self.clock
    }

    pub fn duration(&self) -> Clock {
        self.session.duration
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn audio_player(&self, id: TrackId) -> Option<&TrackPlayer> {
        self.audio.iter().find(|p| p.id() == id)
    }

    pub fn video_player(&self) -> Option<&TrackPlayer> {
        self.video.as_ref()
    }

    /// Time source reading at which the next tick is due, if scheduled.
    pub fn next_tick_at(&self) -> Option<f64> {
        self.next_tick_at
    }

    pub fn now(&self) -> f64 {
        self.time.now()
    }

    /// Loads every audio track and the video clip under the clock.
    pub fn load(&mut self) -> Result<()> {
        self.ensure_usable()?;
        self.each_player(|p| p.load())?;
        self.select_video()?;
        self.seek_editor()?;
        self.notify(RuntimeEvent::Changed);
        Ok(())
    }

    pub fn play(&mut self) -> Result<()> {
        self.ensure_usable()?;
        if self.mode.status == RuntimeStatus::Running {
            return Err(RuntimeError::Precondition("play() while running".into()));
        }
        if self.session.duration - self.clock < self.config.rewind_threshold {
            self.seek(0.0, true)?;
        }
        self.mode.recording_editor = false;
        self.start_running()
    }

    /// Starts capturing editor events at the end of the session.
    pub fn record(&mut self) -> Result<()> {
        self.ensure_usable()?;
        if self.mode.status == RuntimeStatus::Running {
            return Err(RuntimeError::Precondition("record() while running".into()));
        }
        if (self.clock - self.session.duration).abs() > CLOCK_EPSILON {
            return Err(RuntimeError::Precondition(format!(
                "record() needs the clock at the session end ({}), found {}",
                self.session.duration, self.clock
            )));
        }
        self.seek_editor()?;
        let Some(recorder) = self.recorder.as_mut() else {
            return Err(RuntimeError::Precondition("no editor recorder attached".into()));
        };
        recorder.start();
        self.mode.recording_editor = true;
        self.start_running()
    }

    pub fn pause(&mut self) -> Result<()> {
        self.ensure_usable()?;
        if self.mode.status == RuntimeStatus::Paused {
            return Ok(());
        }
        self.halt();
        self.set_status(RuntimeStatus::Paused);
        self.notify(RuntimeEvent::Changed);
        Ok(())
    }

    /// Moves every track to `clock`. Recording is demoted to playback first.
    pub fn seek(&mut self, clock: Clock, no_update: bool) -> Result<()> {
        self.ensure_usable()?;
        if !clock.is_finite() {
            return Err(RuntimeError::Precondition(format!("cannot seek to {clock}")));
        }
        if self.mode.recording_editor {
            if self.mode.status == RuntimeStatus::Running {
                self.halt();
                self.set_status(RuntimeStatus::Paused);
            }
            self.mode.recording_editor = false;
        }
        self.clock = clock.clamp(0.0, self.session.duration.max(0.0));
        let now = self.time.now();
        self.master.seek_to(self.clock, now);
        debug!(clock = self.clock, "runtime seek");

        self.sync_media_positions()?;
        self.seek_editor()?;
        if !no_update {
            self.next_tick_at = None;
            self.tick()?;
        }
        Ok(())
    }

    /// One synchronization pass; reschedules itself while running.
    pub fn tick(&mut self) -> Result<()> {
        self.ensure_usable()?;
        let now = self.time.now();
        self.next_tick_at = None;
        let running = self.mode.status == RuntimeStatus::Running;
        if running {
            self.advance_clock(now);
        }

        self.each_player(|p| p.poll())?;
        if let Some(player) = self.video.as_mut() {
            let id = player.id();
            if let Err(err) = player.poll() {
                return Err(self.fail_track(id, err));
            }
        }

        self.seek_editor()?;
        if running && self.mode.recording_editor {
            self.capture_recorded()?;
        }
        self.sync_tracks()?;

        if running && !self.mode.recording_editor && self.clock >= self.session.duration {
            info!(clock = self.clock, "reached session end");
            self.halt();
            self.set_status(RuntimeStatus::Paused);
        }
        if self.mode.status == RuntimeStatus::Running {
            self.next_tick_at = Some(now + self.config.tick_interval().as_secs_f64());
        }
        self.notify(RuntimeEvent::Changed);
        Ok(())
    }

    /// Re-selects the video clip and re-seeks media without a full tick.
    pub fn fast_sync(&mut self) -> Result<()> {
        self.ensure_usable()?;
        self.sync_media_positions()?;
        if self.mode.status == RuntimeStatus::Running {
            self.sync_tracks()?;
        }
        Ok(())
    }

    pub fn insert_media_and_load(&mut self, track: RangedTrack) -> Result<()> {
        let index = self.session.tracks.len();
        self.insert_media_at(index, track)
    }

    pub fn insert_media_at(&mut self, index: usize, track: RangedTrack) -> Result<()> {
        self.ensure_usable()?;
        if self.session.track(track.id).is_some() {
            return Err(TimelineError::TrackExists(track.id).into());
        }
        info!(track = %track.id, kind = ?track.kind, src = %track.src, "insert media");
        let (id, kind) = (track.id, track.kind);
        self.session.extend_duration(track.range.end);
        let index = index.min(self.session.tracks.len());
        self.session.tracks.insert(index, track);
        self.reconcile_players()?;
        match kind {
            TrackKind::Audio => self.position_audio(id)?,
            TrackKind::Video => self.fast_sync()?,
        }
        self.notify(RuntimeEvent::Changed);
        Ok(())
    }

    /// Removes a track, returning it with its former position.
    pub fn delete_media(&mut self, id: TrackId) -> Result<(usize, RangedTrack)> {
        self.ensure_usable()?;
        let index = self.session.track_index(id)?;
        let track = self.session.tracks.remove(index);
        info!(track = %id, "delete media");
        self.reconcile_players()?;
        if track.kind == TrackKind::Video {
            self.fast_sync()?;
        }
        self.notify(RuntimeEvent::Changed);
        Ok((index, track))
    }

    /// Replaces the track with the same id, returning the previous version.
    pub fn update_media(&mut self, track: RangedTrack) -> Result<RangedTrack> {
        self.ensure_usable()?;
        let index = self.session.track_index(track.id)?;
        let (id, kind) = (track.id, track.kind);
        self.session.extend_duration(track.range.end);
        let old = std::mem::replace(&mut self.session.tracks[index], track);
        self.reconcile_players()?;
        match kind {
            TrackKind::Audio => self.position_audio(id)?,
            TrackKind::Video => self.fast_sync()?,
        }
        self.notify(RuntimeEvent::Changed);
        Ok(old)
    }

    pub fn set_duration(&mut self, duration: Clock) -> Result<()> {
        self.ensure_usable()?;
        if !duration.is_finite() || duration < 0.0 {
            return Err(RuntimeError::Precondition(format!("invalid duration {duration}")));
        }
        self.session.duration = duration;
        if self.clock > duration {
            self.clock = duration;
        }
        self.notify(RuntimeEvent::Changed);
        Ok(())
    }

    /// Mutates the store around the editor track. When the edit touches
    /// events already applied, the projector first rewinds to just before
    /// `index` and replays to the current clock afterwards.
    pub(crate) fn edit_store<R>(
        &mut self,
        index: usize,
        edit: impl FnOnce(&mut EventStore) -> timeline::Result<R>,
    ) -> Result<R> {
        self.ensure_usable()?;
        let applied = self.projector.event_index().map_or(0, |i| i + 1);
        if applied > index {
            let target = index.checked_sub(1);
            if let Err(err) = self.projector.seek_to_index(&self.session.store, target) {
                return Err(self.fail_editor(err));
            }
        }
        let result = edit(&mut self.session.store);
        self.seek_editor()?;
        Ok(result?)
    }

    /// Re-times or trims the session in place. The projector keeps its
    /// index, so `reshape` must preserve the relative order of events it
    /// keeps and must not drop applied ones.
    pub(crate) fn reshape<R>(
        &mut self,
        edit: impl FnOnce(&mut Session) -> timeline::Result<R>,
    ) -> Result<R> {
        self.ensure_usable()?;
        let out = edit(&mut self.session)?;
        self.reconcile_players()?;
        Ok(out)
    }

    fn start_running(&mut self) -> Result<()> {
        let now = self.time.now();
        self.master.start(self.clock, now);
        self.set_status(RuntimeStatus::Running);
        self.tick()
    }

    fn advance_clock(&mut self, now: f64) {
        let mut clock = self.master.now(now);
        if self.mode.recording_editor {
            self.session.extend_duration(clock);
        } else if clock > self.session.duration {
            clock = self.session.duration;
        }
        self.clock = clock;
    }

    /// Stops the clock and every running element without reporting errors.
    fn halt(&mut self) {
        self.next_tick_at = None;
        if self.master.is_running() {
            let now = self.time.now();
            self.advance_clock(now);
            self.master.stop(now);
            self.master.seek_to(self.clock, now);
        }
        for player in self.audio.iter_mut().chain(self.video.iter_mut()) {
            if player.is_running() {
                if let Err(err) = player.pause() {
                    debug!(track = %player.id(), error = %err, "pause while halting failed");
                }
            }
        }
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.pause();
        }
    }

    fn seek_editor(&mut self) -> Result<()> {
        match self.projector.seek(&self.session.store, self.clock) {
            Ok(_) => Ok(()),
            Err(err) => Err(self.fail_editor(err)),
        }
    }

    /// Stamps captured events with the clock and applies them at the end.
    fn capture_recorded(&mut self) -> Result<()> {
        let captured = match self.recorder.as_mut() {
            Some(recorder) => recorder.take_events(),
            None => Vec::new(),
        };
        for event in captured {
            let applied = self
                .session
                .store
                .insert(event.uri, self.clock, event.event)
                .and_then(|id| {
                    let index = self
                        .session
                        .store
                        .index_of(id)
                        .ok_or(TimelineError::EventNotFound(id))?;
                    self.projector.apply_next(&self.session.store, index)
                });
            if let Err(err) = applied {
                return Err(self.fail_editor(err));
            }
        }
        Ok(())
    }

    fn sync_media_positions(&mut self) -> Result<()> {
        let clock = self.clock;
        self.each_player(|p| {
            if p.track().in_range(clock) {
                let local = p.track().local_clock(clock);
                p.seek(local)
            } else {
                Ok(())
            }
        })?;
        self.select_video()?;
        if let Some(player) = self.video.as_mut() {
            let local = player.track().local_clock(clock);
            let id = player.id();
            if let Err(err) = player.seek(local) {
                return Err(self.fail_track(id, err));
            }
        }
        Ok(())
    }

    fn sync_tracks(&mut self) -> Result<()> {
        let clock = self.clock;
        let running = self.mode.status == RuntimeStatus::Running;
        let drift = self.drift.clone();
        self.each_player(|p| sync_player(p, clock, running, &drift))?;
        self.select_video()?;
        if let Some(player) = self.video.as_mut() {
            let id = player.id();
            if let Err(err) = sync_player(player, clock, running, &drift) {
                return Err(self.fail_track(id, err));
            }
        }
        Ok(())
    }

    /// Swaps the video player when another clip owns the clock.
    fn select_video(&mut self) -> Result<()> {
        let target = video_track_at(&self.session.tracks, self.clock).cloned();
        let current = self.video.as_ref().map(TrackPlayer::id);
        if current == target.as_ref().map(|t| t.id) {
            return Ok(());
        }
        if let Some(mut old) = self.video.take() {
            debug!(track = %old.id(), "video clip out of range");
            old.dispose();
        }
        if let Some(track) = target {
            debug!(track = %track.id, clock = self.clock, "video clip selected");
            let backend = self.factory.create(&track);
            let mut player = TrackPlayer::new(track, backend);
            let id = player.id();
            let loaded = player.load();
            self.video = Some(player);
            if let Err(err) = loaded {
                return Err(self.fail_track(id, err));
            }
        }
        Ok(())
    }

    /// Brings the audio players and the video player in line with the
    /// session's track list.
    fn reconcile_players(&mut self) -> Result<()> {
        let ids: HashSet<TrackId> = self.session.tracks.iter().map(|t| t.id).collect();
        self.audio.retain_mut(|p| {
            let keep = ids.contains(&p.id());
            if !keep {
                p.dispose();
            }
            keep
        });
        if self.video.as_ref().is_some_and(|p| !ids.contains(&p.id())) {
            if let Some(mut old) = self.video.take() {
                old.dispose();
            }
        }

        let mut failure = None;
        for track in &self.session.tracks {
            let player = match track.kind {
                TrackKind::Audio => self.audio.iter_mut().find(|p| p.id() == track.id),
                TrackKind::Video => self.video.as_mut().filter(|p| p.id() == track.id),
            };
            let result = match player {
                Some(player) if player.track() != track => player.update_track(track.clone()),
                Some(_) => Ok(()),
                None if track.kind == TrackKind::Audio => {
                    let backend = self.factory.create(track);
                    let mut player = TrackPlayer::new(track.clone(), backend);
                    let loaded = player.load();
                    self.audio.push(player);
                    loaded
                }
                None => Ok(()),
            };
            if let Err(err) = result {
                failure = Some((track.id, err));
                break;
            }
        }
        match failure {
            Some((id, err)) => Err(self.fail_track(id, err)),
            None => Ok(()),
        }
    }

    fn position_audio(&mut self, id: TrackId) -> Result<()> {
        let clock = self.clock;
        let Some(player) = self.audio.iter_mut().find(|p| p.id() == id) else {
            return Ok(());
        };
        if !player.track().in_range(clock) {
            return Ok(());
        }
        let local = player.track().local_clock(clock);
        if let Err(err) = player.seek(local) {
            return Err(self.fail_track(id, err));
        }
        Ok(())
    }

    /// Runs `f` on every audio player, failing the runtime on the first error.
    fn each_player(
        &mut self,
        mut f: impl FnMut(&mut TrackPlayer) -> std::result::Result<(), PlayerError>,
    ) -> Result<()> {
        let mut failure = None;
        for player in &mut self.audio {
            if let Err(err) = f(player) {
                failure = Some((player.id(), err));
                break;
            }
        }
        match failure {
            Some((id, err)) => Err(self.fail_track(id, err)),
            None => Ok(()),
        }
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.mode.status == RuntimeStatus::Error {
            return Err(RuntimeError::Errored);
        }
        Ok(())
    }

    fn fail_editor(&mut self, err: TimelineError) -> RuntimeError {
        self.fail(ErrorSource::Editor, err.to_string());
        RuntimeError::Editor(err)
    }

    fn fail_track(&mut self, track: TrackId, err: PlayerError) -> RuntimeError {
        self.fail(ErrorSource::Track(track), err.to_string());
        RuntimeError::Track { track, source: err }
    }

    /// Enters the sticky error state and reports it once.
    fn fail(&mut self, source: ErrorSource, message: String) {
        if self.mode.status == RuntimeStatus::Error {
            return;
        }
        error!(?source, %message, "timeline runtime failed");
        self.halt();
        self.set_status(RuntimeStatus::Error);
        self.notify(RuntimeEvent::Error { source, message });
    }

    fn set_status(&mut self, status: RuntimeStatus) {
        if self.mode.status != status {
            info!(from = ?self.mode.status, to = ?status, recording = self.mode.recording_editor, clock = self.clock, "runtime status");
            self.mode.status = status;
        }
    }

    /// `Changed` is only queued for subscribers with nothing pending.
    fn notify(&mut self, event: RuntimeEvent) {
        let coalesce = event == RuntimeEvent::Changed;
        self.subscribers.retain(|tx| {
            if coalesce && !tx.is_empty() {
                return true;
            }
            !matches!(tx.try_send(event.clone()), Err(TrySendError::Disconnected(_)))
        });
    }
}

fn sync_player(
    player: &mut TrackPlayer,
    clock: Clock,
    running: bool,
    drift: &DriftCorrector,
) -> std::result::Result<(), PlayerError> {
    if !player.track().in_range(clock) {
        if player.is_running() {
            debug!(track = %player.id(), clock, "track out of range");
            player.stop()?;
        }
        return Ok(());
    }
    let local = player.track().local_clock(clock);
    if !player.is_running() {
        player.seek(local)?;
        if running {
            player.play()?;
        }
        return Ok(());
    }
    if !running || !player.state().is_ready() {
        return Ok(());
    }
    match drift.assess(local, player.current_time(), player.state().rate) {
        DriftAction::Keep => {}
        DriftAction::SetRate(rate) => {
            debug!(track = %player.id(), rate, "drift correction");
            player.set_playback_rate(rate)?;
        }
        DriftAction::HardSeek(to) => {
            debug!(track = %player.id(), to, actual = player.current_time(), "hard seek");
            player.seek(to)?;
            player.set_playback_rate(1.0)?;
        }
    }
    Ok(())
}
