use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use timeline::warp::{self, speed_warp};
use timeline::{Clock, ClockRange, EditorEvent, EventEntry, EventId, RangedTrack, TrackId, Uri};

use crate::{Result, RuntimeError, TimelineRuntime};

/// An undoable timeline edit. Applying one returns the command that undoes it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum SessionCommand {
    InsertEvent {
        uri: Uri,
        clock: Clock,
        event: EditorEvent,
    },
    DeleteEvent {
        id: EventId,
    },
    UpdateEvent {
        id: EventId,
        event: EditorEvent,
    },
    /// Puts a deleted event back under its old id and index.
    RestoreEvent {
        entry: EventEntry,
        index: usize,
    },
    InsertTrack {
        track: RangedTrack,
        #[serde(default)]
        index: Option<usize>,
    },
    DeleteTrack {
        track_id: TrackId,
        /// Session duration to restore once the track is gone.
        #[serde(default)]
        duration: Option<Clock>,
    },
    UpdateTrack {
        track: RangedTrack,
        #[serde(default)]
        duration: Option<Clock>,
    },
    ChangeSpeed {
        range: ClockRange,
        factor: f64,
    },
    Merge {
        range: ClockRange,
    },
    InsertGap {
        clock: Clock,
        duration: Clock,
    },
    Crop {
        clock: Clock,
    },
    UpdateDuration {
        duration: Clock,
    },
    /// Snapshot taken before a clock-reshaping edit.
    RestoreTimeline {
        clocks: Vec<(EventId, Clock)>,
        tracks: Vec<RangedTrack>,
        duration: Clock,
        clock: Clock,
    },
    Uncrop {
        events: Vec<(usize, EventEntry)>,
        tracks: Vec<RangedTrack>,
        duration: Clock,
        clock: Clock,
    },
}

impl SessionCommand {
    pub fn name(&self) -> &'static str {
        match self {
            SessionCommand::InsertEvent { .. } => "insert_event",
            SessionCommand::DeleteEvent { .. } => "delete_event",
            SessionCommand::UpdateEvent { .. } => "update_event",
            SessionCommand::RestoreEvent { .. } => "restore_event",
            SessionCommand::InsertTrack { .. } => "insert_track",
            SessionCommand::DeleteTrack { .. } => "delete_track",
            SessionCommand::UpdateTrack { .. } => "update_track",
            SessionCommand::ChangeSpeed { .. } => "change_speed",
            SessionCommand::Merge { .. } => "merge",
            SessionCommand::InsertGap { .. } => "insert_gap",
            SessionCommand::Crop { .. } => "crop",
            SessionCommand::UpdateDuration { .. } => "update_duration",
            SessionCommand::RestoreTimeline { .. } => "restore_timeline",
            SessionCommand::Uncrop { .. } => "uncrop",
        }
    }
}

pub fn apply_command(
    runtime: &mut TimelineRuntime,
    command: SessionCommand,
) -> Result<SessionCommand> {
    match command {
        SessionCommand::InsertEvent { uri, clock, event } => insert_event(runtime, uri, clock, event),
        SessionCommand::DeleteEvent { id } => delete_event(runtime, id),
        SessionCommand::UpdateEvent { id, event } => update_event(runtime, id, event),
        SessionCommand::RestoreEvent { entry, index } => restore_event(runtime, entry, index),
        SessionCommand::InsertTrack { track, index } => insert_track(runtime, track, index),
        SessionCommand::DeleteTrack { track_id, duration } => {
            delete_track(runtime, track_id, duration)
        }
        SessionCommand::UpdateTrack { track, duration } => update_track(runtime, track, duration),
        SessionCommand::ChangeSpeed { range, factor } => change_speed(runtime, range, factor),
        SessionCommand::Merge { range } => change_speed(runtime, range, f64::INFINITY),
        SessionCommand::InsertGap { clock, duration } => insert_gap(runtime, clock, duration),
        SessionCommand::Crop { clock } => crop(runtime, clock),
        SessionCommand::UpdateDuration { duration } => update_duration(runtime, duration),
        SessionCommand::RestoreTimeline {
            clocks,
            tracks,
            duration,
            clock,
        } => restore_timeline(runtime, clocks, tracks, duration, clock),
        SessionCommand::Uncrop {
            events,
            tracks,
            duration,
            clock,
        } => uncrop(runtime, events, tracks, duration, clock),
    }
}

fn insert_event(
    runtime: &mut TimelineRuntime,
    uri: Uri,
    clock: Clock,
    event: EditorEvent,
) -> Result<SessionCommand> {
    let index = runtime
        .session()
        .store
        .index_before_clock(clock)
        .map_or(0, |i| i + 1);
    let id = runtime.edit_store(index, |store| store.insert(uri, clock, event))?;
    Ok(SessionCommand::DeleteEvent { id })
}

fn delete_event(runtime: &mut TimelineRuntime, id: EventId) -> Result<SessionCommand> {
    let index = event_index(runtime, id)?;
    let (index, entry) = runtime.edit_store(index, |store| store.delete(id))?;
    Ok(SessionCommand::RestoreEvent { entry, index })
}

fn update_event(
    runtime: &mut TimelineRuntime,
    id: EventId,
    event: EditorEvent,
) -> Result<SessionCommand> {
    let index = event_index(runtime, id)?;
    let previous = runtime.edit_store(index, |store| store.replace(id, event))?;
    Ok(SessionCommand::UpdateEvent {
        id,
        event: previous,
    })
}

fn restore_event(
    runtime: &mut TimelineRuntime,
    entry: EventEntry,
    index: usize,
) -> Result<SessionCommand> {
    let id = entry.id;
    runtime.edit_store(index, |store| store.restore(entry, index))?;
    Ok(SessionCommand::DeleteEvent { id })
}

fn event_index(runtime: &TimelineRuntime, id: EventId) -> Result<usize> {
    runtime
        .session()
        .store
        .index_of(id)
        .ok_or_else(|| timeline::TimelineError::EventNotFound(id).into())
}

fn insert_track(
    runtime: &mut TimelineRuntime,
    track: RangedTrack,
    index: Option<usize>,
) -> Result<SessionCommand> {
    let duration = runtime.duration();
    let track_id = track.id;
    match index {
        Some(index) => runtime.insert_media_at(index, track)?,
        None => runtime.insert_media_and_load(track)?,
    }
    Ok(SessionCommand::DeleteTrack {
        track_id,
        duration: Some(duration),
    })
}

fn delete_track(
    runtime: &mut TimelineRuntime,
    track_id: TrackId,
    duration: Option<Clock>,
) -> Result<SessionCommand> {
    let (index, track) = runtime.delete_media(track_id)?;
    if let Some(duration) = duration {
        runtime.set_duration(duration)?;
    }
    Ok(SessionCommand::InsertTrack {
        track,
        index: Some(index),
    })
}

fn update_track(
    runtime: &mut TimelineRuntime,
    track: RangedTrack,
    duration: Option<Clock>,
) -> Result<SessionCommand> {
    let previous_duration = runtime.duration();
    let previous = runtime.update_media(track)?;
    if let Some(duration) = duration {
        runtime.set_duration(duration)?;
    }
    Ok(SessionCommand::UpdateTrack {
        track: previous,
        duration: Some(previous_duration),
    })
}

fn snapshot(runtime: &TimelineRuntime) -> SessionCommand {
    let session = runtime.session();
    SessionCommand::RestoreTimeline {
        clocks: session.store.clocks(),
        tracks: session.tracks.clone(),
        duration: session.duration,
        clock: runtime.clock(),
    }
}

fn change_speed(
    runtime: &mut TimelineRuntime,
    range: ClockRange,
    factor: f64,
) -> Result<SessionCommand> {
    let inverse = snapshot(runtime);
    let clock = runtime.clock();
    runtime.reshape(|session| {
        warp::change_speed(&mut session.store, &mut session.tracks, &range, factor)?;
        session.duration = speed_warp(session.duration, &range, factor);
        Ok(())
    })?;
    runtime.seek(speed_warp(clock, &range, factor), false)?;
    Ok(inverse)
}

fn insert_gap(runtime: &mut TimelineRuntime, clock: Clock, duration: Clock) -> Result<SessionCommand> {
    if !clock.is_finite() || clock < 0.0 || clock > runtime.duration() {
        return Err(RuntimeError::Precondition(format!(
            "gap clock {clock} outside the session"
        )));
    }
    let inverse = snapshot(runtime);
    runtime.reshape(|session| {
        warp::insert_gap(&mut session.store, &mut session.tracks, clock, duration)?;
        session.duration += duration;
        Ok(())
    })?;
    runtime.seek(clock, false)?;
    Ok(inverse)
}

fn crop(runtime: &mut TimelineRuntime, clock: Clock) -> Result<SessionCommand> {
    let duration = runtime.duration();
    if !clock.is_finite() || clock < 0.0 || clock > duration {
        return Err(RuntimeError::Precondition(format!(
            "crop clock {clock} outside [0, {duration}]"
        )));
    }
    let previous_clock = runtime.clock();
    if clock < previous_clock {
        runtime.seek(clock, true)?;
    }
    let (events, tracks) = runtime.reshape(|session| {
        let events = session.store.truncate_after(clock)?;
        let tracks = session.tracks.clone();
        let removed = warp::crop_tracks(&mut session.tracks, clock);
        debug!(clock, events = events.len(), tracks = removed.len(), "crop");
        session.duration = clock;
        Ok((events, tracks))
    })?;
    runtime.seek(clock, false)?;
    Ok(SessionCommand::Uncrop {
        events,
        tracks,
        duration,
        clock: previous_clock,
    })
}

fn uncrop(
    runtime: &mut TimelineRuntime,
    events: Vec<(usize, EventEntry)>,
    tracks: Vec<RangedTrack>,
    duration: Clock,
    clock: Clock,
) -> Result<SessionCommand> {
    let crop_clock = runtime.duration();
    if let Some(&(first, _)) = events.first() {
        runtime.edit_store(first, move |store| {
            for (index, entry) in events {
                store.restore(entry, index)?;
            }
            Ok(())
        })?;
    }
    runtime.reshape(|session| {
        session.tracks = tracks;
        session.duration = duration;
        Ok(())
    })?;
    runtime.seek(clock, false)?;
    Ok(SessionCommand::Crop { clock: crop_clock })
}

fn update_duration(runtime: &mut TimelineRuntime, duration: Clock) -> Result<SessionCommand> {
    let previous = runtime.duration();
    runtime.set_duration(duration)?;
    runtime.seek(duration, false)?;
    Ok(SessionCommand::UpdateDuration { duration: previous })
}

fn restore_timeline(
    runtime: &mut TimelineRuntime,
    clocks: Vec<(EventId, Clock)>,
    tracks: Vec<RangedTrack>,
    duration: Clock,
    clock: Clock,
) -> Result<SessionCommand> {
    let inverse = snapshot(runtime);
    runtime.reshape(|session| {
        session.store.restore_clocks(&clocks)?;
        session.tracks = tracks;
        session.duration = duration;
        Ok(())
    })?;
    runtime.seek(clock, false)?;
    Ok(inverse)
}

/// Undo and redo stacks of command batches. Each entry holds the inverses
/// of one batch in the order they were produced.
#[derive(Debug, Default)]
pub struct CommandHistory {
    undo_stack: Vec<Vec<SessionCommand>>,
    redo_stack: Vec<Vec<SessionCommand>>,
}

impl CommandHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn apply(&mut self, runtime: &mut TimelineRuntime, command: SessionCommand) -> Result<()> {
        self.apply_batch(runtime, vec![command])
    }

    /// Applies `commands` as one undo step. If one fails, the ones already
    /// applied are rolled back before the error is returned.
    pub fn apply_batch(
        &mut self,
        runtime: &mut TimelineRuntime,
        commands: Vec<SessionCommand>,
    ) -> Result<()> {
        if commands.is_empty() {
            return Ok(());
        }
        info!(
            commands = ?commands.iter().map(SessionCommand::name).collect::<Vec<_>>(),
            "apply batch"
        );
        let inverses = run_batch(runtime, commands)?;
        self.undo_stack.push(inverses);
        self.redo_stack.clear();
        Ok(())
    }

    pub fn undo(&mut self, runtime: &mut TimelineRuntime) -> Result<()> {
        let batch = self
            .undo_stack
            .pop()
            .ok_or(RuntimeError::HistoryEmpty("undo stack"))?;
        info!(commands = batch.len(), "undo");
        match run_batch(runtime, batch.iter().rev().cloned().collect()) {
            Ok(inverses) => {
                self.redo_stack.push(inverses);
                Ok(())
            }
            Err(err) => {
                self.undo_stack.push(batch);
                Err(err)
            }
        }
    }

    pub fn redo(&mut self, runtime: &mut TimelineRuntime) -> Result<()> {
        let batch = self
            .redo_stack
            .pop()
            .ok_or(RuntimeError::HistoryEmpty("redo stack"))?;
        info!(commands = batch.len(), "redo");
        match run_batch(runtime, batch.iter().rev().cloned().collect()) {
            Ok(inverses) => {
                self.undo_stack.push(inverses);
                Ok(())
            }
            Err(err) => {
                self.redo_stack.push(batch);
                Err(err)
            }
        }
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }
}

fn run_batch(
    runtime: &mut TimelineRuntime,
    commands: Vec<SessionCommand>,
) -> Result<Vec<SessionCommand>> {
    let mut inverses = Vec::with_capacity(commands.len());
    for command in commands {
        let name = command.name();
        match apply_command(runtime, command) {
            Ok(inverse) => inverses.push(inverse),
            Err(err) => {
                warn!(command = name, error = %err, applied = inverses.len(), "rolling back batch");
                for inverse in inverses.into_iter().rev() {
                    if let Err(rollback) = apply_command(runtime, inverse) {
                        error!(error = %rollback, "batch rollback failed");
                        break;
                    }
                }
                return Err(err);
            }
        }
    }
    Ok(inverses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBackendFactory;
    use crate::{ManualTime, RuntimeConfig};
    use timeline::{FileDesc, FsCreate, Save, Session};

    fn runtime_with(clocks: &[Clock]) -> TimelineRuntime {
        let mut session = Session::new();
        for (i, clock) in clocks.iter().enumerate() {
            session
                .store
                .insert(
                    Uri::from(format!("file:///f{i}.rs")),
                    *clock,
                    EditorEvent::FsCreate(FsCreate {
                        file: FileDesc::Empty,
                    }),
                )
                .unwrap();
        }
        session.duration = clocks.last().copied().unwrap_or(0.0);
        let projector = session.projector();
        let mut runtime = TimelineRuntime::new(
            session,
            projector,
            ManualTime::new(),
            FakeBackendFactory::new(),
            RuntimeConfig::default(),
        );
        runtime.load().unwrap();
        runtime
    }

    #[test]
    fn test_insert_event_inverse_deletes_it() {
        let mut runtime = runtime_with(&[1.0, 2.0, 3.0]);
        runtime.seek(3.0, false).unwrap();
        let inverse = apply_command(
            &mut runtime,
            SessionCommand::InsertEvent {
                uri: Uri::from("file:///new.rs"),
                clock: 1.5,
                event: EditorEvent::FsCreate(FsCreate {
                    file: FileDesc::Empty,
                }),
            },
        )
        .unwrap();
        assert_eq!(runtime.session().store.len(), 4);
        assert!(runtime.worktree().get(&Uri::from("file:///new.rs")).is_some());
        assert_eq!(runtime.projector().event_index(), Some(3));

        apply_command(&mut runtime, inverse).unwrap();
        assert_eq!(runtime.session().store.len(), 3);
        assert!(runtime.worktree().get(&Uri::from("file:///new.rs")).is_none());
        assert_eq!(runtime.projector().event_index(), Some(2));
    }

    #[test]
    fn test_update_event_keeps_clock() {
        let mut runtime = runtime_with(&[1.0, 2.0]);
        let id = runtime.session().store.at(1).unwrap().id;
        let inverse = apply_command(
            &mut runtime,
            SessionCommand::UpdateEvent {
                id,
                event: EditorEvent::Save(Save {}),
            },
        )
        .unwrap();
        assert_eq!(runtime.session().store.get(id).unwrap().event, EditorEvent::Save(Save {}));
        assert_eq!(runtime.session().store.get(id).unwrap().clock, 2.0);
        assert!(matches!(inverse, SessionCommand::UpdateEvent { event: EditorEvent::FsCreate(_), .. }));
    }

    #[test]
    fn test_history_batches_undo_in_reverse() {
        let mut runtime = runtime_with(&[1.0, 2.0, 3.0, 4.0]);
        let mut history = CommandHistory::new();
        history
            .apply_batch(
                &mut runtime,
                vec![
                    SessionCommand::InsertGap {
                        clock: 2.0,
                        duration: 1.0,
                    },
                    SessionCommand::Crop { clock: 4.0 },
                ],
            )
            .unwrap();
        assert_eq!(runtime.duration(), 4.0);
        assert_eq!(runtime.session().store.len(), 3);

        history.undo(&mut runtime).unwrap();
        assert_eq!(runtime.duration(), 4.0);
        let clocks: Vec<Clock> = runtime.session().store.iter().map(|e| e.clock).collect();
        assert_eq!(clocks, vec![1.0, 2.0, 3.0, 4.0]);

        history.redo(&mut runtime).unwrap();
        assert_eq!(runtime.session().store.len(), 3);
        assert!(matches!(
            history.redo(&mut runtime),
            Err(RuntimeError::HistoryEmpty("redo stack"))
        ));
    }

    #[test]
    fn test_failed_batch_rolls_back() {
        let mut runtime = runtime_with(&[1.0, 2.0, 3.0]);
        let mut history = CommandHistory::new();
        let result = history.apply_batch(
            &mut runtime,
            vec![
                SessionCommand::InsertGap {
                    clock: 1.0,
                    duration: 2.0,
                },
                SessionCommand::ChangeSpeed {
                    range: ClockRange::new(0.0, 1.0),
                    factor: -1.0,
                },
            ],
        );
        assert!(result.is_err());
        assert!(!history.can_undo());
        let clocks: Vec<Clock> = runtime.session().store.iter().map(|e| e.clock).collect();
        assert_eq!(clocks, vec![1.0, 2.0, 3.0]);
        assert_eq!(runtime.duration(), 3.0);
    }

    #[test]
    fn test_empty_history() {
        let mut runtime = runtime_with(&[]);
        let mut history = CommandHistory::new();
        assert!(matches!(
            history.undo(&mut runtime),
            Err(RuntimeError::HistoryEmpty("undo stack"))
        ));
    }
}
