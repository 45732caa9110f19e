//! Time-warp edits over the event store and track list.
//!
//! These functions only reshape clocks; undo is handled by the caller
//! snapshotting clocks and tracks beforehand.

use tracing::debug;

use crate::{Clock, ClockRange, EventStore, RangedTrack, Result, TimelineError};

/// Clock of an event originally at `clock` once `range` plays at `factor`x.
/// An infinite factor collapses the range to zero length.
pub fn speed_warp(clock: Clock, range: &ClockRange, factor: f64) -> Clock {
    let elapsed = range.overlap(&ClockRange::new(0.0, clock));
    clock + elapsed * (factor.recip() - 1.0)
}

fn check_factor(factor: f64) -> Result<()> {
    if factor.is_nan() || factor <= 0.0 {
        return Err(TimelineError::InvalidOp(format!(
            "speed factor must be positive, got {factor}"
        )));
    }
    Ok(())
}

fn check_range(range: &ClockRange) -> Result<()> {
    if !(range.start.is_finite() && range.end.is_finite()) || range.start < 0.0 || range.end < range.start {
        return Err(TimelineError::InvalidOp(format!("invalid range {range:?}")));
    }
    Ok(())
}

/// Re-times every event after `range.start`. Tracks that begin at or after
/// the end of the range move with the events; tracks overlapping it keep
/// their place since media plays at its own rate.
pub fn change_speed(
    store: &mut EventStore,
    tracks: &mut [RangedTrack],
    range: &ClockRange,
    factor: f64,
) -> Result<()> {
    check_factor(factor)?;
    check_range(range)?;
    debug!(start = range.start, end = range.end, factor, "change speed");
    store.map_clocks(|e| speed_warp(e.clock, range, factor))?;
    for track in tracks.iter_mut().filter(|t| t.range.start >= range.end) {
        let duration = track.range.duration();
        track.range.start = speed_warp(track.range.start, range, factor);
        track.range.end = track.range.start + duration;
    }
    Ok(())
}

/// Speed change with an infinite factor.
pub fn merge(store: &mut EventStore, tracks: &mut [RangedTrack], range: &ClockRange) -> Result<()> {
    change_speed(store, tracks, range, f64::INFINITY)
}

/// Pushes every event and track starting at or after `clock` later by `duration`.
pub fn insert_gap(
    store: &mut EventStore,
    tracks: &mut [RangedTrack],
    clock: Clock,
    duration: Clock,
) -> Result<()> {
    if !duration.is_finite() || duration < 0.0 {
        return Err(TimelineError::InvalidOp(format!("invalid gap duration {duration}")));
    }
    debug!(clock, duration, "insert gap");
    store.map_clocks(|e| if e.clock >= clock { e.clock + duration } else { e.clock })?;
    for track in tracks.iter_mut().filter(|t| t.range.start >= clock) {
        track.range.start += duration;
        track.range.end += duration;
    }
    Ok(())
}

/// Cuts tracks at `clock`: tracks starting at or after it are removed and
/// returned with their former positions, the rest end no later than `clock`.
pub fn crop_tracks(tracks: &mut Vec<RangedTrack>, clock: Clock) -> Vec<(usize, RangedTrack)> {
    let mut removed = Vec::new();
    let mut kept = Vec::with_capacity(tracks.len());
    for (index, mut track) in tracks.drain(..).enumerate() {
        if track.range.start >= clock {
            removed.push((index, track));
        } else {
            track.range.end = track.range.end.min(clock);
            kept.push(track);
        }
    }
    *tracks = kept;
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EditorEvent, Save, Uri};

    fn store_with(clocks: &[Clock]) -> EventStore {
        let mut store = EventStore::new();
        for c in clocks {
            store.insert(Uri::from("a"), *c, EditorEvent::Save(Save {})).unwrap();
        }
        store
    }

    fn clocks(store: &EventStore) -> Vec<Clock> {
        store.iter().map(|e| e.clock).collect()
    }

    #[test]
    fn test_speed_up_range() {
        let range = ClockRange::new(10.0, 20.0);
        assert_eq!(speed_warp(5.0, &range, 2.0), 5.0);
        assert_eq!(speed_warp(15.0, &range, 2.0), 12.5);
        assert_eq!(speed_warp(25.0, &range, 2.0), 20.0);
    }

    #[test]
    fn test_merge_collapses_range() {
        let mut store = store_with(&[5.0, 12.0, 18.0, 30.0]);
        merge(&mut store, &mut [], &ClockRange::new(10.0, 20.0)).unwrap();
        assert_eq!(clocks(&store), vec![5.0, 10.0, 10.0, 20.0]);
        store.verify().unwrap();
    }

    #[test]
    fn test_change_speed_moves_later_tracks() {
        let mut store = store_with(&[15.0, 25.0]);
        let mut tracks = vec![
            RangedTrack::audio("early.ogg", ClockRange::new(0.0, 12.0)),
            RangedTrack::audio("late.ogg", ClockRange::new(22.0, 30.0)),
        ];
        change_speed(&mut store, &mut tracks, &ClockRange::new(10.0, 20.0), 2.0).unwrap();
        assert_eq!(clocks(&store), vec![12.5, 20.0]);
        assert_eq!(tracks[0].range, ClockRange::new(0.0, 12.0));
        assert_eq!(tracks[1].range, ClockRange::new(17.0, 25.0));
    }

    #[test]
    fn test_rejects_bad_factor() {
        let mut store = store_with(&[1.0]);
        assert!(change_speed(&mut store, &mut [], &ClockRange::new(0.0, 2.0), 0.0).is_err());
        assert!(change_speed(&mut store, &mut [], &ClockRange::new(3.0, 2.0), 2.0).is_err());
    }

    #[test]
    fn test_insert_gap() {
        let mut store = store_with(&[1.0, 2.0, 3.0]);
        let mut tracks = vec![RangedTrack::video("v.mp4", ClockRange::new(2.0, 4.0))];
        insert_gap(&mut store, &mut tracks, 2.0, 10.0).unwrap();
        assert_eq!(clocks(&store), vec![1.0, 12.0, 13.0]);
        assert_eq!(tracks[0].range, ClockRange::new(12.0, 14.0));
    }

    #[test]
    fn test_crop_tracks() {
        let mut tracks = vec![
            RangedTrack::audio("a.ogg", ClockRange::new(0.0, 20.0)),
            RangedTrack::audio("b.ogg", ClockRange::new(12.0, 20.0)),
        ];
        let removed = crop_tracks(&mut tracks, 10.0);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].0, 1);
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].range.end, 10.0);
    }
}
