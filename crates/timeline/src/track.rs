use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::Clock;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct TrackId(pub Uuid);

impl TrackId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TrackId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Half-open span `[start, end)` of the master timeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct ClockRange {
    pub start: Clock,
    pub end: Clock,
}

impl ClockRange {
    pub const fn new(start: Clock, end: Clock) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> Clock {
        (self.end - self.start).max(0.0)
    }

    pub fn contains(&self, clock: Clock) -> bool {
        self.start <= clock && clock < self.end
    }

    /// Length of the intersection with `other`.
    pub fn overlap(&self, other: &ClockRange) -> Clock {
        (self.end.min(other.end) - self.start.max(other.start)).max(0.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Audio,
    Video,
}

/// An audio or video clip placed on the master timeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RangedTrack {
    pub id: TrackId,
    pub kind: TrackKind,
    pub title: String,
    pub range: ClockRange,
    /// Media reference handed to the backend, e.g. a path or blob key.
    pub src: String,
}

impl RangedTrack {
    pub fn new(kind: TrackKind, src: impl Into<String>, range: ClockRange) -> Self {
        let src = src.into();
        Self {
            id: TrackId::new(),
            kind,
            title: src.clone(),
            range,
            src,
        }
    }

    pub fn audio(src: impl Into<String>, range: ClockRange) -> Self {
        Self::new(TrackKind::Audio, src, range)
    }

    pub fn video(src: impl Into<String>, range: ClockRange) -> Self {
        Self::new(TrackKind::Video, src, range)
    }

    pub fn in_range(&self, clock: Clock) -> bool {
        self.range.contains(clock)
    }

    /// Position inside the clip that corresponds to the master `clock`.
    pub fn local_clock(&self, clock: Clock) -> Clock {
        clock - self.range.start
    }
}

/// The video track that plays at `clock`: the last declared one whose range
/// contains it.
pub fn video_track_at(tracks: &[RangedTrack], clock: Clock) -> Option<&RangedTrack> {
    tracks
        .iter()
        .rev()
        .find(|t| t.kind == TrackKind::Video && t.in_range(clock))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_is_half_open() {
        let range = ClockRange::new(10.0, 20.0);
        assert!(range.contains(10.0));
        assert!(range.contains(19.99));
        assert!(!range.contains(20.0));
        assert_eq!(range.overlap(&ClockRange::new(0.0, 15.0)), 5.0);
        assert_eq!(range.overlap(&ClockRange::new(25.0, 30.0)), 0.0);
    }

    #[test]
    fn test_overlapping_video_prefers_last() {
        let tracks = vec![
            RangedTrack::video("a.mp4", ClockRange::new(0.0, 10.0)),
            RangedTrack::audio("voice.ogg", ClockRange::new(0.0, 30.0)),
            RangedTrack::video("b.mp4", ClockRange::new(5.0, 15.0)),
        ];
        assert_eq!(video_track_at(&tracks, 7.0).map(|t| t.src.as_str()), Some("b.mp4"));
        assert_eq!(video_track_at(&tracks, 3.0).map(|t| t.src.as_str()), Some("a.mp4"));
        assert!(video_track_at(&tracks, 15.0).is_none());
    }
}
