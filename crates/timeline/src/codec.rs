//! Serialization boundary: the full event log and its compact encoding.
//!
//! Both encodings are JSON. The compact form interns resource uris into a
//! table and stores clocks as integer tenths of a second.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::debug;

use crate::{Clock, EditorEvent, RangedTrack, SessionId, TimelineError, Uri};

/// Format written by this crate.
pub const CURRENT_FORMAT_VERSION: u32 = 2;
/// Oldest format still accepted; its editor reversal targets the other editor.
pub const LEGACY_FORMAT_VERSION: u32 = 1;

/// Compact clocks are stored as integer multiples of `1 / COMPACT_CLOCK_SCALE` s.
pub const COMPACT_CLOCK_SCALE: Clock = 10.0;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u32),
    #[error("uri index {index} out of table (len {len})")]
    UnknownUri { index: u32, len: usize },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Timeline(#[from] TimelineError),
}

pub type Result<T> = std::result::Result<T, CodecError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedEvent {
    pub uri: Uri,
    pub clock: Clock,
    pub event: EditorEvent,
}

/// Ordered export of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLog {
    pub format_version: u32,
    #[serde(default)]
    pub session_id: Option<SessionId>,
    #[serde(default)]
    pub duration: Clock,
    pub events: Vec<LoggedEvent>,
    #[serde(default)]
    pub tracks: Vec<RangedTrack>,
    /// Blob text keyed by sha1, for `FileDesc::Blob` descriptors.
    #[serde(default)]
    pub blobs: BTreeMap<String, String>,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            format_version: CURRENT_FORMAT_VERSION,
            session_id: None,
            duration: 0.0,
            events: Vec::new(),
            tracks: Vec::new(),
            blobs: BTreeMap::new(),
        }
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let mut log: EventLog = serde_json::from_str(s)?;
        log.normalize()?;
        Ok(log)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Checks the version and fills defaults that older recorders left out.
    pub fn normalize(&mut self) -> Result<()> {
        check_version(self.format_version)?;
        for logged in &mut self.events {
            fill_recorder_version(&mut logged.event, self.format_version);
        }
        Ok(())
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactEvent {
    /// Index into [`CompactLog::uris`].
    pub u: u32,
    /// Clock in tenths of a second.
    pub c: i64,
    pub e: EditorEvent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactLog {
    pub format_version: u32,
    #[serde(default)]
    pub session_id: Option<SessionId>,
    #[serde(default)]
    pub duration: Clock,
    pub uris: Vec<Uri>,
    pub events: Vec<CompactEvent>,
    #[serde(default)]
    pub tracks: Vec<RangedTrack>,
    #[serde(default)]
    pub blobs: BTreeMap<String, String>,
}

impl CompactLog {
    pub fn from_json_str(s: &str) -> Result<Self> {
        let log: CompactLog = serde_json::from_str(s)?;
        check_version(log.format_version)?;
        Ok(log)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

pub fn encode_compact(log: &EventLog) -> CompactLog {
    let mut uris = Vec::new();
    let mut table: HashMap<Uri, u32> = HashMap::new();
    let events = log
        .events
        .iter()
        .map(|logged| {
            let u = *table.entry(logged.uri.clone()).or_insert_with(|| {
                uris.push(logged.uri.clone());
                (uris.len() - 1) as u32
            });
            CompactEvent {
                u,
                c: quantize(logged.clock),
                e: logged.event.clone(),
            }
        })
        .collect();
    debug!(events = log.events.len(), uris = uris.len(), "encoded compact log");
    CompactLog {
        format_version: log.format_version,
        session_id: log.session_id,
        duration: log.duration,
        uris,
        events,
        tracks: log.tracks.clone(),
        blobs: log.blobs.clone(),
    }
}

pub fn decode_compact(compact: &CompactLog) -> Result<EventLog> {
    let events = compact
        .events
        .iter()
        .map(|e| {
            let uri = compact
                .uris
                .get(e.u as usize)
                .cloned()
                .ok_or(CodecError::UnknownUri {
                    index: e.u,
                    len: compact.uris.len(),
                })?;
            Ok(LoggedEvent {
                uri,
                clock: e.c as Clock / COMPACT_CLOCK_SCALE,
                event: e.e.clone(),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let mut log = EventLog {
        format_version: compact.format_version,
        session_id: compact.session_id,
        duration: compact.duration,
        events,
        tracks: compact.tracks.clone(),
        blobs: compact.blobs.clone(),
    };
    log.normalize()?;
    Ok(log)
}

fn quantize(clock: Clock) -> i64 {
    (clock * COMPACT_CLOCK_SCALE).round() as i64
}

fn check_version(version: u32) -> Result<()> {
    if !(LEGACY_FORMAT_VERSION..=CURRENT_FORMAT_VERSION).contains(&version) {
        return Err(CodecError::UnsupportedVersion(version));
    }
    Ok(())
}

fn fill_recorder_version(event: &mut EditorEvent, format_version: u32) {
    if let EditorEvent::ShowTextEditor(show) = event {
        if show.recorder_version == 0 {
            show.recorder_version = format_version;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEGACY: &str = r#"{
        "format_version": 1,
        "duration": 4.0,
        "events": [
            {"uri": "file:///a.rs", "clock": 0.0,
             "event": {"type": "open_text_document", "text": "fn a() {}", "eol": "lf", "language_id": "rust"}},
            {"uri": "file:///a.rs", "clock": 1.25,
             "event": {"type": "show_text_editor", "selections": [], "visible_range": {"start": 0, "end": 1}}}
        ]
    }"#;

    #[test]
    fn test_legacy_defaults() {
        let log = EventLog::from_json_str(LEGACY).unwrap();
        let EditorEvent::ShowTextEditor(show) = &log.events[1].event else {
            panic!("expected show_text_editor");
        };
        assert!(show.activate);
        assert_eq!(show.recorder_version, 1);
        assert!(log.tracks.is_empty());
    }

    #[test]
    fn test_compact_interns_uris() {
        let mut log = EventLog::from_json_str(LEGACY).unwrap();
        log.events.push(log.events[0].clone());
        log.events[2].uri = Uri::from("file:///b.rs");
        let compact = encode_compact(&log);
        assert_eq!(compact.uris.len(), 2);
        assert_eq!(compact.events[1].c, 13);
        assert_eq!(compact.events[2].u, 1);
    }

    #[test]
    fn test_unknown_uri_index() {
        let compact = CompactLog {
            format_version: CURRENT_FORMAT_VERSION,
            session_id: None,
            duration: 0.0,
            uris: vec![],
            events: vec![CompactEvent {
                u: 3,
                c: 0,
                e: EditorEvent::Save(crate::Save {}),
            }],
            tracks: vec![],
            blobs: BTreeMap::new(),
        };
        assert!(matches!(
            decode_compact(&compact),
            Err(CodecError::UnknownUri { index: 3, .. })
        ));
    }

    #[test]
    fn test_rejects_unknown_version_and_tag() {
        let err = EventLog::from_json_str(r#"{"format_version": 9, "events": []}"#);
        assert!(matches!(err, Err(CodecError::UnsupportedVersion(9))));
        let err = EventLog::from_json_str(
            r#"{"format_version": 2, "events": [{"uri": "a", "clock": 0, "event": {"type": "teleport"}}]}"#,
        );
        assert!(matches!(err, Err(CodecError::Json(_))));
    }
}
