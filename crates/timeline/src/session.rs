use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};
use tracing::info;
use uuid::Uuid;

use crate::codec::{self, EventLog, LoggedEvent, CURRENT_FORMAT_VERSION};
use crate::{
    Clock, EventStore, InMemoryStepper, MemoryBlobStore, RangedTrack, Result, TimelineError,
    TrackId, WorkspaceProjector,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A recorded session: the editor event log plus its media tracks.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub format_version: u32,
    pub duration: Clock,
    pub store: EventStore,
    pub tracks: Vec<RangedTrack>,
    pub blobs: BTreeMap<String, String>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: SessionId::new(),
            format_version: CURRENT_FORMAT_VERSION,
            duration: 0.0,
            store: EventStore::new(),
            tracks: Vec::new(),
            blobs: BTreeMap::new(),
        }
    }

    pub fn from_log(mut log: EventLog) -> codec::Result<Self> {
        log.normalize()?;
        let mut store = EventStore::new();
        let mut events = log.events.into_iter().peekable();
        while let Some(first) = events.next() {
            let mut run = vec![(first.clock, first.event)];
            while let Some(next) = events.next_if(|e| e.uri == first.uri) {
                run.push((next.clock, next.event));
            }
            store.insert_many_for_uri(&first.uri, run)?;
        }
        let last = store.last_clock().unwrap_or(0.0);
        let session = Self {
            id: log.session_id.unwrap_or_default(),
            format_version: log.format_version,
            duration: log.duration.max(last),
            store,
            tracks: log.tracks,
            blobs: log.blobs,
        };
        info!(
            session = %session.id,
            events = session.store.len(),
            tracks = session.tracks.len(),
            duration = session.duration,
            "loaded session"
        );
        Ok(session)
    }

    pub fn to_log(&self) -> EventLog {
        EventLog {
            format_version: self.format_version,
            session_id: Some(self.id),
            duration: self.duration,
            events: self
                .store
                .iter()
                .map(|e| LoggedEvent {
                    uri: e.uri.clone(),
                    clock: e.clock,
                    event: e.event.clone(),
                })
                .collect(),
            tracks: self.tracks.clone(),
            blobs: self.blobs.clone(),
        }
    }

    /// In-memory projector positioned before the first event.
    pub fn projector(&self) -> WorkspaceProjector {
        let mut blobs = MemoryBlobStore::new();
        for (sha1, text) in &self.blobs {
            blobs.insert(sha1.clone(), text.clone());
        }
        WorkspaceProjector::new(InMemoryStepper::new(blobs))
    }

    pub fn track(&self, id: TrackId) -> Option<&RangedTrack> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub fn track_index(&self, id: TrackId) -> Result<usize> {
        self.tracks
            .iter()
            .position(|t| t.id == id)
            .ok_or(TimelineError::TrackNotFound(id))
    }

    pub fn extend_duration(&mut self, clock: Clock) {
        if clock > self.duration {
            self.duration = clock;
        }
    }
}
