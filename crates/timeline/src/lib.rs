use thiserror::Error;

mod model;
pub use model::*;
mod event;
pub use event::*;
mod store;
pub use store::*;
mod document;
pub use document::*;
mod worktree;
pub use worktree::*;
mod stepper;
pub use stepper::*;
mod projector;
pub use projector::*;
mod track;
pub use track::*;
pub mod warp;
mod session;
pub use session::*;
pub mod codec;

#[derive(Debug, Error)]
pub enum TimelineError {
    #[error("invalid operation: {0}")]
    InvalidOp(String),
    #[error("resource not in worktree: {0}")]
    MissingResource(Uri),
    #[error("no open document for {0}")]
    MissingDocument(Uri),
    #[error("no open editor for {0}")]
    MissingEditor(Uri),
    #[error("resource already has {facet}: {uri}")]
    FacetExists { uri: Uri, facet: &'static str },
    #[error("unknown blob: {0}")]
    MissingBlob(String),
    #[error("event store desync for event {0}")]
    StoreDesync(EventId),
    #[error("event not found: {0}")]
    EventNotFound(EventId),
    #[error("event clock {clock} breaks store ordering at index {index}")]
    ClockOrder { index: usize, clock: Clock },
    #[error("index {index} out of bounds (len {len})")]
    IndexOutOfBounds { index: usize, len: usize },
    #[error("range {0:?} out of document bounds")]
    RangeOutOfBounds(Range),
    #[error("track not found: {0}")]
    TrackNotFound(TrackId),
    #[error("track already exists: {0}")]
    TrackExists(TrackId),
}

pub type Result<T> = std::result::Result<T, TimelineError>;

/// Seconds since session start.
pub type Clock = f64;
