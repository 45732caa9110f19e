use thiserror::Error;

use timeline::{TimelineError, TrackId};

mod config;
pub use config::*;
mod clock;
pub use clock::*;
mod player;
pub use player::*;
mod drift;
pub use drift::*;
mod recorder;
pub use recorder::*;
mod runtime;
pub use runtime::*;
mod commands;
pub use commands::*;
mod queue;
pub use queue::*;
mod driver;
pub use driver::*;
pub mod testing;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("precondition failed: {0}")]
    Precondition(String),
    #[error("runtime is in error state")]
    Errored,
    #[error("editor track: {0}")]
    Editor(#[from] TimelineError),
    #[error("track {track}: {source}")]
    Track {
        track: TrackId,
        #[source]
        source: PlayerError,
    },
    #[error("history empty: {0}")]
    HistoryEmpty(&'static str),
    #[error("runtime driver stopped")]
    Stopped,
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
