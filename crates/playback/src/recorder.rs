use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::debug;

use timeline::{EditorEvent, Uri};

#[derive(Debug, Clone, PartialEq)]
pub struct CapturedEvent {
    pub uri: Uri,
    pub event: EditorEvent,
}

/// Capture side of the editor track. The runtime stamps captured events
/// with the master clock when it drains them.
pub trait EditorRecorder: Send {
    fn start(&mut self);
    fn pause(&mut self);
    fn is_recording(&self) -> bool;
    fn take_events(&mut self) -> Vec<CapturedEvent>;
}

/// Handle the host editor integration pushes captured events into.
#[derive(Debug, Clone)]
pub struct RecorderSink {
    tx: Sender<CapturedEvent>,
}

impl RecorderSink {
    /// Returns false once the recorder is gone.
    pub fn send(&self, uri: Uri, event: EditorEvent) -> bool {
        self.tx.send(CapturedEvent { uri, event }).is_ok()
    }
}

pub struct ChannelRecorder {
    rx: Receiver<CapturedEvent>,
    recording: bool,
}

impl ChannelRecorder {
    pub fn pair() -> (Self, RecorderSink) {
        let (tx, rx) = unbounded();
        (
            Self {
                rx,
                recording: false,
            },
            RecorderSink { tx },
        )
    }
}

impl EditorRecorder for ChannelRecorder {
    fn start(&mut self) {
        // Anything sent while paused belongs to no clock.
        let dropped = self.rx.try_iter().count();
        if dropped > 0 {
            debug!(dropped, "discarding events captured while paused");
        }
        self.recording = true;
    }

    fn pause(&mut self) {
        self.recording = false;
    }

    fn is_recording(&self) -> bool {
        self.recording
    }

    fn take_events(&mut self) -> Vec<CapturedEvent> {
        if !self.recording {
            return Vec::new();
        }
        self.rx.try_iter().collect()
    }
}
