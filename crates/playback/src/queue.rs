use crossbeam_channel::Sender;
use std::collections::VecDeque;
use tracing::debug;

use timeline::{Clock, Worktree};

use crate::{Result, RuntimeMode, SessionCommand};

pub type Reply<T> = Sender<Result<T>>;

/// Point-in-time view of a runtime served by the driver.
#[derive(Debug, Clone)]
pub struct RuntimeSnapshot {
    pub mode: RuntimeMode,
    pub clock: Clock,
    pub duration: Clock,
    pub event_index: Option<usize>,
    pub worktree: Worktree,
    pub can_undo: bool,
    pub can_redo: bool,
}

pub enum Request {
    Load(Reply<()>),
    Play(Reply<()>),
    Pause(Reply<()>),
    Record(Reply<()>),
    Seek { clock: Clock, reply: Reply<()> },
    Apply {
        commands: Vec<SessionCommand>,
        reply: Reply<()>,
    },
    Undo(Reply<()>),
    Redo(Reply<()>),
    Snapshot(Sender<RuntimeSnapshot>),
    Shutdown,
}

/// Pending driver requests in arrival order. A seek queued directly behind
/// another seek replaces it; the superseded caller is answered `Ok` since
/// its position was never observable.
#[derive(Default)]
pub struct RequestQueue {
    pending: VecDeque<Request>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, request: Request) {
        if let Request::Seek { clock, reply } = request {
            if let Some(Request::Seek {
                clock: queued,
                reply: superseded,
            }) = self.pending.back_mut()
            {
                debug!(from = *queued, to = clock, "coalescing seek");
                *queued = clock;
                let superseded = std::mem::replace(superseded, reply);
                let _ = superseded.send(Ok(()));
                return;
            }
            self.pending.push_back(Request::Seek { clock, reply });
            return;
        }
        self.pending.push_back(request);
    }

    pub fn pop(&mut self) -> Option<Request> {
        self.pending.pop_front()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    #[test]
    fn test_back_to_back_seeks_coalesce() {
        let mut queue = RequestQueue::new();
        let (first_tx, first_rx) = bounded(1);
        let (second_tx, _second_rx) = bounded(1);
        queue.push(Request::Seek {
            clock: 1.0,
            reply: first_tx,
        });
        queue.push(Request::Seek {
            clock: 4.0,
            reply: second_tx,
        });
        assert_eq!(queue.len(), 1);
        assert!(matches!(first_rx.try_recv(), Ok(Ok(()))));
        assert!(matches!(queue.pop(), Some(Request::Seek { clock, .. }) if clock == 4.0));
    }

    #[test]
    fn test_other_requests_break_coalescing() {
        let mut queue = RequestQueue::new();
        let (tx, _rx) = bounded(4);
        queue.push(Request::Seek {
            clock: 1.0,
            reply: tx.clone(),
        });
        queue.push(Request::Play(tx.clone()));
        queue.push(Request::Seek { clock: 2.0, reply: tx });
        assert_eq!(queue.len(), 3);
        assert!(matches!(queue.pop(), Some(Request::Seek { clock, .. }) if clock == 1.0));
        assert!(matches!(queue.pop(), Some(Request::Play(_))));
    }
}
