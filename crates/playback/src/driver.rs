//! Threaded owner of one [`TimelineRuntime`].
//!
//! Every mutation of the runtime happens on the driver thread, one request
//! at a time, so seeks, commands and ticks never interleave.

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::{thread, time::Duration};
use tracing::{debug, info, warn};

use timeline::Clock;

use crate::{
    CommandHistory, Reply, Request, RequestQueue, Result, RuntimeError, RuntimeEvent,
    RuntimeSnapshot, SessionCommand, TimelineRuntime,
};

pub struct RuntimeDriver;

impl RuntimeDriver {
    pub fn spawn(mut runtime: TimelineRuntime) -> std::io::Result<RuntimeHandle> {
        let (tx, rx) = unbounded::<Request>();
        let events = runtime.subscribe();
        let thread = thread::Builder::new()
            .name("timeline-runtime".into())
            .spawn(move || drive(runtime, rx))?;
        Ok(RuntimeHandle {
            tx,
            events,
            thread: Some(thread),
        })
    }
}

/// Caller side of a driven runtime. Dropping it shuts the driver down.
pub struct RuntimeHandle {
    tx: Sender<Request>,
    pub events: Receiver<RuntimeEvent>,
    thread: Option<thread::JoinHandle<()>>,
}

impl RuntimeHandle {
    pub fn load(&self) -> Result<()> {
        self.call(Request::Load)
    }

    pub fn play(&self) -> Result<()> {
        self.call(Request::Play)
    }

    pub fn pause(&self) -> Result<()> {
        self.call(Request::Pause)
    }

    pub fn record(&self) -> Result<()> {
        self.call(Request::Record)
    }

    pub fn seek(&self, clock: Clock) -> Result<()> {
        self.call(|reply| Request::Seek { clock, reply })
    }

    pub fn apply(&self, command: SessionCommand) -> Result<()> {
        self.apply_batch(vec![command])
    }

    pub fn apply_batch(&self, commands: Vec<SessionCommand>) -> Result<()> {
        self.call(|reply| Request::Apply { commands, reply })
    }

    pub fn undo(&self) -> Result<()> {
        self.call(Request::Undo)
    }

    pub fn redo(&self) -> Result<()> {
        self.call(Request::Redo)
    }

    pub fn snapshot(&self) -> Result<RuntimeSnapshot> {
        let (reply, rx) = bounded(1);
        self.tx
            .send(Request::Snapshot(reply))
            .map_err(|_| RuntimeError::Stopped)?;
        rx.recv().map_err(|_| RuntimeError::Stopped)
    }

    /// Sends a request without waiting, e.g. for fire-and-forget scrubbing.
    /// The reply is discarded.
    pub fn seek_detached(&self, clock: Clock) -> Result<()> {
        let (reply, _) = bounded(1);
        self.tx
            .send(Request::Seek { clock, reply })
            .map_err(|_| RuntimeError::Stopped)
    }

    pub fn shutdown(mut self) {
        self.stop();
    }

    fn call(&self, make: impl FnOnce(Reply<()>) -> Request) -> Result<()> {
        let (reply, rx) = bounded(1);
        self.tx.send(make(reply)).map_err(|_| RuntimeError::Stopped)?;
        rx.recv().map_err(|_| RuntimeError::Stopped)?
    }

    fn stop(&mut self) {
        let _ = self.tx.send(Request::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("timeline runtime thread panicked");
            }
        }
    }
}

impl Drop for RuntimeHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn drive(mut runtime: TimelineRuntime, rx: Receiver<Request>) {
    info!("timeline runtime driver started");
    let mut history = CommandHistory::new();
    let mut queue = RequestQueue::new();
    loop {
        match runtime.next_tick_at() {
            Some(due) => {
                let wait = Duration::from_secs_f64((due - runtime.now()).max(0.0));
                crossbeam_channel::select! {
                    recv(rx) -> msg => match msg {
                        Ok(request) => queue.push(request),
                        Err(_) => break,
                    },
                    default(wait) => {}
                }
            }
            None => match rx.recv() {
                Ok(request) => queue.push(request),
                Err(_) => break,
            },
        }
        // Whatever else already arrived joins the queue so seeks coalesce.
        for request in rx.try_iter() {
            queue.push(request);
        }

        while let Some(request) = queue.pop() {
            if !serve(&mut runtime, &mut history, request) {
                info!("timeline runtime driver stopped");
                return;
            }
        }

        if runtime.next_tick_at().is_some_and(|due| runtime.now() >= due) {
            if let Err(err) = runtime.tick() {
                debug!(error = %err, "scheduled tick failed");
            }
        }
    }
    info!("timeline runtime driver stopped");
}

/// Runs one request to completion. Returns false on shutdown.
fn serve(runtime: &mut TimelineRuntime, history: &mut CommandHistory, request: Request) -> bool {
    match request {
        Request::Load(reply) => {
            let _ = reply.send(runtime.load());
        }
        Request::Play(reply) => {
            let _ = reply.send(runtime.play());
        }
        Request::Pause(reply) => {
            let _ = reply.send(runtime.pause());
        }
        Request::Record(reply) => {
            let _ = reply.send(runtime.record());
        }
        Request::Seek { clock, reply } => {
            let _ = reply.send(runtime.seek(clock, false));
        }
        Request::Apply { commands, reply } => {
            let _ = reply.send(history.apply_batch(runtime, commands));
        }
        Request::Undo(reply) => {
            let _ = reply.send(history.undo(runtime));
        }
        Request::Redo(reply) => {
            let _ = reply.send(history.redo(runtime));
        }
        Request::Snapshot(reply) => {
            let _ = reply.send(RuntimeSnapshot {
                mode: runtime.mode(),
                clock: runtime.clock(),
                duration: runtime.duration(),
                event_index: runtime.projector().event_index(),
                worktree: runtime.worktree().clone(),
                can_undo: history.can_undo(),
                can_redo: history.can_redo(),
            });
        }
        Request::Shutdown => {
            if let Err(err) = runtime.pause() {
                debug!(error = %err, "pause on shutdown failed");
            }
            return false;
        }
    }
    true
}
