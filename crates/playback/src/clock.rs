use parking_lot::Mutex;
use std::{sync::Arc, time::Instant};

use timeline::Clock;

/// Monotonic seconds used to advance the master clock.
pub trait TimeSource: Send {
    fn now(&self) -> f64;
}

#[derive(Debug, Clone)]
pub struct WallClock {
    origin: Instant,
}

impl WallClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for WallClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Settable time source; clones share the same reading.
#[derive(Debug, Clone, Default)]
pub struct ManualTime(Arc<Mutex<f64>>);

impl ManualTime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, seconds: f64) {
        *self.0.lock() = seconds;
    }

    pub fn advance(&self, seconds: f64) {
        *self.0.lock() += seconds;
    }
}

impl TimeSource for ManualTime {
    fn now(&self) -> f64 {
        *self.0.lock()
    }
}

/// Master timeline position, anchored to a time source reading while running.
#[derive(Debug, Default, Clone)]
pub struct MasterClock {
    running: bool,
    anchor_time: f64,
    anchor_clock: Clock,
}

impl MasterClock {
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn start(&mut self, clock: Clock, now: f64) {
        self.running = true;
        self.anchor_clock = clock;
        self.anchor_time = now;
    }

    pub fn stop(&mut self, now: f64) -> Clock {
        let clock = self.now(now);
        self.running = false;
        self.anchor_clock = clock;
        clock
    }

    pub fn now(&self, now: f64) -> Clock {
        if self.running {
            self.anchor_clock + (now - self.anchor_time).max(0.0)
        } else {
            self.anchor_clock
        }
    }

    /// Re-anchors without changing running state.
    pub fn seek_to(&mut self, clock: Clock, now: f64) {
        self.anchor_clock = clock;
        self.anchor_time = now;
    }
}
