//! Delayed actions. The pipeline uses one: resuming capture after a
//! transmission's cooldown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

pub type Action = Box<dyn FnOnce() + Send + 'static>;

pub trait Scheduler: Send + Sync {
    /// Run `action` once after `delay`, unless the scheduler is torn down
    /// first.
    fn schedule(&self, delay: Duration, action: Action);
}

/// Runs each action on its own sleeping thread.
pub struct ThreadScheduler {
    running: Arc<AtomicBool>,
}

impl ThreadScheduler {
    /// Actions are dropped unexecuted once `running` clears.
    pub fn new(running: Arc<AtomicBool>) -> Self {
        Self { running }
    }
}

impl Scheduler for ThreadScheduler {
    fn schedule(&self, delay: Duration, action: Action) {
        let running = self.running.clone();
        let spawned = thread::Builder::new()
            .name("chirpgram-cooldown".to_string())
            .spawn(move || {
                thread::sleep(delay);
                if running.load(Ordering::SeqCst) {
                    action();
                }
            });
        if let Err(e) = spawned {
            tracing::error!("failed to spawn cooldown thread: {}", e);
        }
    }
}

/// Holds actions until a test fires them.
#[derive(Default)]
pub struct ManualScheduler {
    pending: Mutex<Vec<(Duration, Action)>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays of the actions waiting to run.
    pub fn pending(&self) -> Vec<Duration> {
        crate::pipeline::lock(&self.pending)
            .iter()
            .map(|(delay, _)| *delay)
            .collect()
    }

    /// Run every pending action; returns how many ran.
    pub fn fire_all(&self) -> usize {
        let actions = std::mem::take(&mut *crate::pipeline::lock(&self.pending));
        let count = actions.len();
        for (_, action) in actions {
            action();
        }
        count
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, action: Action) {
        crate::pipeline::lock(&self.pending).push((delay, action));
    }
}
