//! Audio pipeline: a capture lane feeding the decoder and a playback lane
//! draining the encoder, driven by one thread each.
//!
//! Lanes are shared behind mutexes. Lock order is capture before session;
//! the session lock is never held while a lane lock is taken.

pub mod capture;
pub mod geometry;
pub mod orchestrator;
pub mod playback;
pub mod scheduler;

use std::sync::{Mutex, MutexGuard};

pub use capture::{CaptureLane, CaptureState};
pub use geometry::{CaptureGeometry, PlaybackGeometry};
pub use orchestrator::{Pipeline, PipelineHandle};
pub use playback::{PlaybackLane, PlaybackState, PlaybackStep};
pub use scheduler::{ManualScheduler, Scheduler, ThreadScheduler};

/// Lock `mutex`, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("recovering poisoned lock");
            poisoned.into_inner()
        }
    }
}
