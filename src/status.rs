//! One-line session status: a persistent message plus an optional transient
//! notice that falls back to the persistent one after a hold period.

use crate::clock::{Clock, SystemClock};
use crate::defaults;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct StatusLine {
    persistent: String,
    notice: Option<(String, Instant)>,
    hold: Duration,
    clock: Arc<dyn Clock>,
}

impl StatusLine {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            persistent: String::new(),
            notice: None,
            hold: defaults::STATUS_NOTICE_HOLD,
            clock,
        }
    }

    pub fn with_hold(mut self, hold: Duration) -> Self {
        self.hold = hold;
        self
    }

    /// Replace the persistent status. Clears any pending notice.
    pub fn set(&mut self, status: impl Into<String>) {
        self.persistent = status.into();
        self.notice = None;
    }

    /// Show a transient notice; it expires after the hold period.
    pub fn notify(&mut self, notice: impl Into<String>) {
        let expires = self.clock.now() + self.hold;
        self.notice = Some((notice.into(), expires));
    }

    /// What should be displayed right now.
    pub fn current(&self) -> &str {
        match &self.notice {
            Some((notice, expires)) if self.clock.now() < *expires => notice,
            _ => &self.persistent,
        }
    }

    pub fn persistent(&self) -> &str {
        &self.persistent
    }
}

impl Default for StatusLine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StatusLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusLine")
            .field("persistent", &self.persistent)
            .field("notice", &self.notice.as_ref().map(|(n, _)| n))
            .finish()
    }
}
