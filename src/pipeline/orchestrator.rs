//! Runtime that drives both lanes from startup until shutdown.
//!
//! One thread services capture triggers and one services playback
//! triggers. Each thread holds its lane's lock for a single non-blocking
//! step and sleeps with the lock released whenever its device has nothing
//! ready, so control calls never queue behind a device wait.

use crate::audio::device::AudioBackend;
use crate::config::SessionConfig;
use crate::defaults::RESUME_COOLDOWN;
use crate::error::{ChirpError, Result};
use crate::modem::Modem;
use crate::pipeline::capture::{CaptureLane, CaptureState};
use crate::pipeline::lock;
use crate::pipeline::playback::{PlaybackLane, PlaybackState, PlaybackStep};
use crate::pipeline::scheduler::{Action, Scheduler, ThreadScheduler};
use crate::session::{
    STATUS_DEVICE_NOT_FOUND, STATUS_HEAP_EXHAUSTED, STATUS_LISTENING, STATUS_RECORDING_ERROR,
    STATUS_SETUP_ERROR, Session, SessionEvent,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Sleep between polls while a lane has nothing to do.
const IDLE_POLL: Duration = Duration::from_millis(10);

/// Sleep while a device is running but has no period ready or no room.
const DEVICE_POLL: Duration = Duration::from_millis(2);

/// Builder for a running pipeline.
pub struct Pipeline {
    config: SessionConfig,
    backend: Arc<dyn AudioBackend>,
    decoder: Box<dyn Modem>,
    encoder: Box<dyn Modem>,
    session: Session,
    scheduler: Option<Arc<dyn Scheduler>>,
    cooldown: Duration,
}

impl Pipeline {
    /// `decoder` and `encoder` must be separate modem instances; the capture
    /// and playback lanes use them concurrently.
    pub fn new(
        config: SessionConfig,
        backend: Arc<dyn AudioBackend>,
        decoder: Box<dyn Modem>,
        encoder: Box<dyn Modem>,
        session: Session,
    ) -> Self {
        Self {
            config,
            backend,
            decoder,
            encoder,
            session,
            scheduler: None,
            cooldown: RESUME_COOLDOWN,
        }
    }

    /// Sets a custom scheduler (for deterministic testing).
    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Configures both lanes, starts listening and spawns the lane threads.
    ///
    /// A lane whose device or modem fails to come up stays down and the
    /// failure shows on the status line; the other lane still runs.
    pub fn start(self) -> Result<PipelineHandle> {
        let running = Arc::new(AtomicBool::new(true));
        let scheduler = self
            .scheduler
            .unwrap_or_else(|| Arc::new(ThreadScheduler::new(running.clone())));

        let session = Arc::new(Mutex::new(self.session));
        let mut capture = CaptureLane::new(self.decoder);
        let mut playback = PlaybackLane::new(self.encoder);

        if let Err(e) = playback.configure(&self.config, self.backend.as_ref()) {
            tracing::error!("playback unavailable: {}", e);
        }
        match capture.configure(&self.config, self.backend.as_ref(), true) {
            Ok(()) => lock(&session).set_status(STATUS_LISTENING),
            Err(e) => {
                tracing::error!("capture unavailable: {}", e);
                lock(&session).set_status(failure_status(&e));
            }
        }

        let capture = Arc::new(Mutex::new(capture));
        let playback = Arc::new(Mutex::new(playback));

        let mut threads = Vec::new();
        threads.push(spawn_capture_thread(
            capture.clone(),
            session.clone(),
            running.clone(),
        )?);
        threads.push(spawn_playback_thread(
            playback.clone(),
            resume_action_factory(capture.clone(), playback.clone(), session.clone()),
            scheduler.clone(),
            self.cooldown,
            running.clone(),
        )?);

        tracing::info!("pipeline started");
        Ok(PipelineHandle {
            config: Mutex::new(self.config),
            backend: self.backend,
            capture,
            playback,
            session,
            running,
            threads,
        })
    }
}

fn failure_status(error: &ChirpError) -> &'static str {
    match error {
        ChirpError::ResourceExhausted { .. } => STATUS_HEAP_EXHAUSTED,
        ChirpError::AudioDeviceNotFound { .. } => STATUS_DEVICE_NOT_FOUND,
        ChirpError::AudioDevice { .. } => STATUS_SETUP_ERROR,
        _ => STATUS_RECORDING_ERROR,
    }
}

type ResumeFactory = Box<dyn Fn() -> Action + Send>;

/// Builds the action that restarts listening after a cooldown.
fn resume_action_factory(
    capture: Arc<Mutex<CaptureLane>>,
    playback: Arc<Mutex<PlaybackLane>>,
    session: Arc<Mutex<Session>>,
) -> ResumeFactory {
    Box::new(move || {
        let capture = capture.clone();
        let playback = playback.clone();
        let session = session.clone();
        Box::new(move || resume_capture(&capture, &playback, &session))
    })
}

/// Start listening unless a transmission is playing; that transmission
/// schedules its own resume when it finishes.
fn resume_capture(
    capture: &Mutex<CaptureLane>,
    playback: &Mutex<PlaybackLane>,
    session: &Mutex<Session>,
) {
    let result = {
        // Held across the start so a transmit cannot slip in between.
        let playback = lock(playback);
        if playback.is_playing() {
            tracing::debug!("transmission in progress, capture stays stopped");
            return;
        }
        lock(capture).start_listening()
    };
    let mut session = lock(session);
    match result {
        Ok(()) => session.set_status(STATUS_LISTENING),
        Err(e) => {
            tracing::warn!("could not resume capture: {}", e);
            session.set_status(failure_status(&e));
        }
    }
}

fn spawn_capture_thread(
    capture: Arc<Mutex<CaptureLane>>,
    session: Arc<Mutex<Session>>,
    running: Arc<AtomicBool>,
) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("chirpgram-capture".to_string())
        .spawn(move || {
            while running.load(Ordering::SeqCst) {
                let pause = {
                    let mut lane = lock(&capture);
                    if !lane.is_listening() {
                        Some(IDLE_POLL)
                    } else {
                        match lane.on_capture_ready(&session) {
                            Ok(Some(_)) => None,
                            Ok(None) => Some(DEVICE_POLL),
                            Err(e) => {
                                tracing::error!("capture failed: {}", e);
                                lane.stop_listening();
                                lock(&session).set_status(STATUS_RECORDING_ERROR);
                                Some(IDLE_POLL)
                            }
                        }
                    }
                };
                if let Some(pause) = pause {
                    thread::sleep(pause);
                }
            }
        })?;
    Ok(handle)
}

fn spawn_playback_thread(
    playback: Arc<Mutex<PlaybackLane>>,
    resume: ResumeFactory,
    scheduler: Arc<dyn Scheduler>,
    cooldown: Duration,
    running: Arc<AtomicBool>,
) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("chirpgram-playback".to_string())
        .spawn(move || {
            while running.load(Ordering::SeqCst) {
                let step = lock(&playback).on_playback_ready();
                match step {
                    Ok(PlaybackStep::Continue) => {}
                    Ok(PlaybackStep::Waiting) => thread::sleep(DEVICE_POLL),
                    Ok(PlaybackStep::Idle) => thread::sleep(IDLE_POLL),
                    Ok(PlaybackStep::Finished) => scheduler.schedule(cooldown, resume()),
                    Err(e) => {
                        tracing::error!("playback failed: {}", e);
                        lock(&playback).abort();
                        scheduler.schedule(cooldown, resume());
                    }
                }
            }
        })?;
    Ok(handle)
}

/// Handle to a running pipeline.
pub struct PipelineHandle {
    config: Mutex<SessionConfig>,
    backend: Arc<dyn AudioBackend>,
    capture: Arc<Mutex<CaptureLane>>,
    playback: Arc<Mutex<PlaybackLane>>,
    session: Arc<Mutex<Session>>,
    running: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl PipelineHandle {
    /// Encrypt `text`, stop listening and start playing it. An empty text
    /// sends a ping.
    ///
    /// Capacity and password errors are returned before any device is
    /// touched. Capture resumes on its own after playback finishes.
    pub fn transmit(&self, text: &str) -> Result<SessionEvent> {
        let config = lock(&self.config).clone();

        let mut playback = lock(&self.playback);
        if playback.is_playing() {
            return Err(ChirpError::AudioDevice {
                message: "a transmission is already playing".to_string(),
            });
        }

        let envelope = lock(&self.session).compose(text, &config)?;

        lock(&self.capture).stop_listening();
        if let Err(e) = playback.begin_transmission(&envelope, &config) {
            drop(playback);
            tracing::error!("transmission failed to start: {}", e);
            resume_capture(&self.capture, &self.playback, &self.session);
            return Err(e);
        }
        drop(playback);

        Ok(lock(&self.session).record_transmission(text, &config))
    }

    pub fn start_listening(&self) -> Result<()> {
        let result = lock(&self.capture).start_listening();
        let mut session = lock(&self.session);
        match &result {
            Ok(()) => session.set_status(STATUS_LISTENING),
            Err(e) => session.set_status(failure_status(e)),
        }
        result
    }

    pub fn stop_listening(&self) {
        lock(&self.capture).stop_listening();
    }

    /// Apply a new configuration to both lanes.
    ///
    /// Capture endpoints are rebuilt only when their settings changed, the
    /// lane is halted, or a stopped endpoint refuses to restart. Playback
    /// changes are deferred while a transmission plays. Listening restarts
    /// unless a transmission is in progress.
    ///
    /// A changed password is noted in the transcript.
    pub fn reconfigure(&self, config: SessionConfig) -> Result<()> {
        let previous = std::mem::replace(&mut *lock(&self.config), config.clone());
        if previous.password != config.password {
            lock(&self.session).record_password_change();
        }

        let (playback_result, transmitting) = {
            let mut playback = lock(&self.playback);
            let result = playback.configure(&config, self.backend.as_ref());
            (result, playback.is_playing())
        };
        if let Ok(false) = playback_result {
            tracing::info!("playback settings apply after the current transmission");
        }

        let (capture_result, listening) = {
            let mut capture = lock(&self.capture);
            let result = capture.configure(&config, self.backend.as_ref(), !transmitting);
            (result, capture.is_listening())
        };
        match &capture_result {
            Err(e) => lock(&self.session).set_status(failure_status(e)),
            Ok(()) if listening => lock(&self.session).set_status(STATUS_LISTENING),
            Ok(()) => {}
        }

        playback_result?;
        capture_result
    }

    /// Retry a halted or failed lane with the current configuration.
    pub fn reinitialize(&self) -> Result<()> {
        let config = lock(&self.config).clone();
        self.reconfigure(config)
    }

    /// Text currently shown on the status line.
    pub fn status(&self) -> String {
        lock(&self.session).status().current().to_string()
    }

    /// Run `f` with the session locked, e.g. to read the transcript.
    pub fn with_session<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        f(&mut lock(&self.session))
    }

    pub fn capture_state(&self) -> CaptureState {
        lock(&self.capture).state()
    }

    pub fn playback_state(&self) -> PlaybackState {
        lock(&self.playback).state()
    }

    /// Returns true if the pipeline is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stops both lane threads and releases devices and modems.
    pub fn stop(mut self) {
        self.running.store(false, Ordering::SeqCst);

        for handle in self.threads.drain(..) {
            if let Err(panic_info) = handle.join() {
                let msg = panic_info
                    .downcast_ref::<&str>()
                    .copied()
                    .or_else(|| panic_info.downcast_ref::<String>().map(|s| s.as_str()))
                    .unwrap_or("unknown panic");
                tracing::error!("pipeline thread panicked: {msg}");
            }
        }

        lock(&self.capture).shutdown();
        lock(&self.playback).shutdown();
        tracing::info!("pipeline stopped");
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
