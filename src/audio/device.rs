use crate::config::{CaptureSettings, PlaybackSettings};
use crate::error::{ChirpError, Result};
use crate::pipeline::geometry::{CaptureGeometry, PlaybackGeometry};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Trait for audio capture endpoints.
///
/// This trait allows swapping implementations (real audio device, WAV file, mock).
pub trait CaptureDevice: Send {
    /// Start delivering audio. Starting a running device is a no-op.
    fn start(&mut self) -> Result<()>;

    /// Stop delivering audio. Stopping a stopped device is a no-op.
    fn stop(&mut self) -> Result<()>;

    /// Fill `buffer` with the next period of interleaved samples.
    ///
    /// Waits at most `timeout`. Returns `Ok(false)` when a whole period was
    /// not available in time; `buffer` contents are unspecified then.
    fn read_period(&mut self, buffer: &mut [i16], timeout: Duration) -> Result<bool>;

    /// Drop anything captured but not yet read.
    fn flush(&mut self) {}
}

/// Trait for audio playback endpoints.
pub trait PlaybackDevice: Send {
    /// Queue one period of interleaved samples.
    ///
    /// Waits at most `timeout` for room. Returns `Ok(false)` if the queue
    /// stayed full; the caller still owns the period then.
    fn write(&mut self, buffer: &[i16], timeout: Duration) -> Result<bool>;

    /// Start playing queued audio.
    fn play(&mut self) -> Result<()>;

    /// Stop playback. Periods already queued still play out.
    fn stop(&mut self) -> Result<()>;

    fn is_playing(&self) -> bool;
}

/// Opens device endpoints; reconfiguration reopens through it.
pub trait AudioBackend: Send + Sync {
    fn open_capture(
        &self,
        settings: &CaptureSettings,
        geometry: &CaptureGeometry,
    ) -> Result<Box<dyn CaptureDevice>>;

    fn open_playback(
        &self,
        settings: &PlaybackSettings,
        geometry: &PlaybackGeometry,
    ) -> Result<Box<dyn PlaybackDevice>>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn mock_error(message: &str) -> ChirpError {
    ChirpError::AudioDevice {
        message: message.to_string(),
    }
}

/// Observable state of a [`MockCaptureDevice`].
#[derive(Debug, Default)]
pub struct MockCaptureState {
    pub started: bool,
    pub start_calls: usize,
    pub stop_calls: usize,
    pub flushes: usize,
    pub reads: usize,
    pub periods: VecDeque<Vec<i16>>,
    /// Keep returning silence once scripted periods run out.
    pub endless: bool,
    pub fail_start: bool,
    pub fail_read: bool,
    pub error_message: String,
    /// Deliver at most one period per `pace`, like a real device.
    pub pace: Option<Duration>,
    pub last_delivery: Option<Instant>,
}

/// Mock capture device for testing. Clones share state.
#[derive(Debug, Clone)]
pub struct MockCaptureDevice {
    state: Arc<Mutex<MockCaptureState>>,
}

impl MockCaptureDevice {
    /// A device that delivers silence forever once started.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockCaptureState {
                endless: true,
                error_message: "mock audio error".to_string(),
                ..MockCaptureState::default()
            })),
        }
    }

    /// Deliver these periods first. Shorter periods are zero padded.
    pub fn with_periods(self, periods: Vec<Vec<i16>>) -> Self {
        self.state().periods.extend(periods);
        self
    }

    /// Stop delivering once scripted periods run out.
    pub fn finite(self) -> Self {
        self.state().endless = false;
        self
    }

    /// Deliver at most one period per `pace`.
    pub fn with_pace(self, pace: Duration) -> Self {
        self.state().pace = Some(pace);
        self
    }

    pub fn with_start_failure(self) -> Self {
        self.state().fail_start = true;
        self
    }

    pub fn with_read_failure(self) -> Self {
        self.state().fail_read = true;
        self
    }

    pub fn with_error_message(self, message: &str) -> Self {
        self.state().error_message = message.to_string();
        self
    }

    pub fn is_started(&self) -> bool {
        self.state().started
    }

    pub fn state(&self) -> MutexGuard<'_, MockCaptureState> {
        lock(&self.state)
    }
}

impl Default for MockCaptureDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureDevice for MockCaptureDevice {
    fn start(&mut self) -> Result<()> {
        let mut state = self.state();
        state.start_calls += 1;
        if state.fail_start {
            return Err(mock_error(&state.error_message));
        }
        state.started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let mut state = self.state();
        state.stop_calls += 1;
        state.started = false;
        Ok(())
    }

    fn read_period(&mut self, buffer: &mut [i16], timeout: Duration) -> Result<bool> {
        let period = {
            let mut state = self.state();
            if state.fail_read {
                return Err(mock_error(&state.error_message));
            }
            let early = match (state.pace, state.last_delivery) {
                (Some(pace), Some(last)) => last.elapsed() < pace,
                _ => false,
            };
            if !state.started || early {
                None
            } else if let Some(period) = state.periods.pop_front() {
                Some(period)
            } else if state.endless {
                Some(Vec::new())
            } else {
                None
            }
        };

        let Some(period) = period else {
            // Nothing to deliver; behave like a device that timed out.
            std::thread::sleep(timeout.min(Duration::from_millis(2)));
            return Ok(false);
        };

        buffer.fill(0);
        let n = period.len().min(buffer.len());
        buffer[..n].copy_from_slice(&period[..n]);
        let mut state = self.state();
        state.reads += 1;
        state.last_delivery = Some(Instant::now());
        Ok(true)
    }

    fn flush(&mut self) {
        self.state().flushes += 1;
    }
}

/// Observable state of a [`MockPlaybackDevice`].
#[derive(Debug, Default)]
pub struct MockPlaybackState {
    pub playing: bool,
    pub play_calls: usize,
    pub stop_calls: usize,
    pub written: Vec<Vec<i16>>,
    /// Periods written before `play` was first called.
    pub written_before_play: Option<usize>,
    pub queue_full: bool,
    pub fail_play: bool,
    pub error_message: String,
}

/// Mock playback device for testing. Clones share state.
#[derive(Debug, Clone)]
pub struct MockPlaybackDevice {
    state: Arc<Mutex<MockPlaybackState>>,
}

impl MockPlaybackDevice {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockPlaybackState {
                error_message: "mock audio error".to_string(),
                ..MockPlaybackState::default()
            })),
        }
    }

    /// Report a full queue on every write.
    pub fn with_full_queue(self) -> Self {
        self.state().queue_full = true;
        self
    }

    pub fn with_play_failure(self) -> Self {
        self.state().fail_play = true;
        self
    }

    pub fn written(&self) -> Vec<Vec<i16>> {
        self.state().written.clone()
    }

    pub fn state(&self) -> MutexGuard<'_, MockPlaybackState> {
        lock(&self.state)
    }
}

impl Default for MockPlaybackDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackDevice for MockPlaybackDevice {
    fn write(&mut self, buffer: &[i16], _timeout: Duration) -> Result<bool> {
        let mut state = self.state();
        if state.queue_full {
            return Ok(false);
        }
        state.written.push(buffer.to_vec());
        Ok(true)
    }

    fn play(&mut self) -> Result<()> {
        let mut state = self.state();
        state.play_calls += 1;
        if state.fail_play {
            return Err(mock_error(&state.error_message));
        }
        if state.written_before_play.is_none() {
            state.written_before_play = Some(state.written.len());
        }
        state.playing = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let mut state = self.state();
        state.stop_calls += 1;
        state.playing = false;
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.state().playing
    }
}

/// Observable state of a [`MockBackend`].
#[derive(Debug, Default)]
pub struct MockBackendState {
    pub capture_opens: Vec<CaptureSettings>,
    pub playback_opens: Vec<PlaybackSettings>,
    pub fail_capture_open: bool,
    pub fail_playback_open: bool,
}

/// Backend handing out clones of one mock capture and one mock playback
/// device, so a test keeps visibility across reopens.
#[derive(Debug, Clone)]
pub struct MockBackend {
    capture: MockCaptureDevice,
    playback: MockPlaybackDevice,
    state: Arc<Mutex<MockBackendState>>,
}

impl MockBackend {
    pub fn new(capture: MockCaptureDevice, playback: MockPlaybackDevice) -> Self {
        Self {
            capture,
            playback,
            state: Arc::new(Mutex::new(MockBackendState::default())),
        }
    }

    pub fn with_capture_open_failure(self) -> Self {
        self.state().fail_capture_open = true;
        self
    }

    pub fn with_playback_open_failure(self) -> Self {
        self.state().fail_playback_open = true;
        self
    }

    pub fn capture(&self) -> &MockCaptureDevice {
        &self.capture
    }

    pub fn playback(&self) -> &MockPlaybackDevice {
        &self.playback
    }

    pub fn state(&self) -> MutexGuard<'_, MockBackendState> {
        lock(&self.state)
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new(MockCaptureDevice::new(), MockPlaybackDevice::new())
    }
}

impl AudioBackend for MockBackend {
    fn open_capture(
        &self,
        settings: &CaptureSettings,
        _geometry: &CaptureGeometry,
    ) -> Result<Box<dyn CaptureDevice>> {
        let mut state = self.state();
        state.capture_opens.push(settings.clone());
        if state.fail_capture_open {
            return Err(ChirpError::AudioDeviceNotFound {
                device: settings.device.clone().unwrap_or_else(|| "default".to_string()),
            });
        }
        Ok(Box::new(self.capture.clone()))
    }

    fn open_playback(
        &self,
        settings: &PlaybackSettings,
        _geometry: &PlaybackGeometry,
    ) -> Result<Box<dyn PlaybackDevice>> {
        let mut state = self.state();
        state.playback_opens.push(settings.clone());
        if state.fail_playback_open {
            return Err(ChirpError::AudioDeviceNotFound {
                device: settings.device.clone().unwrap_or_else(|| "default".to_string()),
            });
        }
        Ok(Box::new(self.playback.clone()))
    }
}
