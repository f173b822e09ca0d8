//! Capture lane: capture device → decoder → session.

use crate::audio::device::{AudioBackend, CaptureDevice};
use crate::config::{CaptureSettings, SessionConfig};
use crate::error::{ChirpError, Result};
use crate::modem::Modem;
use crate::pipeline::geometry::CaptureGeometry;
use crate::pipeline::lock;
use crate::session::{Session, SessionEvent};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// No endpoint; configure first.
    Unconfigured,
    Stopped,
    Listening,
    /// The decoder could not be created or ran out of memory. Only an
    /// explicit reconfiguration clears this.
    Halted,
}

pub struct CaptureLane {
    decoder: Box<dyn Modem>,
    device: Option<Box<dyn CaptureDevice>>,
    decoder_active: bool,
    geometry: CaptureGeometry,
    settings: Option<CaptureSettings>,
    config: SessionConfig,
    buffer: Vec<i16>,
    state: CaptureState,
}

impl CaptureLane {
    pub fn new(decoder: Box<dyn Modem>) -> Self {
        let config = SessionConfig::default();
        Self {
            decoder,
            device: None,
            decoder_active: false,
            geometry: CaptureGeometry::new(config.record_rate, config.record_channel),
            settings: None,
            config,
            buffer: Vec::new(),
            state: CaptureState::Unconfigured,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn is_listening(&self) -> bool {
        self.state == CaptureState::Listening
    }

    pub fn geometry(&self) -> &CaptureGeometry {
        &self.geometry
    }

    /// Apply `config`. The endpoint and decoder are rebuilt when the rate,
    /// channel selection, host or device changed, when the lane is halted,
    /// or when `restart` finds the existing endpoint unable to start.
    /// Otherwise only the session parameters are updated.
    ///
    /// With `restart`, listening resumes on the (possibly new) endpoint.
    pub fn configure(
        &mut self,
        config: &SessionConfig,
        backend: &dyn AudioBackend,
        restart: bool,
    ) -> Result<()> {
        self.config = config.clone();
        let settings = config.capture();
        if self.settings.as_ref() == Some(&settings) {
            match self.state {
                CaptureState::Listening => return Ok(()),
                CaptureState::Stopped if !restart => return Ok(()),
                CaptureState::Stopped => match self.start_listening() {
                    Ok(()) => return Ok(()),
                    Err(e) => tracing::warn!("capture restart failed, reopening device: {}", e),
                },
                CaptureState::Halted | CaptureState::Unconfigured => {}
            }
        }

        self.teardown();
        let geometry = CaptureGeometry::new(settings.sample_rate, settings.channel);
        tracing::info!(
            rate = settings.sample_rate,
            channel = ?settings.channel,
            device = ?settings.device,
            "configuring capture"
        );

        let device = backend.open_capture(&settings, &geometry)?;
        if !self.decoder.begin_decode(settings.sample_rate) {
            tracing::error!(rate = settings.sample_rate, "decoder could not be created");
            self.state = CaptureState::Halted;
            return Err(ChirpError::ResourceExhausted {
                message: format!("decoder at {} Hz", settings.sample_rate),
            });
        }

        self.device = Some(device);
        self.decoder_active = true;
        self.buffer = vec![0; geometry.buffer_samples()];
        self.geometry = geometry;
        self.settings = Some(settings);
        self.state = CaptureState::Stopped;

        if restart {
            self.start_listening()?;
        }
        Ok(())
    }

    /// Start feeding the decoder. Audio captured before this call is
    /// discarded.
    pub fn start_listening(&mut self) -> Result<()> {
        match self.state {
            CaptureState::Listening => return Ok(()),
            CaptureState::Halted => {
                return Err(ChirpError::ResourceExhausted {
                    message: "capture halted; reconfigure to retry".to_string(),
                });
            }
            CaptureState::Unconfigured => {
                return Err(ChirpError::AudioDevice {
                    message: "capture not configured".to_string(),
                });
            }
            CaptureState::Stopped => {}
        }

        if let Some(device) = self.device.as_mut() {
            device.start()?;
            device.flush();
        }
        tracing::debug!("capture listening");
        self.state = CaptureState::Listening;
        Ok(())
    }

    /// Stop feeding the decoder. Safe to call repeatedly.
    pub fn stop_listening(&mut self) {
        if self.state != CaptureState::Listening {
            return;
        }
        self.stop_device();
        self.state = CaptureState::Stopped;
        tracing::debug!("capture stopped");
    }

    /// Service one capture trigger: read one period, feed it, step the
    /// decoder once and hand the status to the session.
    ///
    /// Never blocks on the device: returns `Ok(None)` when the lane is not
    /// listening or no full period is ready yet.
    pub fn on_capture_ready(&mut self, session: &Mutex<Session>) -> Result<Option<SessionEvent>> {
        if self.state != CaptureState::Listening {
            return Ok(None);
        }
        let Some(device) = self.device.as_mut() else {
            return Ok(None);
        };

        if !device.read_period(&mut self.buffer, Duration::ZERO)? {
            return Ok(None);
        }

        let frames = self.geometry.period_frames();
        if !self
            .decoder
            .push_decode_buffer(&self.buffer, frames, self.geometry.channel)
        {
            tracing::trace!("decoder did not accept feed");
            return Ok(None);
        }

        let status = self.decoder.step_decode();
        let event = lock(session).handle_status(status, self.decoder.as_mut(), &self.config);

        if event.is_fatal() {
            self.stop_device();
            self.state = CaptureState::Halted;
        }
        Ok(Some(event))
    }

    /// Release the endpoint and the decoder.
    pub fn shutdown(&mut self) {
        self.teardown();
        self.state = CaptureState::Unconfigured;
    }

    fn stop_device(&mut self) {
        if let Some(device) = self.device.as_mut()
            && let Err(e) = device.stop()
        {
            tracing::warn!("failed to stop capture device: {}", e);
        }
    }

    fn teardown(&mut self) {
        self.stop_device();
        self.device = None;
        if self.decoder_active {
            self.decoder.end_decode();
            self.decoder_active = false;
        }
        self.settings = None;
    }
}

impl Drop for CaptureLane {
    fn drop(&mut self) {
        self.teardown();
    }
}
