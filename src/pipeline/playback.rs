//! Playback lane: encoder → playback device.

use crate::audio::device::{AudioBackend, PlaybackDevice};
use crate::config::{PlaybackSettings, SessionConfig};
use crate::defaults::PRIME_BUFFERS;
use crate::envelope::Envelope;
use crate::error::{ChirpError, Result};
use crate::modem::Modem;
use crate::pipeline::geometry::PlaybackGeometry;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Unconfigured,
    Idle,
    Playing,
    /// The encoder could not be created; only reconfiguration clears this.
    Halted,
}

/// Outcome of one playback trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStep {
    /// Nothing is playing.
    Idle,
    /// One period went to the device.
    Continue,
    /// The device queue is full; the period stays pending.
    Waiting,
    /// The encoder ran out; playback stopped and capture may resume after
    /// the cooldown.
    Finished,
}

pub struct PlaybackLane {
    encoder: Box<dyn Modem>,
    device: Option<Box<dyn PlaybackDevice>>,
    encoder_active: bool,
    geometry: PlaybackGeometry,
    settings: Option<PlaybackSettings>,
    buffer: Vec<i16>,
    /// `buffer` holds a period the device has not accepted yet.
    pending: bool,
    state: PlaybackState,
}

impl PlaybackLane {
    pub fn new(encoder: Box<dyn Modem>) -> Self {
        let config = SessionConfig::default();
        Self {
            encoder,
            device: None,
            encoder_active: false,
            geometry: PlaybackGeometry::new(config.output_rate, config.output_channel),
            settings: None,
            buffer: Vec::new(),
            pending: false,
            state: PlaybackState::Unconfigured,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    pub fn geometry(&self) -> &PlaybackGeometry {
        &self.geometry
    }

    /// Apply the playback half of `config`.
    ///
    /// Returns `Ok(false)` without touching anything while a transmission
    /// is playing. Unchanged settings are a no-op unless the lane is halted.
    pub fn configure(&mut self, config: &SessionConfig, backend: &dyn AudioBackend) -> Result<bool> {
        if self.state == PlaybackState::Playing {
            tracing::warn!("playback busy, configuration change deferred");
            return Ok(false);
        }

        let settings = config.playback();
        if !settings.channel.supports_playback() {
            return Err(ChirpError::ConfigInvalidValue {
                key: "audio.output_channel".to_string(),
                message: "channel summation is only available for capture".to_string(),
            });
        }
        if self.settings.as_ref() == Some(&settings) && self.state != PlaybackState::Halted {
            return Ok(true);
        }

        self.teardown();
        let geometry = PlaybackGeometry::new(settings.sample_rate, settings.channel);
        tracing::info!(
            rate = settings.sample_rate,
            channel = ?settings.channel,
            device = ?settings.device,
            "configuring playback"
        );

        let device = backend.open_playback(&settings, &geometry)?;
        if !self.encoder.begin_encode(settings.sample_rate) {
            tracing::error!(rate = settings.sample_rate, "encoder could not be created");
            self.state = PlaybackState::Halted;
            return Err(ChirpError::ResourceExhausted {
                message: format!("encoder at {} Hz", settings.sample_rate),
            });
        }

        self.device = Some(device);
        self.encoder_active = true;
        self.buffer = vec![0; geometry.buffer_samples()];
        self.geometry = geometry;
        self.settings = Some(settings);
        self.state = PlaybackState::Idle;
        Ok(true)
    }

    /// Hand `envelope` to the encoder, prime the device with the first
    /// periods and start playing.
    pub fn begin_transmission(&mut self, envelope: &Envelope, config: &SessionConfig) -> Result<()> {
        match self.state {
            PlaybackState::Idle => {}
            PlaybackState::Playing => {
                return Err(ChirpError::AudioDevice {
                    message: "a transmission is already playing".to_string(),
                });
            }
            PlaybackState::Halted => {
                return Err(ChirpError::ResourceExhausted {
                    message: "playback halted; reconfigure to retry".to_string(),
                });
            }
            PlaybackState::Unconfigured => {
                return Err(ChirpError::AudioDevice {
                    message: "playback not configured".to_string(),
                });
            }
        }
        let Some(device) = self.device.as_mut() else {
            return Err(ChirpError::AudioDevice {
                message: "playback not configured".to_string(),
            });
        };

        self.encoder.configure_encode(
            envelope.as_bytes(),
            &config.sender_id.to_wire(),
            config.carrier_frequency,
            config.noise_symbols,
            config.header,
        );

        self.pending = false;
        let period = self.geometry.period();
        for _ in 0..PRIME_BUFFERS {
            self.encoder
                .pull_encode_buffer(&mut self.buffer, self.geometry.channel);
            if !device.write(&self.buffer, period)? {
                // Device queue still holds the tail of the last transmission.
                self.pending = true;
                break;
            }
        }

        device.play()?;
        self.state = PlaybackState::Playing;
        tracing::info!(bytes = envelope.len(), "transmission started");
        Ok(())
    }

    /// Service one playback trigger: pull the next period from the encoder
    /// and queue it, or stop when the encoder is done.
    pub fn on_playback_ready(&mut self) -> Result<PlaybackStep> {
        if self.state != PlaybackState::Playing {
            return Ok(PlaybackStep::Idle);
        }
        let Some(device) = self.device.as_mut() else {
            return Ok(PlaybackStep::Idle);
        };

        if !self.pending {
            if !self
                .encoder
                .pull_encode_buffer(&mut self.buffer, self.geometry.channel)
            {
                if let Err(e) = device.stop() {
                    tracing::warn!("failed to stop playback device: {}", e);
                }
                self.state = PlaybackState::Idle;
                tracing::info!("transmission finished");
                return Ok(PlaybackStep::Finished);
            }
            self.pending = true;
        }

        if device.write(&self.buffer, Duration::ZERO)? {
            self.pending = false;
            Ok(PlaybackStep::Continue)
        } else {
            Ok(PlaybackStep::Waiting)
        }
    }

    /// Stop the current transmission without waiting for the encoder.
    pub fn abort(&mut self) {
        if self.state != PlaybackState::Playing {
            return;
        }
        if let Some(device) = self.device.as_mut()
            && let Err(e) = device.stop()
        {
            tracing::warn!("failed to stop playback device: {}", e);
        }
        self.pending = false;
        self.state = PlaybackState::Idle;
        tracing::info!("transmission aborted");
    }

    /// Abort any transmission and release the endpoint and encoder.
    pub fn shutdown(&mut self) {
        self.teardown();
        self.state = PlaybackState::Unconfigured;
    }

    fn teardown(&mut self) {
        if let Some(device) = self.device.as_mut()
            && let Err(e) = device.stop()
        {
            tracing::warn!("failed to stop playback device: {}", e);
        }
        self.device = None;
        if self.encoder_active {
            self.encoder.end_encode();
            self.encoder_active = false;
        }
        self.settings = None;
        self.pending = false;
    }
}

impl Drop for PlaybackLane {
    fn drop(&mut self) {
        self.teardown();
    }
}
