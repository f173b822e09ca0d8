//! Real audio playback using CPAL.

use crate::audio::capture::{SendableStream, host_for, with_suppressed_stderr};
use crate::audio::device::PlaybackDevice;
use crate::config::PlaybackSettings;
use crate::error::{ChirpError, Result};
use crate::pipeline::geometry::PlaybackGeometry;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, SendTimeoutError, Sender};
use std::time::Duration;

/// List output devices on `source`.
pub fn list_output_devices(source: Option<&str>) -> Result<Vec<String>> {
    let host = host_for(source)?;
    let devices = with_suppressed_stderr(|| host.output_devices()).map_err(|e| {
        ChirpError::AudioDevice {
            message: format!("Failed to enumerate output devices: {}", e),
        }
    })?;

    Ok(devices.filter_map(|device| device.name().ok()).collect())
}

fn find_output_device(host: &cpal::Host, name: Option<&str>) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let Some(name) = name else {
            return host
                .default_output_device()
                .ok_or_else(|| ChirpError::AudioDeviceNotFound {
                    device: "default".to_string(),
                });
        };

        let devices = host.output_devices().map_err(|e| ChirpError::AudioDevice {
            message: format!("Failed to enumerate devices: {}", e),
        })?;

        for device in devices {
            if let Ok(device_name) = device.name()
                && device_name == name
            {
                return Ok(device);
            }
        }

        Err(ChirpError::AudioDeviceNotFound {
            device: name.to_string(),
        })
    })
}

/// Period queue drained by the output callback. Silence is played when it
/// runs dry.
struct Feeder {
    periods: Receiver<Vec<i16>>,
    current: Vec<i16>,
    cursor: usize,
}

impl Feeder {
    fn next_sample(&mut self) -> i16 {
        if self.cursor >= self.current.len() {
            match self.periods.try_recv() {
                Ok(period) => {
                    self.current = period;
                    self.cursor = 0;
                }
                Err(_) => return 0,
            }
        }
        match self.current.get(self.cursor) {
            Some(&sample) => {
                self.cursor += 1;
                sample
            }
            None => 0,
        }
    }

    fn fill_i16(&mut self, out: &mut [i16]) {
        for slot in out.iter_mut() {
            *slot = self.next_sample();
        }
    }

    fn fill_f32(&mut self, out: &mut [f32]) {
        for slot in out.iter_mut() {
            *slot = self.next_sample() as f32 / i16::MAX as f32;
        }
    }
}

/// Playback endpoint on a CPAL output device.
///
/// Writes go through a bounded queue holding the geometry's headroom in
/// periods, which paces the encoder at the device rate.
pub struct CpalPlaybackDevice {
    device: cpal::Device,
    geometry: PlaybackGeometry,
    stream: Option<SendableStream>,
    queue_tx: Sender<Vec<i16>>,
    queue_rx: Receiver<Vec<i16>>,
    playing: bool,
}

impl CpalPlaybackDevice {
    pub fn open(settings: &PlaybackSettings, geometry: &PlaybackGeometry) -> Result<Self> {
        let host = host_for(settings.source.as_deref())?;
        let device = find_output_device(&host, settings.device.as_deref())?;
        let (queue_tx, queue_rx) = crossbeam_channel::bounded(geometry.queue_periods());

        tracing::debug!(
            device = ?device.name().ok(),
            rate = geometry.sample_rate,
            channels = geometry.channels(),
            "opened playback device"
        );

        Ok(Self {
            device,
            geometry: *geometry,
            stream: None,
            queue_tx,
            queue_rx,
            playing: false,
        })
    }

    fn build_stream(&self) -> Result<cpal::Stream> {
        let config = cpal::StreamConfig {
            channels: self.geometry.channels(),
            sample_rate: self.geometry.sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        let err_callback = |err| {
            tracing::warn!("playback stream error: {}", err);
        };

        let mut feeder = Feeder {
            periods: self.queue_rx.clone(),
            current: Vec::new(),
            cursor: 0,
        };
        if let Ok(stream) = self.device.build_output_stream(
            &config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| feeder.fill_i16(data),
            err_callback,
            None,
        ) {
            return Ok(stream);
        }

        let mut feeder = Feeder {
            periods: self.queue_rx.clone(),
            current: Vec::new(),
            cursor: 0,
        };
        self.device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| feeder.fill_f32(data),
                err_callback,
                None,
            )
            .map_err(|e| ChirpError::AudioDevice {
                message: format!(
                    "Failed to open {} Hz/{}ch output stream: {}",
                    self.geometry.sample_rate,
                    self.geometry.channels(),
                    e
                ),
            })
    }
}

impl PlaybackDevice for CpalPlaybackDevice {
    fn write(&mut self, buffer: &[i16], timeout: Duration) -> Result<bool> {
        match self.queue_tx.send_timeout(buffer.to_vec(), timeout) {
            Ok(()) => Ok(true),
            Err(SendTimeoutError::Timeout(_)) => Ok(false),
            Err(SendTimeoutError::Disconnected(_)) => Err(ChirpError::AudioDevice {
                message: "playback queue closed".to_string(),
            }),
        }
    }

    fn play(&mut self) -> Result<()> {
        if self.stream.is_none() {
            self.stream = Some(SendableStream(self.build_stream()?));
        }
        if let Some(stream) = &self.stream {
            stream.0.play().map_err(|e| ChirpError::AudioDevice {
                message: format!("Failed to start playback: {}", e),
            })?;
        }
        self.playing = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.playing = false;
        // Let queued periods drain; an idle stream only plays silence.
        if self.queue_rx.is_empty()
            && let Some(stream) = &self.stream
        {
            stream.0.pause().map_err(|e| ChirpError::AudioDevice {
                message: format!("Failed to stop playback: {}", e),
            })?;
        }
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.playing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modem::ChannelSelect;

    fn feeder(periods: Vec<Vec<i16>>) -> Feeder {
        let (tx, rx) = crossbeam_channel::unbounded();
        for period in periods {
            tx.send(period).unwrap();
        }
        Feeder {
            periods: rx,
            current: Vec::new(),
            cursor: 0,
        }
    }

    #[test]
    fn test_feeder_spans_periods_and_pads_with_silence() {
        let mut feeder = feeder(vec![vec![1, 2, 3], vec![4, 5]]);
        let mut out = [9i16; 4];
        feeder.fill_i16(&mut out);
        assert_eq!(out, [1, 2, 3, 4]);

        feeder.fill_i16(&mut out);
        assert_eq!(out, [5, 0, 0, 0]);
    }

    #[test]
    fn test_feeder_converts_to_float() {
        let mut feeder = feeder(vec![vec![i16::MAX, 0]]);
        let mut out = [1.0f32; 3];
        feeder.fill_f32(&mut out);
        assert_eq!(out, [1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_open_with_invalid_device_name() {
        let settings = PlaybackSettings {
            sample_rate: 8000,
            channel: ChannelSelect::Mono,
            source: None,
            device: Some("NonExistentDevice12345".to_string()),
        };
        let geometry = PlaybackGeometry::new(8000, ChannelSelect::Mono);

        match CpalPlaybackDevice::open(&settings, &geometry) {
            Err(ChirpError::AudioDeviceNotFound { device }) => {
                assert_eq!(device, "NonExistentDevice12345");
            }
            Err(other) => panic!("Expected AudioDeviceNotFound, got {:?}", other),
            Ok(_) => panic!("Expected open to fail"),
        }
    }

    #[test]
    #[ignore] // Requires audio hardware
    fn test_default_device_accepts_headroom_before_play() {
        let settings = PlaybackSettings {
            sample_rate: 8000,
            channel: ChannelSelect::Mono,
            source: None,
            device: None,
        };
        let geometry = PlaybackGeometry::new(8000, ChannelSelect::Mono);
        let mut device = CpalPlaybackDevice::open(&settings, &geometry).unwrap();
        let period = vec![0i16; geometry.buffer_samples()];

        for _ in 0..geometry.queue_periods() {
            assert!(device.write(&period, Duration::ZERO).unwrap());
        }
        assert!(!device.write(&period, Duration::ZERO).unwrap());

        device.play().unwrap();
        assert!(device.is_playing());
        device.stop().unwrap();
        assert!(!device.is_playing());
    }
}
