//! Real audio capture using CPAL (Cross-Platform Audio Library).

use crate::audio::device::CaptureDevice;
use crate::config::CaptureSettings;
use crate::error::{ChirpError, Result};
use crate::pipeline::geometry::CaptureGeometry;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// This suppresses noisy ALSA/JACK/PipeWire messages that CPAL triggers
/// when probing audio backends.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2 (stderr).
/// Safe as long as no other thread is concurrently manipulating fd 2.
pub(crate) fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Device name patterns that are never useful for an acoustic link.
const FILTERED_PATTERNS: &[&str] = &[
    "surround",
    "front:",
    "rear:",
    "center:",
    "side:",
    "HDMI",
    "S/PDIF",
];

fn should_filter_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    FILTERED_PATTERNS
        .iter()
        .any(|pattern| lower.contains(&pattern.to_lowercase()))
}

/// Resolve the audio host named by `source`, or the platform default.
pub(crate) fn host_for(source: Option<&str>) -> Result<cpal::Host> {
    let Some(name) = source else {
        return Ok(cpal::default_host());
    };

    let id = cpal::available_hosts()
        .into_iter()
        .find(|id| id.name().eq_ignore_ascii_case(name))
        .ok_or_else(|| ChirpError::AudioDeviceNotFound {
            device: format!("host {}", name),
        })?;

    cpal::host_from_id(id).map_err(|e| ChirpError::AudioDevice {
        message: format!("Audio host {} unavailable: {}", name, e),
    })
}

/// Names of the audio hosts compiled into this build.
pub fn list_hosts() -> Vec<String> {
    cpal::available_hosts()
        .into_iter()
        .map(|id| id.name().to_string())
        .collect()
}

/// List input devices on `source`, skipping obviously unusable ones.
///
/// During enumeration cpal may probe several backends; their stderr chatter
/// is suppressed.
pub fn list_input_devices(source: Option<&str>) -> Result<Vec<String>> {
    let host = host_for(source)?;
    let devices = with_suppressed_stderr(|| host.input_devices()).map_err(|e| {
        ChirpError::AudioDevice {
            message: format!("Failed to enumerate input devices: {}", e),
        }
    })?;

    Ok(devices
        .filter_map(|device| device.name().ok())
        .filter(|name| !should_filter_device(name))
        .collect())
}

fn find_input_device(host: &cpal::Host, name: Option<&str>) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let Some(name) = name else {
            return host
                .default_input_device()
                .ok_or_else(|| ChirpError::AudioDeviceNotFound {
                    device: "default".to_string(),
                });
        };

        let devices = host.input_devices().map_err(|e| ChirpError::AudioDevice {
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

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is owned by exactly one device, and the device is only
/// driven from one thread at a time through its lane's mutex.
pub(crate) struct SendableStream(pub(crate) cpal::Stream);

unsafe impl Send for SendableStream {}

/// Samples delivered by the device callback but not yet read.
struct Ring {
    samples: VecDeque<i16>,
    capacity: usize,
}

impl Ring {
    fn push(&mut self, data: impl IntoIterator<Item = i16>) {
        self.samples.extend(data);
        if self.samples.len() > self.capacity {
            let excess = self.samples.len() - self.capacity;
            self.samples.drain(..excess);
        }
    }
}

/// Capture endpoint on a CPAL input device.
///
/// The callback appends to a ring bounded by the geometry's ring size
/// (oldest audio is dropped on overrun) and wakes the reader.
pub struct CpalCaptureDevice {
    device: cpal::Device,
    geometry: CaptureGeometry,
    stream: Option<SendableStream>,
    ring: Arc<Mutex<Ring>>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

impl CpalCaptureDevice {
    pub fn open(settings: &CaptureSettings, geometry: &CaptureGeometry) -> Result<Self> {
        let host = host_for(settings.source.as_deref())?;
        let device = find_input_device(&host, settings.device.as_deref())?;
        let (wake_tx, wake_rx) = crossbeam_channel::bounded(1);

        tracing::debug!(
            device = ?device.name().ok(),
            rate = geometry.sample_rate,
            channels = geometry.channels(),
            "opened capture device"
        );

        Ok(Self {
            device,
            geometry: *geometry,
            stream: None,
            ring: Arc::new(Mutex::new(Ring {
                samples: VecDeque::with_capacity(geometry.ring_samples()),
                capacity: geometry.ring_samples(),
            })),
            wake_tx,
            wake_rx,
        })
    }

    /// Build the input stream, i16 first and f32 for devices that only
    /// expose float formats.
    fn build_stream(&self) -> Result<cpal::Stream> {
        let config = cpal::StreamConfig {
            channels: self.geometry.channels(),
            sample_rate: self.geometry.sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        let err_callback = |err| {
            tracing::warn!("capture stream error: {}", err);
        };

        let ring = Arc::clone(&self.ring);
        let wake = self.wake_tx.clone();
        if let Ok(stream) = self.device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                if let Ok(mut ring) = ring.lock() {
                    ring.push(data.iter().copied());
                }
                let _ = wake.try_send(());
            },
            err_callback,
            None,
        ) {
            return Ok(stream);
        }

        let ring = Arc::clone(&self.ring);
        let wake = self.wake_tx.clone();
        self.device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut ring) = ring.lock() {
                        ring.push(
                            data.iter()
                                .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16),
                        );
                    }
                    let _ = wake.try_send(());
                },
                err_callback,
                None,
            )
            .map_err(|e| ChirpError::AudioDevice {
                message: format!(
                    "Failed to open {} Hz/{}ch input stream: {}",
                    self.geometry.sample_rate,
                    self.geometry.channels(),
                    e
                ),
            })
    }
}

impl CaptureDevice for CpalCaptureDevice {
    fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let stream = self.build_stream()?;
        stream.play().map_err(|e| ChirpError::AudioDevice {
            message: format!("Failed to start audio stream: {}", e),
        })?;
        self.stream = Some(SendableStream(stream));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            stream.0.pause().map_err(|e| ChirpError::AudioDevice {
                message: format!("Failed to stop audio stream: {}", e),
            })?;
        }
        Ok(())
    }

    fn read_period(&mut self, buffer: &mut [i16], timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut ring = self.ring.lock().map_err(|e| ChirpError::AudioDevice {
                    message: format!("Failed to lock capture ring: {}", e),
                })?;
                let needed = buffer.len();
                if ring.samples.len() >= needed {
                    for (slot, sample) in buffer.iter_mut().zip(ring.samples.drain(..needed)) {
                        *slot = sample;
                    }
                    return Ok(true);
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || self.wake_rx.recv_timeout(remaining).is_err() {
                return Ok(false);
            }
        }
    }

    fn flush(&mut self) {
        if let Ok(mut ring) = self.ring.lock() {
            ring.samples.clear();
        }
        while self.wake_rx.try_recv().is_ok() {}
    }
}

impl Drop for CpalCaptureDevice {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!("failed to stop capture stream: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modem::ChannelSelect;

    #[test]
    fn test_should_filter_device() {
        assert!(should_filter_device("surround51"));
        assert!(should_filter_device("front:CARD=PCH"));
        assert!(should_filter_device("HDMI Output"));
        assert!(!should_filter_device("pipewire"));
        assert!(!should_filter_device("Built-in Audio"));
    }

    #[test]
    fn test_ring_drops_oldest_on_overrun() {
        let mut ring = Ring {
            samples: VecDeque::new(),
            capacity: 4,
        };
        ring.push([1, 2, 3]);
        ring.push([4, 5, 6]);
        assert_eq!(ring.samples, VecDeque::from(vec![3, 4, 5, 6]));
    }

    #[test]
    fn test_unknown_host_is_not_found() {
        match host_for(Some("no-such-audio-host")) {
            Err(ChirpError::AudioDeviceNotFound { device }) => {
                assert_eq!(device, "host no-such-audio-host");
            }
            Err(other) => panic!("Expected AudioDeviceNotFound, got {:?}", other),
            Ok(_) => panic!("Expected unknown host to fail"),
        }
    }

    #[test]
    fn test_list_hosts_is_not_empty() {
        assert!(!list_hosts().is_empty());
    }

    #[test]
    fn test_open_with_invalid_device_name() {
        let settings = CaptureSettings {
            sample_rate: 8000,
            channel: ChannelSelect::Mono,
            source: None,
            device: Some("NonExistentDevice12345".to_string()),
        };
        let geometry = CaptureGeometry::new(8000, ChannelSelect::Mono);

        match CpalCaptureDevice::open(&settings, &geometry) {
            Err(ChirpError::AudioDeviceNotFound { device }) => {
                assert_eq!(device, "NonExistentDevice12345");
            }
            Err(other) => panic!("Expected AudioDeviceNotFound, got {:?}", other),
            Ok(_) => panic!("Expected open to fail"),
        }
    }

    #[test]
    #[ignore] // Requires audio hardware
    fn test_default_device_delivers_a_period() {
        let settings = CaptureSettings {
            sample_rate: 8000,
            channel: ChannelSelect::Mono,
            source: None,
            device: None,
        };
        let geometry = CaptureGeometry::new(8000, ChannelSelect::Mono);
        let mut device = CpalCaptureDevice::open(&settings, &geometry).unwrap();
        device.start().unwrap();

        let mut buffer = vec![0i16; geometry.buffer_samples()];
        assert!(device.read_period(&mut buffer, Duration::from_secs(1)).unwrap());

        device.stop().unwrap();
        device.stop().unwrap();
    }
}
