//! WAV file endpoints: replay a recording into the decoder, or record a
//! transmission to disk.

use crate::audio::device::{AudioBackend, CaptureDevice, PlaybackDevice};
use crate::config::{CaptureSettings, PlaybackSettings};
use crate::error::{ChirpError, Result};
use crate::pipeline::geometry::{CaptureGeometry, PlaybackGeometry};
use std::fs::File;
use std::io::{BufWriter, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn wav_error(context: &str, e: hound::Error) -> ChirpError {
    ChirpError::AudioDevice {
        message: format!("{}: {}", context, e),
    }
}

/// Capture device that replays WAV data at the capture geometry's rate and
/// channel count. Runs dry at the end of the recording.
pub struct WavCaptureDevice {
    samples: Vec<i16>,
    position: usize,
    started: bool,
}

impl WavCaptureDevice {
    /// Create from any reader (for testing/flexibility).
    pub fn from_reader(reader: Box<dyn Read + Send>, geometry: &CaptureGeometry) -> Result<Self> {
        let mut wav_reader =
            hound::WavReader::new(reader).map_err(|e| wav_error("Failed to parse WAV file", e))?;

        let spec = wav_reader.spec();
        let raw_samples: Vec<i16> = wav_reader
            .samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| wav_error("Failed to read WAV samples", e))?;

        let mono = to_mono(&raw_samples, spec.channels);
        let mono = resample(&mono, spec.sample_rate, geometry.sample_rate);
        let samples = from_mono(&mono, geometry.channels());

        Ok(Self {
            samples,
            position: 0,
            started: false,
        })
    }

    pub fn open(path: &Path, geometry: &CaptureGeometry) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(Box::new(file), geometry)
    }

    /// True once every sample has been delivered.
    pub fn is_exhausted(&self) -> bool {
        self.position >= self.samples.len()
    }
}

impl CaptureDevice for WavCaptureDevice {
    fn start(&mut self) -> Result<()> {
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.started = false;
        Ok(())
    }

    fn read_period(&mut self, buffer: &mut [i16], _timeout: Duration) -> Result<bool> {
        if !self.started || self.is_exhausted() {
            return Ok(false);
        }

        let end = std::cmp::min(self.position + buffer.len(), self.samples.len());
        let chunk = &self.samples[self.position..end];
        buffer[..chunk.len()].copy_from_slice(chunk);
        buffer[chunk.len()..].fill(0);
        self.position = end;
        Ok(true)
    }
}

/// Playback device that appends every queued period to a WAV file.
pub struct WavPlaybackDevice {
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    playing: bool,
}

impl WavPlaybackDevice {
    pub fn create(path: &Path, geometry: &PlaybackGeometry) -> Result<Self> {
        let spec = hound::WavSpec {
            channels: geometry.channels(),
            sample_rate: geometry.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(path, spec)
            .map_err(|e| wav_error("Failed to create WAV file", e))?;
        Ok(Self {
            writer: Some(writer),
            playing: false,
        })
    }

    /// Write the WAV header and close the file.
    pub fn finalize(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer
                .finalize()
                .map_err(|e| wav_error("Failed to finalize WAV file", e))?;
        }
        Ok(())
    }
}

impl PlaybackDevice for WavPlaybackDevice {
    fn write(&mut self, buffer: &[i16], _timeout: Duration) -> Result<bool> {
        let writer = self.writer.as_mut().ok_or_else(|| ChirpError::AudioDevice {
            message: "WAV output already finalized".to_string(),
        })?;
        for &sample in buffer {
            writer
                .write_sample(sample)
                .map_err(|e| wav_error("Failed to write WAV samples", e))?;
        }
        Ok(true)
    }

    fn play(&mut self) -> Result<()> {
        self.playing = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.playing = false;
        if let Some(writer) = self.writer.as_mut() {
            writer
                .flush()
                .map_err(|e| wav_error("Failed to flush WAV file", e))?;
        }
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.playing
    }
}

impl Drop for WavPlaybackDevice {
    fn drop(&mut self) {
        if let Err(e) = self.finalize() {
            tracing::warn!("{}", e);
        }
    }
}

/// Backend reading capture audio from one WAV file and writing playback
/// audio to another. Either side may be left unset.
#[derive(Debug, Clone, Default)]
pub struct WavBackend {
    capture_path: Option<PathBuf>,
    playback_path: Option<PathBuf>,
}

impl WavBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capture_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.capture_path = Some(path.into());
        self
    }

    pub fn with_playback_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.playback_path = Some(path.into());
        self
    }
}

impl AudioBackend for WavBackend {
    fn open_capture(
        &self,
        _settings: &CaptureSettings,
        geometry: &CaptureGeometry,
    ) -> Result<Box<dyn CaptureDevice>> {
        let path = self
            .capture_path
            .as_deref()
            .ok_or_else(|| ChirpError::AudioDeviceNotFound {
                device: "capture WAV file".to_string(),
            })?;
        Ok(Box::new(WavCaptureDevice::open(path, geometry)?))
    }

    fn open_playback(
        &self,
        _settings: &PlaybackSettings,
        geometry: &PlaybackGeometry,
    ) -> Result<Box<dyn PlaybackDevice>> {
        let path = self
            .playback_path
            .as_deref()
            .ok_or_else(|| ChirpError::AudioDeviceNotFound {
                device: "playback WAV file".to_string(),
            })?;
        Ok(Box::new(WavPlaybackDevice::create(path, geometry)?))
    }
}

/// Average interleaved frames down to one channel.
fn to_mono(samples: &[i16], channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let channels = channels as usize;
    samples
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

/// Duplicate each sample across `channels`.
fn from_mono(samples: &[i16], channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .iter()
        .flat_map(|&s| std::iter::repeat_n(s, channels as usize))
        .collect()
}

/// Simple linear interpolation resampling.
fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(samples.len() - 1);
            let fraction = source_pos - source_idx as f64;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = samples[source_idx] as f64;
                let right = samples[source_idx + 1] as f64;
                (left + (right - left) * fraction) as i16
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modem::ChannelSelect;
    use std::io::Cursor;
    use tempfile::TempDir;

    const TIMEOUT: Duration = Duration::from_millis(20);

    fn make_wav_data(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
        cursor.into_inner()
    }

    fn capture(data: Vec<u8>, rate: u32, channel: ChannelSelect) -> WavCaptureDevice {
        let geometry = CaptureGeometry::new(rate, channel);
        WavCaptureDevice::from_reader(Box::new(Cursor::new(data)), &geometry).unwrap()
    }

    #[test]
    fn from_reader_matching_format_is_exact() {
        let input_samples = vec![100i16, 200, 300, 400, 500];
        let device = capture(make_wav_data(8000, 1, &input_samples), 8000, ChannelSelect::Mono);
        assert_eq!(device.samples, input_samples);
    }

    #[test]
    fn from_reader_stereo_downmixes_for_mono_capture() {
        let stereo_samples = vec![100i16, 200, 300, 400, -500, -600];
        let device = capture(make_wav_data(8000, 2, &stereo_samples), 8000, ChannelSelect::Mono);
        assert_eq!(device.samples, vec![150i16, 350, -550]);
    }

    #[test]
    fn from_reader_mono_duplicates_for_two_channel_capture() {
        let device = capture(make_wav_data(8000, 1, &[1, 2]), 8000, ChannelSelect::Analytic);
        assert_eq!(device.samples, vec![1, 1, 2, 2]);
    }

    #[test]
    fn from_reader_resamples_to_capture_rate() {
        let input_samples = vec![0i16; 48000];
        let device = capture(make_wav_data(48000, 1, &input_samples), 8000, ChannelSelect::Mono);
        assert!(device.samples.len() >= 7950 && device.samples.len() <= 8050);
    }

    #[test]
    fn read_period_requires_start_and_pads_tail() {
        let mut device = capture(make_wav_data(8000, 1, &[1, 2, 3, 4, 5]), 8000, ChannelSelect::Mono);
        let mut buffer = [9i16; 4];

        assert!(!device.read_period(&mut buffer, TIMEOUT).unwrap());

        device.start().unwrap();
        assert!(device.read_period(&mut buffer, TIMEOUT).unwrap());
        assert_eq!(buffer, [1, 2, 3, 4]);
        assert!(device.read_period(&mut buffer, TIMEOUT).unwrap());
        assert_eq!(buffer, [5, 0, 0, 0]);
        assert!(device.is_exhausted());
        assert!(!device.read_period(&mut buffer, TIMEOUT).unwrap());
    }

    #[test]
    fn invalid_wav_data_returns_error() {
        let geometry = CaptureGeometry::new(8000, ChannelSelect::Mono);
        let result =
            WavCaptureDevice::from_reader(Box::new(Cursor::new(b"not a wav".to_vec())), &geometry);
        assert!(matches!(result, Err(ChirpError::AudioDevice { .. })));
    }

    #[test]
    fn resample_identity_and_edges() {
        assert_eq!(resample(&[1, 2, 3], 8000, 8000), vec![1, 2, 3]);
        assert!(resample(&[], 48000, 8000).is_empty());
        assert_eq!(resample(&[7], 8000, 16000), vec![7, 7]);
    }

    #[test]
    fn resample_upsample_interpolates() {
        assert_eq!(resample(&[0, 100], 8000, 16000), vec![0, 50, 100, 100]);
    }

    #[test]
    fn playback_writes_a_readable_wav() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.wav");
        let geometry = PlaybackGeometry::new(16000, ChannelSelect::Left);

        let mut device = WavPlaybackDevice::create(&path, &geometry).unwrap();
        assert!(device.write(&[1, 2, 3, 4], TIMEOUT).unwrap());
        device.play().unwrap();
        assert!(device.is_playing());
        assert!(device.write(&[5, 6], TIMEOUT).unwrap());
        device.stop().unwrap();
        device.finalize().unwrap();
        assert!(device.write(&[7, 8], TIMEOUT).is_err());

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_rate, 16000);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn backend_without_paths_reports_missing_device() {
        let backend = WavBackend::new();
        let settings = CaptureSettings {
            sample_rate: 8000,
            channel: ChannelSelect::Mono,
            source: None,
            device: None,
        };
        let geometry = CaptureGeometry::new(8000, ChannelSelect::Mono);
        assert!(matches!(
            backend.open_capture(&settings, &geometry),
            Err(ChirpError::AudioDeviceNotFound { .. })
        ));
    }

    #[test]
    fn backend_replays_recorded_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("in.wav");
        std::fs::write(&path, make_wav_data(8000, 1, &[3; 320])).unwrap();

        let backend = WavBackend::new().with_capture_file(&path);
        let settings = CaptureSettings {
            sample_rate: 8000,
            channel: ChannelSelect::Mono,
            source: None,
            device: None,
        };
        let geometry = CaptureGeometry::new(8000, ChannelSelect::Mono);
        let mut device = backend.open_capture(&settings, &geometry).unwrap();
        device.start().unwrap();

        let mut buffer = vec![0i16; geometry.buffer_samples()];
        assert!(device.read_period(&mut buffer, TIMEOUT).unwrap());
        assert!(device.read_period(&mut buffer, TIMEOUT).unwrap());
        assert!(!device.read_period(&mut buffer, TIMEOUT).unwrap());
    }
}
