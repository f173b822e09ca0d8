//! Buffer sizes derived from the sample rate.
//!
//! Playback periods follow the modem's symbol length so one pull from the
//! encoder fills exactly one device period. Capture periods are 20 ms.

use crate::defaults::{CAPTURE_PERIODS_PER_SECOND, PLAYBACK_HEADROOM_PERIODS};
use crate::modem::ChannelSelect;
use std::time::Duration;

/// Symbol length in frames at the reference rate.
const REFERENCE_SYMBOL_FRAMES: usize = 1280;
const REFERENCE_RATE: usize = 8000;

/// Largest power of two not above `value`; zero for zero.
pub fn highest_one_bit(value: u32) -> u32 {
    if value == 0 {
        0
    } else {
        1 << (31 - value.leading_zeros())
    }
}

fn frames_to_duration(frames: usize, sample_rate: u32) -> Duration {
    Duration::from_nanos(frames as u64 * 1_000_000_000 / sample_rate.max(1) as u64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackGeometry {
    pub sample_rate: u32,
    pub channel: ChannelSelect,
    pub symbol_frames: usize,
    pub guard_frames: usize,
}

impl PlaybackGeometry {
    pub fn new(sample_rate: u32, channel: ChannelSelect) -> Self {
        let symbol_frames = REFERENCE_SYMBOL_FRAMES * sample_rate as usize / REFERENCE_RATE;
        Self {
            sample_rate,
            channel,
            symbol_frames,
            guard_frames: symbol_frames / 8,
        }
    }

    pub fn channels(&self) -> u16 {
        self.channel.channel_count()
    }

    /// Frames per period: one symbol plus its guard interval.
    pub fn period_frames(&self) -> usize {
        self.symbol_frames + self.guard_frames
    }

    /// Interleaved samples per encoder pull.
    pub fn buffer_samples(&self) -> usize {
        self.period_frames() * self.channels() as usize
    }

    /// Periods the device queue holds.
    pub fn queue_periods(&self) -> usize {
        PLAYBACK_HEADROOM_PERIODS
    }

    pub fn queue_samples(&self) -> usize {
        self.buffer_samples() * self.queue_periods()
    }

    pub fn period(&self) -> Duration {
        frames_to_duration(self.period_frames(), self.sample_rate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureGeometry {
    pub sample_rate: u32,
    pub channel: ChannelSelect,
}

impl CaptureGeometry {
    pub fn new(sample_rate: u32, channel: ChannelSelect) -> Self {
        Self {
            sample_rate,
            channel,
        }
    }

    pub fn channels(&self) -> u16 {
        self.channel.channel_count()
    }

    pub fn period_frames(&self) -> usize {
        (self.sample_rate / CAPTURE_PERIODS_PER_SECOND) as usize
    }

    pub fn buffer_samples(&self) -> usize {
        self.period_frames() * self.channels() as usize
    }

    /// Frames the device ring holds: about 1.5 to 3 seconds of audio.
    pub fn ring_frames(&self) -> usize {
        2 * highest_one_bit(3 * self.sample_rate) as usize
    }

    pub fn ring_samples(&self) -> usize {
        self.ring_frames() * self.channels() as usize
    }

    pub fn period(&self) -> Duration {
        frames_to_duration(self.period_frames(), self.sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_highest_one_bit() {
        assert_eq!(highest_one_bit(0), 0);
        assert_eq!(highest_one_bit(1), 1);
        assert_eq!(highest_one_bit(24000), 16384);
        assert_eq!(highest_one_bit(32768), 32768);
        assert_eq!(highest_one_bit(144000), 131072);
    }

    #[test]
    fn test_playback_geometry_at_8000_mono() {
        let geometry = PlaybackGeometry::new(8000, ChannelSelect::Mono);
        assert_eq!(geometry.symbol_frames, 1280);
        assert_eq!(geometry.guard_frames, 160);
        assert_eq!(geometry.period_frames(), 1440);
        assert_eq!(geometry.buffer_samples(), 1440);
        assert_eq!(geometry.queue_samples(), 7200);
        assert_eq!(geometry.period(), Duration::from_millis(180));
    }

    #[test]
    fn test_playback_geometry_at_48000_analytic() {
        let geometry = PlaybackGeometry::new(48000, ChannelSelect::Analytic);
        assert_eq!(geometry.symbol_frames, 7680);
        assert_eq!(geometry.guard_frames, 960);
        assert_eq!(geometry.period_frames(), 8640);
        assert_eq!(geometry.buffer_samples(), 17280);
    }

    #[test]
    fn test_playback_geometry_at_44100() {
        let geometry = PlaybackGeometry::new(44100, ChannelSelect::Left);
        assert_eq!(geometry.symbol_frames, 7056);
        assert_eq!(geometry.guard_frames, 882);
        assert_eq!(geometry.buffer_samples(), 2 * 7938);
    }

    #[test]
    fn test_capture_geometry() {
        let geometry = CaptureGeometry::new(8000, ChannelSelect::Mono);
        assert_eq!(geometry.period_frames(), 160);
        assert_eq!(geometry.buffer_samples(), 160);
        assert_eq!(geometry.ring_frames(), 32768);
        assert_eq!(geometry.period(), Duration::from_millis(20));

        let geometry = CaptureGeometry::new(48000, ChannelSelect::Sum);
        assert_eq!(geometry.period_frames(), 960);
        assert_eq!(geometry.buffer_samples(), 1920);
        assert_eq!(geometry.ring_frames(), 262144);
    }
}
