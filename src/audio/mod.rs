//! Audio endpoints: device traits, mocks, and the CPAL and WAV backends.

#[cfg(feature = "cpal-audio")]
pub mod capture;
pub mod device;
#[cfg(feature = "cpal-audio")]
pub mod playback;
pub mod wav;

pub use device::{
    AudioBackend, CaptureDevice, MockBackend, MockCaptureDevice, MockPlaybackDevice,
    PlaybackDevice,
};
pub use wav::WavBackend;

#[cfg(feature = "cpal-audio")]
pub use cpal_backend::CpalBackend;

#[cfg(feature = "cpal-audio")]
mod cpal_backend {
    use super::capture::CpalCaptureDevice;
    use super::device::{AudioBackend, CaptureDevice, PlaybackDevice};
    use super::playback::CpalPlaybackDevice;
    use crate::config::{CaptureSettings, PlaybackSettings};
    use crate::error::Result;
    use crate::pipeline::geometry::{CaptureGeometry, PlaybackGeometry};

    /// Opens real sound card endpoints through CPAL.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct CpalBackend;

    impl AudioBackend for CpalBackend {
        fn open_capture(
            &self,
            settings: &CaptureSettings,
            geometry: &CaptureGeometry,
        ) -> Result<Box<dyn CaptureDevice>> {
            Ok(Box::new(CpalCaptureDevice::open(settings, geometry)?))
        }

        fn open_playback(
            &self,
            settings: &PlaybackSettings,
            geometry: &PlaybackGeometry,
        ) -> Result<Box<dyn PlaybackDevice>> {
            Ok(Box::new(CpalPlaybackDevice::open(settings, geometry)?))
        }
    }
}
