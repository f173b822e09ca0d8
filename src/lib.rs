//! chirpgram - Encrypted short text messages over an acoustic modem
//!
//! Text is sealed into a fixed-size AES envelope, handed to an OFDM modem
//! and played through the sound card; the capture side decodes, decrypts
//! and records what it hears.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
pub mod clock;
pub mod config;
pub mod defaults;
pub mod envelope;
pub mod error;
pub mod modem;
pub mod pipeline;
pub mod session;
pub mod status;
pub mod transcript;

// Device seams (backend → endpoints)
pub use audio::device::{AudioBackend, CaptureDevice, PlaybackDevice};
pub use audio::{MockBackend, WavBackend};
#[cfg(feature = "cpal-audio")]
pub use audio::CpalBackend;

// Modem seam
pub use modem::{ChannelSelect, DecodeStatus, HeaderVariant, MockModem, Modem, SenderId};

// Pipeline
pub use pipeline::orchestrator::{Pipeline, PipelineHandle};

// Session and persistence
pub use session::{Session, SessionEvent};
pub use transcript::{Classification, TranscriptEntry, TranscriptStore};

// Error handling
pub use error::{ChirpError, Result};

// Config
pub use config::{Config, SessionConfig};

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
