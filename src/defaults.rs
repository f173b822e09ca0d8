//! Default configuration constants for chirpgram.
//!
//! Shared between the config layer, the envelope codec and the audio
//! pipeline so that peers built from the same reference agree on them.

use std::time::Duration;

/// Default sample rate in Hz for both capture and playback.
pub const SAMPLE_RATE: u32 = 8000;

/// Sample rates the modem accepts.
pub const SUPPORTED_RATES: &[u32] = &[8000, 16000, 32000, 44100, 48000];

/// Default carrier frequency in Hz.
pub const CARRIER_FREQUENCY: i32 = 1500;

/// Carrier frequency bounds in Hz. Analytic output may also use negative
/// frequencies down to `-MAX_CARRIER_FREQUENCY`.
pub const MIN_CARRIER_FREQUENCY: i32 = 1000;
pub const MAX_CARRIER_FREQUENCY: i32 = 3000;

/// Carrier frequencies are chosen on this grid.
pub const CARRIER_STEP: i32 = 50;

/// Default number of noise symbols sent ahead of the preamble (about one second).
pub const NOISE_SYMBOLS: u32 = 6;

/// Noise symbol counts peers offer: off, 1/4 s, 1/2 s, 1 s, 2 s, 4 s.
pub const SUPPORTED_NOISE_SYMBOLS: &[u32] = &[0, 1, 3, 6, 11, 22];

/// Default sender id.
pub const SENDER_ID: &str = "ANONYMOUS";

/// Longest sender id; the modem's sender field is 10 bytes including the NUL.
pub const MAX_SENDER_ID_LEN: usize = 9;

/// Default shared password.
pub const PASSWORD: &str = "password";

/// Physical-layer payload capacity in bytes.
pub const PAYLOAD_CAPACITY: usize = 170;

/// Envelope header: 16-byte IV plus one length byte.
pub const IV_LEN: usize = 16;
pub const ENVELOPE_HEADER_LEN: usize = IV_LEN + 1;

/// Cipher block size in bytes.
pub const BLOCK_LEN: usize = 16;

/// PBKDF2 iteration count.
pub const KDF_ITERATIONS: u32 = 2048;

/// Transcript capacity in entries.
pub const TRANSCRIPT_CAPACITY: usize = 100;

/// Buffers pulled from the encoder before playback starts.
pub const PRIME_BUFFERS: usize = 5;

/// Playback device headroom, in buffer periods.
pub const PLAYBACK_HEADROOM_PERIODS: usize = 5;

/// Delay between the end of a transmission and capture resuming.
pub const RESUME_COOLDOWN: Duration = Duration::from_secs(1);

/// How long a transient status notice stays visible.
pub const STATUS_NOTICE_HOLD: Duration = Duration::from_secs(10);

/// Capture periods per second (a 20 ms period).
pub const CAPTURE_PERIODS_PER_SECOND: u32 = 50;
