//! Interface to the physical-layer modem.
//!
//! The modem turns payload bytes into waveform buffers and back. Its
//! internals are opaque; the core only drives it through [`Modem`]. Capture
//! and playback each own a separate instance.

use crate::defaults::MAX_SENDER_ID_LEN;
use crate::error::{ChirpError, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Result of one decoder step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecodeStatus {
    /// More samples needed.
    Okay,
    /// Preamble demodulation failed.
    Fail,
    /// Preamble acquired; sync metadata is readable.
    Sync,
    /// Payload decoded and ready to fetch.
    Done,
    /// Decoder ran out of memory.
    HeapExhausted,
    /// Sync acquired but the payload descriptor was invalid.
    Nope,
    /// Unencrypted ping detected during sync. Peers encrypt pings as regular
    /// zero-length messages, so decoders in use never report this.
    Ping,
}

impl DecodeStatus {
    /// Map a raw modem status code.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(DecodeStatus::Okay),
            1 => Some(DecodeStatus::Fail),
            2 => Some(DecodeStatus::Sync),
            3 => Some(DecodeStatus::Done),
            4 => Some(DecodeStatus::HeapExhausted),
            5 => Some(DecodeStatus::Nope),
            6 => Some(DecodeStatus::Ping),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            DecodeStatus::Okay => 0,
            DecodeStatus::Fail => 1,
            DecodeStatus::Sync => 2,
            DecodeStatus::Done => 3,
            DecodeStatus::HeapExhausted => 4,
            DecodeStatus::Nope => 5,
            DecodeStatus::Ping => 6,
        }
    }
}

/// Which device channel(s) carry the signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChannelSelect {
    /// Single-channel device.
    #[default]
    Mono,
    /// First channel of a stereo device.
    Left,
    /// Second channel of a stereo device.
    Right,
    /// Sum of both channels (capture only).
    Sum,
    /// Both channels as the real and imaginary parts of an analytic signal.
    Analytic,
}

impl ChannelSelect {
    /// Raw code passed to the modem.
    pub fn code(self) -> i32 {
        match self {
            ChannelSelect::Mono => 0,
            ChannelSelect::Left => 1,
            ChannelSelect::Right => 2,
            ChannelSelect::Sum => 3,
            ChannelSelect::Analytic => 4,
        }
    }

    /// Number of device channels this selection needs.
    pub fn channel_count(self) -> u16 {
        match self {
            ChannelSelect::Mono => 1,
            _ => 2,
        }
    }

    /// Whether this selection can be used for playback.
    pub fn supports_playback(self) -> bool {
        !matches!(self, ChannelSelect::Sum)
    }
}

/// Preamble header variant passed to the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeaderVariant {
    #[default]
    Plain,
    Fancy,
}

/// Short ASCII call sign carried next to each transmission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct SenderId(String);

impl SenderId {
    /// Validate a user-supplied sender id.
    pub fn new(id: &str) -> Result<Self> {
        if !id.is_ascii() {
            return Err(ChirpError::ConfigInvalidValue {
                key: "identity.sender_id".to_string(),
                message: "must be ASCII".to_string(),
            });
        }
        if id.len() > MAX_SENDER_ID_LEN {
            return Err(ChirpError::ConfigInvalidValue {
                key: "identity.sender_id".to_string(),
                message: format!("at most {} characters", MAX_SENDER_ID_LEN),
            });
        }
        Ok(Self(id.to_string()))
    }

    /// Decode the modem's sender field: up to the first NUL, trimmed.
    pub fn from_wire(bytes: &[u8]) -> Self {
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Self(String::from_utf8_lossy(&bytes[..end]).trim().to_string())
    }

    /// NUL-terminated bytes for the encoder.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.0.len() + 1);
        bytes.extend_from_slice(self.0.as_bytes());
        bytes.push(0);
        bytes
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.trim())
    }
}

/// Metadata the decoder exposes once the preamble is acquired.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncMetadata {
    pub carrier_frequency_offset: f32,
    pub operation_mode: i32,
    pub sender_id: SenderId,
}

/// Payload fetch failure reported by the decoder.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("payload failed error correction")]
    Uncorrectable,
}

/// Physical-layer codec.
///
/// Implementations wrap the native modem. Every method must return within a
/// fraction of one buffer period; they are called from audio callbacks.
pub trait Modem: Send {
    /// Prepare the encoder for `sample_rate`. `false` means resources are exhausted.
    fn begin_encode(&mut self, sample_rate: u32) -> bool;

    /// Load one transmission. `sender_id` is NUL-terminated.
    fn configure_encode(
        &mut self,
        payload: &[u8],
        sender_id: &[u8],
        carrier_frequency: i32,
        noise_symbols: u32,
        header: HeaderVariant,
    );

    /// Fill `buffer` with the next period. `false` once the transmission is over.
    fn pull_encode_buffer(&mut self, buffer: &mut [i16], channel: ChannelSelect) -> bool;

    fn end_encode(&mut self);

    /// Prepare the decoder for `sample_rate`. `false` means resources are exhausted.
    fn begin_decode(&mut self, sample_rate: u32) -> bool;

    /// Feed `sample_count` frames. `false` means the decoder is not ready to be stepped.
    fn push_decode_buffer(
        &mut self,
        buffer: &[i16],
        sample_count: usize,
        channel: ChannelSelect,
    ) -> bool;

    fn step_decode(&mut self) -> DecodeStatus;

    fn read_sync_metadata(&mut self) -> SyncMetadata;

    /// Copy the decoded payload into `buffer`; returns the corrected bit count.
    fn fetch_payload(&mut self, buffer: &mut [u8]) -> std::result::Result<u32, FetchError>;

    fn end_decode(&mut self);
}

/// Observable state of a [`MockModem`].
#[derive(Debug, Default)]
pub struct MockModemState {
    pub encoder_rate: Option<u32>,
    pub decoder_rate: Option<u32>,
    pub begin_encode_calls: usize,
    pub begin_decode_calls: usize,
    pub end_encode_calls: usize,
    pub end_decode_calls: usize,
    pub fail_begin: bool,
    pub reject_feed: bool,
    pub statuses: VecDeque<DecodeStatus>,
    pub sync: Option<SyncMetadata>,
    pub sync_reads: usize,
    pub payload: Option<std::result::Result<(Vec<u8>, u32), FetchError>>,
    pub fed_buffers: usize,
    pub fed_samples: usize,
    pub last_feed_channel: Option<ChannelSelect>,
    pub configured_payload: Option<Vec<u8>>,
    pub configured_sender: Option<Vec<u8>>,
    pub configured_carrier: Option<i32>,
    pub configured_noise: Option<u32>,
    pub configured_header: Option<HeaderVariant>,
    pub encode_buffers_left: usize,
    pub pulled_buffers: usize,
}

/// Scripted modem for tests. Clones share state, so a test can keep one
/// clone to inspect what the pipeline did with the other.
#[derive(Debug, Clone)]
pub struct MockModem {
    state: Arc<Mutex<MockModemState>>,
    encode_length: usize,
}

impl MockModem {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockModemState::default())),
            encode_length: 3,
        }
    }

    /// Statuses returned by successive `step_decode` calls; `Okay` afterwards.
    pub fn with_statuses(self, statuses: impl IntoIterator<Item = DecodeStatus>) -> Self {
        self.state().statuses.extend(statuses);
        self
    }

    pub fn with_sync(self, sync: SyncMetadata) -> Self {
        self.state().sync = Some(sync);
        self
    }

    /// Payload handed out by `fetch_payload`, with its bit-error count.
    pub fn with_payload(self, payload: Vec<u8>, bit_errors: u32) -> Self {
        self.state().payload = Some(Ok((payload, bit_errors)));
        self
    }

    pub fn with_fetch_failure(self) -> Self {
        self.state().payload = Some(Err(FetchError::Uncorrectable));
        self
    }

    /// Make `begin_encode`/`begin_decode` report exhaustion.
    pub fn with_heap_exhaustion(self) -> Self {
        self.state().fail_begin = true;
        self
    }

    pub fn with_rejected_feed(self) -> Self {
        self.state().reject_feed = true;
        self
    }

    /// Number of buffers each configured transmission lasts.
    pub fn with_encode_length(mut self, buffers: usize) -> Self {
        self.encode_length = buffers;
        self
    }

    /// Queue more decode statuses after construction.
    pub fn push_statuses(&self, statuses: impl IntoIterator<Item = DecodeStatus>) {
        self.state().statuses.extend(statuses);
    }

    /// Inspect shared state.
    pub fn state(&self) -> MutexGuard<'_, MockModemState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for MockModem {
    fn default() -> Self {
        Self::new()
    }
}

impl Modem for MockModem {
    fn begin_encode(&mut self, sample_rate: u32) -> bool {
        let mut state = self.state();
        state.begin_encode_calls += 1;
        if state.fail_begin {
            return false;
        }
        state.encoder_rate = Some(sample_rate);
        true
    }

    fn configure_encode(
        &mut self,
        payload: &[u8],
        sender_id: &[u8],
        carrier_frequency: i32,
        noise_symbols: u32,
        header: HeaderVariant,
    ) {
        let length = self.encode_length;
        let mut state = self.state();
        state.configured_payload = Some(payload.to_vec());
        state.configured_sender = Some(sender_id.to_vec());
        state.configured_carrier = Some(carrier_frequency);
        state.configured_noise = Some(noise_symbols);
        state.configured_header = Some(header);
        state.encode_buffers_left = length;
    }

    fn pull_encode_buffer(&mut self, buffer: &mut [i16], _channel: ChannelSelect) -> bool {
        let mut state = self.state();
        if state.encode_buffers_left == 0 {
            buffer.fill(0);
            return false;
        }
        state.encode_buffers_left -= 1;
        state.pulled_buffers += 1;
        let marker = state.pulled_buffers as i16;
        buffer.fill(marker);
        true
    }

    fn end_encode(&mut self) {
        let mut state = self.state();
        state.end_encode_calls += 1;
        state.encoder_rate = None;
    }

    fn begin_decode(&mut self, sample_rate: u32) -> bool {
        let mut state = self.state();
        state.begin_decode_calls += 1;
        if state.fail_begin {
            return false;
        }
        state.decoder_rate = Some(sample_rate);
        true
    }

    fn push_decode_buffer(
        &mut self,
        _buffer: &[i16],
        sample_count: usize,
        channel: ChannelSelect,
    ) -> bool {
        let mut state = self.state();
        state.fed_buffers += 1;
        state.fed_samples += sample_count;
        state.last_feed_channel = Some(channel);
        !state.reject_feed
    }

    fn step_decode(&mut self) -> DecodeStatus {
        self.state()
            .statuses
            .pop_front()
            .unwrap_or(DecodeStatus::Okay)
    }

    fn read_sync_metadata(&mut self) -> SyncMetadata {
        let mut state = self.state();
        state.sync_reads += 1;
        state.sync.clone().unwrap_or(SyncMetadata {
            carrier_frequency_offset: 0.0,
            operation_mode: 0,
            sender_id: SenderId::default(),
        })
    }

    fn fetch_payload(&mut self, buffer: &mut [u8]) -> std::result::Result<u32, FetchError> {
        let state = self.state();
        match &state.payload {
            Some(Ok((payload, bit_errors))) => {
                buffer.fill(0);
                let n = payload.len().min(buffer.len());
                buffer[..n].copy_from_slice(&payload[..n]);
                Ok(*bit_errors)
            }
            Some(Err(e)) => Err(e.clone()),
            None => Err(FetchError::Uncorrectable),
        }
    }

    fn end_decode(&mut self) {
        let mut state = self.state();
        state.end_decode_calls += 1;
        state.decoder_rate = None;
    }
}
