//! Session state machine.
//!
//! Turns the decoder's per-buffer [`DecodeStatus`] into transcript lines,
//! status notices and [`SessionEvent`]s, and frames outgoing text into
//! envelopes. The only state carried between statuses is the [`StagedSync`]
//! captured when a preamble is acquired.

use crate::config::SessionConfig;
use crate::defaults::PAYLOAD_CAPACITY;
use crate::envelope::{self, Envelope, Payload};
use crate::error::Result;
use crate::modem::{DecodeStatus, Modem, SenderId, SyncMetadata};
use crate::status::StatusLine;
use crate::transcript::{Classification, TranscriptEntry, TranscriptStore};
use crossbeam_channel::{Sender, TrySendError};

pub const STATUS_LISTENING: &str = "listening";
pub const STATUS_TRANSMITTING: &str = "transmitting";
pub const STATUS_HEAP_EXHAUSTED: &str = "heap exhausted";
pub const STATUS_RECORDING_ERROR: &str = "audio recording error";
pub const STATUS_DEVICE_NOT_FOUND: &str = "audio device not found";
pub const STATUS_SETUP_ERROR: &str = "audio setup failed";

/// Sync metadata held for the reception attempt in progress.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedSync {
    pub carrier_frequency_offset: f32,
    pub operation_mode: i32,
    pub sender_id: SenderId,
}

impl From<SyncMetadata> for StagedSync {
    fn from(meta: SyncMetadata) -> Self {
        Self {
            carrier_frequency_offset: meta.carrier_frequency_offset,
            operation_mode: meta.operation_mode,
            sender_id: meta.sender_id,
        }
    }
}

impl StagedSync {
    fn describe(&self) -> String {
        format!(
            "from {} mode {} cfo {:.2} Hz",
            self.sender_id, self.operation_mode, self.carrier_frequency_offset
        )
    }
}

/// What handling one decoder status (or one transmit request) produced.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Nothing of note.
    Idle,
    PreambleFailed,
    SyncAcquired(StagedSync),
    SyncRejected {
        sender: SenderId,
        mode: i32,
    },
    Received {
        sender: SenderId,
        text: String,
        bit_errors: u32,
    },
    ReceivedPing {
        sender: SenderId,
        bit_errors: u32,
    },
    ReceivedDecryptFailed {
        sender: SenderId,
        raw: String,
        bit_errors: u32,
    },
    DecodeFailed {
        sender: SenderId,
    },
    Transmitted {
        text: String,
    },
    TransmittedPing,
    PasswordChanged,
    /// The decoder ran out of memory; capture must halt.
    HeapExhausted,
}

impl SessionEvent {
    /// Whether the capture lane must stop after this event.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SessionEvent::HeapExhausted)
    }
}

/// Modem payloads are fixed-size and NUL padded; strip the padding and
/// surrounding whitespace like peers do.
fn payload_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_matches(|c: char| c <= ' ')
        .to_string()
}

pub struct Session {
    staged: Option<StagedSync>,
    transcript: TranscriptStore,
    status: StatusLine,
    payload: [u8; PAYLOAD_CAPACITY],
    events: Option<Sender<SessionEvent>>,
}

impl Session {
    pub fn new(transcript: TranscriptStore) -> Self {
        Self::with_status(transcript, StatusLine::new())
    }

    pub fn with_status(transcript: TranscriptStore, status: StatusLine) -> Self {
        Self {
            staged: None,
            transcript,
            status,
            payload: [0; PAYLOAD_CAPACITY],
            events: None,
        }
    }

    /// Publish every event on `sender` as well. Full or closed channels
    /// drop the event rather than block the audio path.
    pub fn with_event_sender(mut self, sender: Sender<SessionEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    pub fn staged(&self) -> Option<&StagedSync> {
        self.staged.as_ref()
    }

    pub fn transcript(&self) -> &TranscriptStore {
        &self.transcript
    }

    pub fn transcript_mut(&mut self) -> &mut TranscriptStore {
        &mut self.transcript
    }

    pub fn status(&self) -> &StatusLine {
        &self.status
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        let status = status.into();
        tracing::debug!(status = %status, "status changed");
        self.status.set(status);
    }

    /// Interpret one decoder status. `decoder` is the capture lane's modem,
    /// queried for sync metadata and payloads as the status requires.
    pub fn handle_status(
        &mut self,
        status: DecodeStatus,
        decoder: &mut dyn Modem,
        config: &SessionConfig,
    ) -> SessionEvent {
        let event = match status {
            DecodeStatus::Okay | DecodeStatus::Ping => SessionEvent::Idle,
            DecodeStatus::Fail => {
                tracing::debug!("preamble failed");
                self.status.notify("preamble failed");
                SessionEvent::PreambleFailed
            }
            DecodeStatus::Sync => {
                let staged = StagedSync::from(decoder.read_sync_metadata());
                tracing::info!(
                    sender = %staged.sender_id,
                    mode = staged.operation_mode,
                    cfo = staged.carrier_frequency_offset,
                    "sync acquired"
                );
                self.status.notify(staged.describe());
                self.staged = Some(staged.clone());
                SessionEvent::SyncAcquired(staged)
            }
            DecodeStatus::Nope => {
                let staged = StagedSync::from(decoder.read_sync_metadata());
                tracing::info!(
                    sender = %staged.sender_id,
                    mode = staged.operation_mode,
                    "preamble with unsupported mode"
                );
                self.status.notify(staged.describe());
                self.record(TranscriptEntry::new(
                    staged.sender_id.clone(),
                    Classification::SyncRejected {
                        mode: staged.operation_mode,
                    },
                ));
                let event = SessionEvent::SyncRejected {
                    sender: staged.sender_id.clone(),
                    mode: staged.operation_mode,
                };
                self.staged = Some(staged);
                event
            }
            DecodeStatus::Done => self.payload_ready(decoder, config),
            DecodeStatus::HeapExhausted => {
                tracing::error!("decoder heap exhausted, capture halted");
                self.status.set(STATUS_HEAP_EXHAUSTED);
                self.staged = None;
                SessionEvent::HeapExhausted
            }
        };
        self.publish(&event);
        event
    }

    fn payload_ready(&mut self, decoder: &mut dyn Modem, config: &SessionConfig) -> SessionEvent {
        // A reception attempt ends here whatever the outcome.
        let sender = self
            .staged
            .take()
            .map(|staged| staged.sender_id)
            .unwrap_or_default();

        self.payload.fill(0);
        let bit_errors = match decoder.fetch_payload(&mut self.payload) {
            Ok(bit_errors) => bit_errors,
            Err(e) => {
                tracing::warn!(sender = %sender, "payload fetch failed: {}", e);
                self.record(TranscriptEntry::new(
                    sender.clone(),
                    Classification::DecodeFailed,
                ));
                return SessionEvent::DecodeFailed { sender };
            }
        };

        self.status.notify(format!(
            "{} bit{} flipped",
            bit_errors,
            if bit_errors == 1 { "" } else { "s" }
        ));

        match envelope::decrypt(&self.payload, &config.password) {
            Ok(plaintext) => match Payload::classify(plaintext) {
                Payload::Ping => {
                    tracing::info!(sender = %sender, bit_errors, "ping received");
                    self.record(TranscriptEntry::new(
                        sender.clone(),
                        Classification::ReceivedPing,
                    ));
                    SessionEvent::ReceivedPing { sender, bit_errors }
                }
                Payload::Message(bytes) => {
                    let text = payload_text(&bytes);
                    tracing::info!(sender = %sender, bit_errors, "message received");
                    self.record(
                        TranscriptEntry::new(sender.clone(), Classification::Received)
                            .with_body(text.clone()),
                    );
                    SessionEvent::Received {
                        sender,
                        text,
                        bit_errors,
                    }
                }
            },
            Err(e) => {
                let raw = payload_text(&self.payload);
                tracing::warn!(sender = %sender, "could not open envelope: {}", e);
                self.record(
                    TranscriptEntry::new(sender.clone(), Classification::ReceivedDecryptFailed)
                        .with_body(raw.clone()),
                );
                SessionEvent::ReceivedDecryptFailed {
                    sender,
                    raw,
                    bit_errors,
                }
            }
        }
    }

    /// Frame `text` for transmission. Nothing is recorded when this fails.
    pub fn compose(&self, text: &str, config: &SessionConfig) -> Result<Envelope> {
        envelope::encrypt(text.as_bytes(), &config.password)
    }

    /// Log an outgoing transmission once playback has been handed the
    /// envelope.
    pub fn record_transmission(&mut self, text: &str, config: &SessionConfig) -> SessionEvent {
        let sender = config.sender_id.clone();
        let event = if text.is_empty() {
            self.record(TranscriptEntry::new(sender, Classification::SentPing));
            SessionEvent::TransmittedPing
        } else {
            self.record(TranscriptEntry::new(sender, Classification::Sent).with_body(text));
            SessionEvent::Transmitted {
                text: text.to_string(),
            }
        };
        self.set_status(STATUS_TRANSMITTING);
        self.publish(&event);
        event
    }

    /// Note in the transcript that the shared password changed. Messages
    /// logged before this line were opened with the old one.
    pub fn record_password_change(&mut self) -> SessionEvent {
        tracing::info!("password changed");
        self.record(TranscriptEntry::new(
            SenderId::default(),
            Classification::PasswordChanged,
        ));
        let event = SessionEvent::PasswordChanged;
        self.publish(&event);
        event
    }

    /// Drop the transcript, in memory and persisted.
    pub fn clear_transcript(&mut self) -> Result<()> {
        self.transcript.clear()
    }

    fn record(&mut self, entry: TranscriptEntry) {
        if let Err(e) = self.transcript.append(entry) {
            tracing::warn!("failed to persist transcript: {}", e);
        }
    }

    fn publish(&self, event: &SessionEvent) {
        if matches!(event, SessionEvent::Idle) {
            return;
        }
        if let Some(tx) = &self.events {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => tracing::debug!("event channel full, dropping event"),
                Err(TrySendError::Disconnected(_)) => {}
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("staged", &self.staged)
            .field("transcript", &self.transcript)
            .field("status", &self.status)
            .finish()
    }
}
