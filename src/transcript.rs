//! Bounded, persisted transcript of session events.
//!
//! Entries are kept most-recent-first. Every mutation is written through to
//! the backend before returning, so a crash loses nothing already shown.

use crate::defaults;
use crate::error::Result;
use crate::modem::SenderId;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// What kind of event an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Classification {
    Sent,
    SentPing,
    Received,
    ReceivedPing,
    ReceivedDecryptFailed,
    PreambleFailed,
    SyncAcquired,
    SyncRejected { mode: i32 },
    DecodeFailed,
    /// Local notice: the shared password was changed.
    PasswordChanged,
}

impl Classification {
    /// Short human-readable label.
    pub fn label(&self) -> String {
        match self {
            Classification::Sent => "transmitted".to_string(),
            Classification::SentPing => "sent ping".to_string(),
            Classification::Received => "received".to_string(),
            Classification::ReceivedPing => "ping".to_string(),
            Classification::ReceivedDecryptFailed => "received (decrypt failed)".to_string(),
            Classification::PreambleFailed => "preamble failed".to_string(),
            Classification::SyncAcquired => "sync".to_string(),
            Classification::SyncRejected { mode } => format!("unsupported mode {}", mode),
            Classification::DecodeFailed => "decoding failed".to_string(),
            Classification::PasswordChanged => "password changed".to_string(),
        }
    }
}

/// One transcript line. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    timestamp: DateTime<Local>,
    sender: SenderId,
    classification: Classification,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    body: Option<String>,
}

impl TranscriptEntry {
    /// A body-less entry stamped with the current local time.
    pub fn new(sender: SenderId, classification: Classification) -> Self {
        Self {
            timestamp: Local::now(),
            sender,
            classification,
            body: None,
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Local>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn timestamp(&self) -> DateTime<Local> {
        self.timestamp
    }

    pub fn sender(&self) -> &SenderId {
        &self.sender
    }

    pub fn classification(&self) -> Classification {
        self.classification
    }

    /// Message text, if this entry carries one. Also what a composer would
    /// prefill when re-sending the entry.
    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    /// `"<time> <sender> <label>"`, plus `"\n<body>"` when there is one.
    /// Entries without a sender render as `"<time> <label>"`.
    pub fn render(&self) -> String {
        let time = self.timestamp.format("%Y-%m-%d %H:%M:%S");
        let label = self.classification.label();
        let sender = self.sender.to_string();
        let title = if sender.is_empty() {
            format!("{} {}", time, label)
        } else {
            format!("{} {} {}", time, sender, label)
        };
        match &self.body {
            Some(body) => format!("{}\n{}", title, body),
            None => title,
        }
    }
}

/// Where transcript entries are persisted.
pub trait TranscriptBackend: Send {
    /// Load entries in stored (most-recent-first) order.
    fn load(&mut self) -> Result<Vec<TranscriptEntry>>;

    /// Replace the persisted entries.
    fn store(&mut self, entries: &[TranscriptEntry]) -> Result<()>;

    /// Remove the persisted representation.
    fn clear(&mut self) -> Result<()>;
}

/// In-memory backend. Clones share storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    stored: Arc<Mutex<Vec<TranscriptEntry>>>,
    writes: Arc<Mutex<usize>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate as if a previous session had persisted `entries`.
    pub fn with_entries(entries: Vec<TranscriptEntry>) -> Self {
        Self {
            stored: Arc::new(Mutex::new(entries)),
            writes: Arc::new(Mutex::new(0)),
        }
    }

    pub fn stored(&self) -> Vec<TranscriptEntry> {
        self.stored.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Number of `store` calls so far.
    pub fn writes(&self) -> usize {
        self.writes.lock().map(|w| *w).unwrap_or(0)
    }
}

impl TranscriptBackend for MemoryBackend {
    fn load(&mut self) -> Result<Vec<TranscriptEntry>> {
        Ok(self.stored())
    }

    fn store(&mut self, entries: &[TranscriptEntry]) -> Result<()> {
        if let Ok(mut stored) = self.stored.lock() {
            *stored = entries.to_vec();
        }
        if let Ok(mut writes) = self.writes.lock() {
            *writes += 1;
        }
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        if let Ok(mut stored) = self.stored.lock() {
            stored.clear();
        }
        Ok(())
    }
}

/// JSON file backend. Writes go to a sibling temp file which is then renamed
/// over the target, so a torn write never replaces a good transcript.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<data dir>/chirpgram/transcript.json`
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("chirpgram")
            .join("transcript.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl TranscriptBackend for JsonFileBackend {
    fn load(&mut self) -> Result<Vec<TranscriptEntry>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&mut self, entries: &[TranscriptEntry]) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(entries)?;
        let temp = self.temp_path();
        fs::write(&temp, json)?;
        fs::rename(&temp, &self.path)?;
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Bounded most-recent-first log with write-through persistence.
pub struct TranscriptStore {
    entries: VecDeque<TranscriptEntry>,
    capacity: usize,
    backend: Box<dyn TranscriptBackend>,
}

impl TranscriptStore {
    pub fn new(backend: Box<dyn TranscriptBackend>) -> Self {
        Self::with_capacity(backend, defaults::TRANSCRIPT_CAPACITY)
    }

    pub fn with_capacity(backend: Box<dyn TranscriptBackend>, capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            backend,
        }
    }

    /// In-memory store, nothing survives the process.
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryBackend::new()))
    }

    /// Load persisted entries, replacing whatever is in memory.
    ///
    /// Keeps at most `capacity` entries, newest first. Returns how many were
    /// restored.
    pub fn restore(&mut self) -> Result<usize> {
        let mut loaded = self.backend.load()?;
        loaded.truncate(self.capacity);
        self.entries = loaded.into();
        tracing::debug!(entries = self.entries.len(), "transcript restored");
        Ok(self.entries.len())
    }

    /// Insert at the front, evicting the oldest entry when full, then persist.
    ///
    /// The entry stays in memory even if persisting fails.
    pub fn append(&mut self, entry: TranscriptEntry) -> Result<()> {
        if self.capacity == 0 {
            return Ok(());
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_back();
        }
        self.entries.push_front(entry);
        self.persist()
    }

    /// Drop every entry and the persisted copy.
    pub fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        self.backend.clear()
    }

    fn persist(&mut self) -> Result<()> {
        let entries = self.entries.make_contiguous();
        self.backend.store(entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entry `index`, 0 being the most recent.
    pub fn get(&self, index: usize) -> Option<&TranscriptEntry> {
        self.entries.get(index)
    }

    pub fn latest(&self) -> Option<&TranscriptEntry> {
        self.entries.front()
    }

    /// Most recent first.
    pub fn iter(&self) -> impl Iterator<Item = &TranscriptEntry> {
        self.entries.iter()
    }
}

impl std::fmt::Debug for TranscriptStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscriptStore")
            .field("len", &self.entries.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn sender(id: &str) -> SenderId {
        SenderId::new(id).unwrap()
    }

    fn numbered(n: usize) -> TranscriptEntry {
        TranscriptEntry::new(sender("TEST"), Classification::Received).with_body(n.to_string())
    }

    #[test]
    fn test_append_inserts_at_front_and_persists() {
        let backend = MemoryBackend::new();
        let mut store = TranscriptStore::new(Box::new(backend.clone()));

        store.append(numbered(1)).unwrap();
        store.append(numbered(2)).unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.latest().unwrap().body(), Some("2"));
        assert_eq!(store.get(1).unwrap().body(), Some("1"));
        assert_eq!(backend.writes(), 2);
        assert_eq!(backend.stored()[0].body(), Some("2"));
    }

    #[test]
    fn test_101_entries_into_capacity_100() {
        let mut store = TranscriptStore::in_memory();
        for n in 0..101 {
            store.append(numbered(n)).unwrap();
        }

        assert_eq!(store.len(), 100);
        assert_eq!(store.latest().unwrap().body(), Some("100"));
        assert_eq!(store.get(99).unwrap().body(), Some("1"));
        assert!(store.iter().all(|e| e.body() != Some("0")));
    }

    #[test]
    fn test_clear_removes_entries_and_persisted_copy() {
        let backend = MemoryBackend::new();
        let mut store = TranscriptStore::new(Box::new(backend.clone()));
        store.append(numbered(1)).unwrap();

        store.clear().unwrap();

        assert!(store.is_empty());
        assert!(backend.stored().is_empty());
    }

    #[test]
    fn test_restore_keeps_stored_order_and_capacity() {
        let persisted: Vec<_> = (0..5).rev().map(numbered).collect();
        let backend = MemoryBackend::with_entries(persisted);
        let mut store = TranscriptStore::with_capacity(Box::new(backend), 3);

        assert_eq!(store.restore().unwrap(), 3);

        let bodies: Vec<_> = store.iter().filter_map(|e| e.body()).collect();
        assert_eq!(bodies, vec!["4", "3", "2"]);
    }

    #[test]
    fn test_zero_capacity_store_keeps_nothing() {
        let mut store = TranscriptStore::with_capacity(Box::new(MemoryBackend::new()), 0);
        store.append(numbered(1)).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_json_backend_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("transcript.json");

        let mut store = TranscriptStore::new(Box::new(JsonFileBackend::new(&path)));
        store
            .append(TranscriptEntry::new(sender("ALICE"), Classification::SentPing))
            .unwrap();
        store
            .append(
                TranscriptEntry::new(sender("BOB"), Classification::Received).with_body("hi there"),
            )
            .unwrap();
        store
            .append(TranscriptEntry::new(
                sender("CAROL"),
                Classification::SyncRejected { mode: 17 },
            ))
            .unwrap();
        assert!(path.exists());

        let mut restored = TranscriptStore::new(Box::new(JsonFileBackend::new(&path)));
        assert_eq!(restored.restore().unwrap(), 3);
        let original: Vec<_> = store.iter().cloned().collect();
        let reloaded: Vec<_> = restored.iter().cloned().collect();
        assert_eq!(original, reloaded);
    }

    #[test]
    fn test_json_backend_missing_file_restores_empty() {
        let dir = TempDir::new().unwrap();
        let mut store =
            TranscriptStore::new(Box::new(JsonFileBackend::new(dir.path().join("none.json"))));
        assert_eq!(store.restore().unwrap(), 0);
    }

    #[test]
    fn test_json_backend_clear_deletes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("transcript.json");
        let mut store = TranscriptStore::new(Box::new(JsonFileBackend::new(&path)));
        store.append(numbered(1)).unwrap();
        assert!(path.exists());

        store.clear().unwrap();
        assert!(!path.exists());
        // clearing twice is fine
        store.clear().unwrap();
    }

    #[test]
    fn test_json_backend_corrupt_file_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("transcript.json");
        fs::write(&path, "{not json").unwrap();
        let mut store = TranscriptStore::new(Box::new(JsonFileBackend::new(&path)));
        assert!(store.restore().is_err());
    }

    #[test]
    fn test_render_line_and_message() {
        let when = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let line = TranscriptEntry::new(sender("N0CALL"), Classification::ReceivedPing).at(when);
        assert_eq!(line.render(), "2024-03-09 14:05:07 N0CALL ping");

        let message = TranscriptEntry::new(sender("N0CALL"), Classification::Received)
            .with_body("HELLO")
            .at(when);
        assert_eq!(message.render(), "2024-03-09 14:05:07 N0CALL received\nHELLO");

        let rejected =
            TranscriptEntry::new(sender("N0CALL"), Classification::SyncRejected { mode: 9 })
                .at(when);
        assert_eq!(rejected.render(), "2024-03-09 14:05:07 N0CALL unsupported mode 9");
    }

    #[test]
    fn test_render_without_sender_has_single_space() {
        let when = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let unknown = TranscriptEntry::new(SenderId::default(), Classification::Received)
            .with_body("HELLO")
            .at(when);
        assert_eq!(unknown.render(), "2024-03-09 14:05:07 received\nHELLO");

        let notice =
            TranscriptEntry::new(SenderId::default(), Classification::PasswordChanged).at(when);
        assert_eq!(notice.render(), "2024-03-09 14:05:07 password changed");
    }
}
