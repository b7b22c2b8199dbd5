//! Bounded narration history.
//!
//! Keeps the last N narrations of a session for listing and plain-text
//! export. The store is shared by reference; the lock is internal.

use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard, PoisonError},
};

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::{narrator::Narration, rewrite::Tone, voice::{VoiceId, VoiceProfile}};

pub const DEFAULT_CAPACITY: usize = 20;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One finished narration.
#[derive(Debug, Clone, Serialize)]
pub struct NarrationRecord {
    pub created_at: DateTime<Local>,
    pub original_text: String,
    pub rewritten_text: String,
    pub tone: Tone,
    pub voice: VoiceId,
    pub voice_name: String,
    pub speed: f32,
    /// `"model"` or `"fallback"`.
    pub source: String,
    pub duration_secs: f32,
    pub filename: String,
}

impl NarrationRecord {
    /// Record a narration produced from `original_text` (rewritten to
    /// `rewritten_text` in `tone`).
    pub fn new(
        original_text: impl Into<String>,
        rewritten_text: impl Into<String>,
        tone: Tone,
        narration: &Narration,
    ) -> Self {
        let original_text = original_text.into();
        Self {
            created_at: Local::now(),
            filename: output_filename(&original_text),
            original_text,
            rewritten_text: rewritten_text.into(),
            tone,
            voice: narration.voice,
            voice_name: VoiceProfile::lookup(narration.voice).name.to_string(),
            speed: narration.speed,
            source: narration.source.label().to_string(),
            duration_secs: narration.duration_secs,
        }
    }

    pub fn timestamp(&self) -> String {
        self.created_at.format(TIMESTAMP_FORMAT).to_string()
    }
}

/// Keep-last-N list of [`NarrationRecord`]s.
#[derive(Debug)]
pub struct NarrationHistory {
    records: Mutex<VecDeque<NarrationRecord>>,
    capacity: usize,
}

impl Default for NarrationHistory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl NarrationHistory {
    /// A capacity of zero is treated as one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { records: Mutex::new(VecDeque::with_capacity(capacity)), capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // A panic while holding the lock cannot leave the deque half-updated.
    fn records(&self) -> MutexGuard<'_, VecDeque<NarrationRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append, evicting the oldest records beyond capacity.
    pub fn add(&self, record: NarrationRecord) {
        let mut records = self.records();
        records.push_back(record);
        while records.len() > self.capacity {
            records.pop_front();
        }
    }

    /// Oldest first.
    pub fn list(&self) -> Vec<NarrationRecord> {
        self.records().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.records().clear();
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    /// Plain-text summary of the session.
    pub fn export_text(&self) -> String {
        let records = self.records();
        if records.is_empty() {
            return "No narrations in history.".to_string();
        }

        let mut out = String::from("EchoVerse Session History\n");
        out.push_str(&"=".repeat(30));
        out.push_str("\n\n");
        for (i, record) in records.iter().enumerate() {
            out.push_str(&format!(
                "Narration {}:\nTime: {}\nTone: {}\nModel: {}\nText: {}\n",
                i + 1,
                record.timestamp(),
                record.tone,
                record.voice_name,
                record.original_text,
            ));
            out.push_str(&"-".repeat(30));
            out.push('\n');
        }
        out
    }
}

/// Download name for a narration: `echoverse_<preview>_<id>.wav`.
///
/// The preview keeps alphanumerics, spaces, `-` and `_` (at most 30
/// characters, spaces turned into `_`); the id is 8 hex digits of a v4 UUID.
pub fn output_filename(text_preview: &str) -> String {
    let kept: String = text_preview
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect();
    let safe: String = kept.trim_end().chars().take(30).collect();

    let uuid = uuid::Uuid::new_v4().simple().to_string();
    let id = &uuid[..8];

    let name = if safe.is_empty() {
        format!("echoverse_{}.wav", id)
    } else {
        format!("echoverse_{}_{}.wav", safe, id)
    };
    name.replace(' ', "_")
}
