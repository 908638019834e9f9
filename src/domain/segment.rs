//! Transcript segments and screenshot references.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Which capture path produced a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentSource {
    /// Local microphone transcription
    Mic,
    /// System loopback transcription (remote participants)
    Loopback,
}

impl std::fmt::Display for SegmentSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mic => write!(f, "mic"),
            Self::Loopback => write!(f, "loopback"),
        }
    }
}

/// A single unit of transcribed speech.
///
/// Immutable once admitted to the window. `id` is assigned by the merger
/// in arrival order and doubles as the tie-break for equal `start_ts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Merge sequence number, assigned on arrival
    pub id: u64,

    pub source: SegmentSource,

    /// Diarized speaker label (loopback only; mic speakers are implicit)
    pub speaker_id: Option<String>,

    pub text: String,

    pub start_ts: DateTime<Utc>,

    pub end_ts: DateTime<Utc>,

    /// Recognizer confidence in [0, 1]
    pub confidence: f32,

    /// Arrived after the lateness bound and was inserted out of order
    pub late: bool,
}

impl TranscriptSegment {
    /// Check segment invariants; violations are dropped upstream
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.end_ts < self.start_ts {
            return Err(CoreError::DataIntegrity(format!(
                "segment {} ends before it starts ({} < {})",
                self.id, self.end_ts, self.start_ts
            )));
        }
        if self.text.trim().is_empty() {
            return Err(CoreError::DataIntegrity(format!(
                "segment {} has empty text",
                self.id
            )));
        }
        Ok(())
    }

    /// Ordering key within the window
    pub fn order_key(&self) -> (DateTime<Utc>, u64) {
        (self.start_ts, self.id)
    }

    /// Speaker label for statement grouping ("mic" when undiarized)
    pub fn speaker_label(&self) -> String {
        match &self.speaker_id {
            Some(s) => s.clone(),
            None => self.source.to_string(),
        }
    }
}

/// Pointer to a captured screenshot on disk.
///
/// Kept in a side log, never merged into the transcript; consumers
/// associate it to segments by timestamp proximity when they read it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenshotRef {
    pub ts: DateTime<Utc>,
    pub path: PathBuf,
}
