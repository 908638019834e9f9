//! Candidate statement extraction.
//!
//! Statements are the units the checker sends to the knowledge base and
//! the LLM. They are derived fresh each cycle from the window snapshot
//! and never stored: a later snapshot may group the same segments
//! differently once late arrivals land.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::segment::TranscriptSegment;

/// A contiguous run of one speaker's segments, joined into checkable text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateStatement {
    pub text: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Ids of the segments this statement was built from
    pub segment_ids: Vec<u64>,
    pub speaker: String,
}

impl CandidateStatement {
    /// Content key for settled-cache and idempotency purposes.
    ///
    /// Any material change to the text (e.g. a late segment extending
    /// the turn) yields a new key and the statement is re-checked.
    pub fn content_key(&self) -> String {
        hash_text(&self.text)
    }

    /// Whitespace-separated token count
    pub fn token_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

/// Tunable thresholds for turning segments into statements
#[derive(Debug, Clone, Copy)]
pub struct SegmentationOptions {
    /// Silence gap that ends a statement even without a speaker change
    pub max_gap_secs: f64,
    /// Statements shorter than this are discarded as noise
    pub min_tokens: usize,
}

impl Default for SegmentationOptions {
    fn default() -> Self {
        Self {
            max_gap_secs: 2.0,
            min_tokens: 6,
        }
    }
}

/// Split an ordered segment run into candidate statements.
///
/// A statement boundary is a speaker-turn change (source or diarized
/// speaker id differs) or an inter-segment silence gap above
/// `max_gap_secs`. Fragments below `min_tokens` are dropped.
pub fn extract_statements(
    segments: &[TranscriptSegment],
    opts: SegmentationOptions,
) -> Vec<CandidateStatement> {
    let mut statements = Vec::new();
    let mut current: Vec<&TranscriptSegment> = Vec::new();

    for seg in segments {
        let boundary = match current.last() {
            Some(prev) => {
                let gap = (seg.start_ts - prev.end_ts).num_milliseconds() as f64 / 1000.0;
                prev.source != seg.source
                    || prev.speaker_id != seg.speaker_id
                    || gap > opts.max_gap_secs
            }
            None => false,
        };

        if boundary {
            if let Some(stmt) = build_statement(&current) {
                statements.push(stmt);
            }
            current.clear();
        }
        current.push(seg);
    }

    if let Some(stmt) = build_statement(&current) {
        statements.push(stmt);
    }

    statements.retain(|s| s.token_count() >= opts.min_tokens);
    statements
}

fn build_statement(run: &[&TranscriptSegment]) -> Option<CandidateStatement> {
    let first = run.first()?;
    let last = run.last()?;

    let text = run
        .iter()
        .map(|s| s.text.trim())
        .collect::<Vec<_>>()
        .join(" ");

    Some(CandidateStatement {
        text,
        started_at: first.start_ts,
        ended_at: last.end_ts,
        segment_ids: run.iter().map(|s| s.id).collect(),
        speaker: first.speaker_label(),
    })
}

/// Hash text content (first 16 hex chars of SHA256)
pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..8])
}
