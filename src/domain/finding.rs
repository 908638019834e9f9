//! Consistency findings and sink entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::statement::{hash_text, CandidateStatement};

/// Raw LLM classification of a candidate/prior pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Judgment {
    /// Direct contradiction of the prior statement
    Contradiction,
    /// Position changed without acknowledging the earlier one
    UnacknowledgedChange,
    /// Consistent with the prior statement
    Consistent,
    /// The two statements do not speak to the same fact
    Unrelated,
}

impl Judgment {
    /// Whether this judgment produces a finding
    pub fn is_reportable(&self) -> bool {
        matches!(self, Self::Contradiction | Self::UnacknowledgedChange)
    }
}

/// Verdict recorded on a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Contradiction,
    UnacknowledgedChange,
    None,
}

impl From<Judgment> for Verdict {
    fn from(j: Judgment) -> Self {
        match j {
            Judgment::Contradiction => Verdict::Contradiction,
            Judgment::UnacknowledgedChange => Verdict::UnacknowledgedChange,
            Judgment::Consistent | Judgment::Unrelated => Verdict::None,
        }
    }
}

/// A prior statement returned by the knowledge base
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorReference {
    pub meeting_id: String,
    pub snippet: String,
    /// Cosine similarity in [0, 1] as reported by the knowledge base
    pub similarity: f32,
}

/// An immutable record of a detected inconsistency.
///
/// Findings are append-only; a correction is a new finding whose
/// `supersedes` field references the earlier one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistencyFinding {
    pub id: Uuid,
    pub ts: DateTime<Utc>,
    pub statement: CandidateStatement,
    pub prior: PriorReference,
    pub verdict: Verdict,
    pub rationale: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<Uuid>,
}

impl ConsistencyFinding {
    pub fn new(
        statement: CandidateStatement,
        prior: PriorReference,
        verdict: Verdict,
        rationale: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            ts: Utc::now(),
            statement,
            prior,
            verdict,
            rationale,
            supersedes: None,
        }
    }

    /// Idempotency key for this finding's (statement, prior) pair
    pub fn key(&self) -> String {
        finding_key(&self.statement, &self.prior)
    }
}

/// Generate the idempotency key for a candidate/prior pair.
///
/// Format: `{statement_hash}:{meeting_id}:{snippet_hash}`. Overlapping
/// checker cycles that re-derive the same pair produce the same key, so
/// the finding is appended exactly once.
pub fn finding_key(statement: &CandidateStatement, prior: &PriorReference) -> String {
    format!(
        "{}:{}:{}",
        statement.content_key(),
        prior.meeting_id,
        hash_text(&prior.snippet)
    )
}

/// Meeting-level summary appended to the sink on its own interval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingSummary {
    pub ts: DateTime<Utc>,
    pub text: String,
    /// Segments covered by this summary
    pub segment_count: usize,
}

/// Anything the sink records, tagged for JSONL persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SinkEntry {
    Finding(ConsistencyFinding),
    Summary(MeetingSummary),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn statement(text: &str) -> CandidateStatement {
        CandidateStatement {
            text: text.to_string(),
            started_at: Utc.timestamp_opt(0, 0).unwrap(),
            ended_at: Utc.timestamp_opt(5, 0).unwrap(),
            segment_ids: vec![1, 2],
            speaker: "mic".to_string(),
        }
    }

    fn prior() -> PriorReference {
        PriorReference {
            meeting_id: "mtg-42".to_string(),
            snippet: "budget was forty thousand".to_string(),
            similarity: 0.91,
        }
    }

    #[test]
    fn test_finding_key_stable_across_cycles() {
        // Same pair re-derived in a later cycle yields the same key
        let k1 = finding_key(&statement("budget is fifty thousand"), &prior());
        let k2 = finding_key(&statement("budget is fifty thousand"), &prior());
        assert_eq!(k1, k2);
    }

    #[test]
    fn test_finding_key_varies_with_pair() {
        let base = finding_key(&statement("budget is fifty thousand"), &prior());

        let other_stmt = finding_key(&statement("budget is sixty thousand"), &prior());
        assert_ne!(base, other_stmt);

        let mut other_prior = prior();
        other_prior.meeting_id = "mtg-43".to_string();
        let other = finding_key(&statement("budget is fifty thousand"), &other_prior);
        assert_ne!(base, other);
    }

    #[test]
    fn test_key_format() {
        let key = finding_key(&statement("budget is fifty thousand"), &prior());
        let parts: Vec<&str> = key.split(':').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 16);
        assert_eq!(parts[1], "mtg-42");
        assert_eq!(parts[2].len(), 16);
    }

    #[test]
    fn test_reportable_judgments() {
        assert!(Judgment::Contradiction.is_reportable());
        assert!(Judgment::UnacknowledgedChange.is_reportable());
        assert!(!Judgment::Consistent.is_reportable());
        assert!(!Judgment::Unrelated.is_reportable());
    }

    #[test]
    fn test_sink_entry_tagged_serialization() {
        let entry = SinkEntry::Summary(MeetingSummary {
            ts: Utc.timestamp_opt(100, 0).unwrap(),
            text: "discussed budget".to_string(),
            segment_count: 12,
        });

        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"kind\":\"summary\""));

        let back: SinkEntry = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, SinkEntry::Summary(_)));
    }
}
