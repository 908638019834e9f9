//! Domain types for the meeting core.
//!
//! This module contains the core data structures:
//! - Segments: Immutable transcript units produced by the merger
//! - Statements: Ephemeral checkable units derived per checker cycle
//! - Findings: Append-only consistency verdicts

pub mod finding;
pub mod segment;
pub mod statement;

// Re-export commonly used types
pub use finding::{
    finding_key, ConsistencyFinding, Judgment, MeetingSummary, PriorReference, SinkEntry, Verdict,
};
pub use segment::{ScreenshotRef, SegmentSource, TranscriptSegment};
pub use statement::{extract_statements, CandidateStatement, SegmentationOptions};
