//! recass - real-time meeting consistency core
//!
//! Merges concurrent transcription streams into a time-ordered rolling
//! window, periodically derives checkable statements, queries a
//! knowledge base of prior meetings for related statements, and records
//! contradictions as append-only findings.
//!
//! # Architecture
//!
//! Data flows one way through independent tasks:
//! - `ingest`: stream adapters around external recognizers and capture
//! - `pipeline`: timeline merger, rolling window, checker, finding sink
//! - `adapters`: LLM and knowledge base collaborators
//! - `session`: wiring and lifecycle
//!
//! The merger is the only writer of the window; everything else reads
//! immutable snapshots. A degraded collaborator degrades checking but
//! never transcription.
//!
//! # Usage
//!
//! ```bash
//! # Run a session until Ctrl-C
//! recass run
//!
//! # Browse past meetings
//! recass meetings --search budget
//!
//! # Inspect a findings log
//! recass findings <meeting-id>
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod ingest;
pub mod pipeline;
pub mod session;
pub mod store;

// Re-export main types at crate root for convenience
pub use config::{CoreConfig, HandoffMode};
pub use domain::{
    CandidateStatement, ConsistencyFinding, Judgment, PriorReference, ScreenshotRef,
    SegmentSource, SinkEntry, TranscriptSegment, Verdict,
};
pub use error::{CoreError, CoreResult};
pub use pipeline::{ConsistencyChecker, FindingSink, RollingWindow, TimelineMerger, WindowSnapshot};
pub use session::{MeetingSession, SessionHandle, SessionReport};
