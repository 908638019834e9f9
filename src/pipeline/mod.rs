//! The ingestion-and-checking pipeline.
//!
//! Data flows one way: adapter tasks feed the merger over an mpsc
//! channel; the merger is the sole writer of the rolling window and
//! publishes immutable snapshots on a watch channel; the checker reads
//! snapshots on its own cadence and appends findings to the sink.

pub mod checker;
pub mod merger;
pub mod sink;
pub mod window;

pub use checker::{spawn_checker_task, ConsistencyChecker, CycleReport};
pub use merger::{spawn_merger_task, TimelineMerger};
pub use sink::FindingSink;
pub use window::{AdmitOutcome, RollingWindow, WindowSnapshot};
