//! Timeline merger: the single consumer of all adapter streams.
//!
//! Segments are held in a reorder buffer for up to `lateness_bound`
//! before release, so cross-source jitter inside the bound comes out
//! in timestamp order. Segments older than the bound on arrival are
//! flagged `late` and forwarded immediately for historical insertion.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::domain::TranscriptSegment;

use super::window::{RollingWindow, WindowSnapshot};

/// How often the merger task releases due segments and evicts
const MERGE_TICK: Duration = Duration::from_millis(200);

/// Reorder buffer with bounded lateness.
///
/// Assigns each arrival a monotonic sequence number; `(start_ts, seq)`
/// is the release order, which makes ties on `start_ts` deterministic
/// by arrival.
pub struct TimelineMerger {
    buffer: BTreeMap<(DateTime<Utc>, u64), TranscriptSegment>,
    seq: u64,
    lateness_bound: chrono::Duration,
}

impl TimelineMerger {
    pub fn new(lateness_bound: Duration) -> Self {
        Self {
            buffer: BTreeMap::new(),
            seq: 0,
            lateness_bound: chrono::Duration::from_std(lateness_bound)
                .unwrap_or_else(|_| chrono::Duration::seconds(3)),
        }
    }

    /// Accept a segment from an adapter.
    ///
    /// Returns the segment immediately (flagged late) when it arrives
    /// past the lateness bound; otherwise it waits in the buffer until
    /// `drain_due` releases it.
    pub fn push(&mut self, mut segment: TranscriptSegment, now: DateTime<Utc>) -> Option<TranscriptSegment> {
        segment.id = self.seq;
        self.seq += 1;

        if segment.start_ts < now - self.lateness_bound {
            segment.late = true;
            debug!(id = segment.id, "late arrival, forwarding for historical insertion");
            return Some(segment);
        }

        self.buffer.insert((segment.start_ts, segment.id), segment);
        None
    }

    /// Release every buffered segment that has aged past the bound,
    /// in `(start_ts, seq)` order
    pub fn drain_due(&mut self, now: DateTime<Utc>) -> Vec<TranscriptSegment> {
        let horizon = now - self.lateness_bound;
        let mut due = Vec::new();

        while let Some(entry) = self.buffer.first_entry() {
            if entry.key().0 <= horizon {
                due.push(entry.remove());
            } else {
                break;
            }
        }

        due
    }

    /// Release everything regardless of age (shutdown drain)
    pub fn flush(&mut self) -> Vec<TranscriptSegment> {
        let mut rest: Vec<TranscriptSegment> = std::mem::take(&mut self.buffer)
            .into_values()
            .collect();
        rest.sort_by_key(|s| s.order_key());
        rest
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

/// Spawn the merger task: sole owner and writer of the rolling window.
///
/// Consumes the shared adapter channel, releases due segments into the
/// window on a short tick, evicts, and publishes a fresh snapshot
/// whenever the window content changed. On stop it drains the reorder
/// buffer into the window and publishes a final snapshot, so buffered
/// speech is never lost.
pub fn spawn_merger_task(
    mut rx: mpsc::Receiver<TranscriptSegment>,
    mut window: RollingWindow,
    mut merger: TimelineMerger,
    snapshot_tx: watch::Sender<WindowSnapshot>,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(MERGE_TICK);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            let mut dirty = false;

            tokio::select! {
                maybe_segment = rx.recv() => {
                    match maybe_segment {
                        Some(segment) => {
                            let now = Utc::now();
                            if let Some(late) = merger.push(segment, now) {
                                window.admit(late, now);
                                dirty = true;
                            }
                        }
                        // All adapters gone; drain and exit
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    let now = Utc::now();
                    for segment in merger.drain_due(now) {
                        window.admit(segment, now);
                        dirty = true;
                    }
                    if window.evict(now) > 0 {
                        dirty = true;
                    }
                }
                _ = stop.changed() => {
                    if *stop.borrow() {
                        break;
                    }
                }
            }

            if dirty {
                let _ = snapshot_tx.send(window.snapshot());
            }
        }

        // Shutdown: adapters may still be completing a final batch.
        // recv() returns None once they all exit and close the channel,
        // so nothing sent before that point can be missed.
        while let Some(segment) = rx.recv().await {
            let now = Utc::now();
            if let Some(late) = merger.push(segment, now) {
                window.admit(late, now);
            }
        }
        let now = Utc::now();
        for segment in merger.flush() {
            window.admit(segment, now);
        }

        info!(
            segments = window.len(),
            dropped_late = window.dropped_late(),
            "merger drained"
        );
        let _ = snapshot_tx.send(window.snapshot());
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SegmentSource, TranscriptSegment};
    use chrono::TimeZone;

    fn seg(start_s: i64, text: &str) -> TranscriptSegment {
        TranscriptSegment {
            id: 0,
            source: SegmentSource::Mic,
            speaker_id: None,
            text: text.to_string(),
            start_ts: Utc.timestamp_opt(start_s, 0).unwrap(),
            end_ts: Utc.timestamp_opt(start_s + 2, 0).unwrap(),
            confidence: 0.9,
            late: false,
        }
    }

    fn at(s: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(s, 0).unwrap()
    }

    #[test]
    fn test_reorder_within_bound() {
        let mut merger = TimelineMerger::new(Duration::from_secs(3));

        // Arrive out of order, both within the bound
        assert!(merger.push(seg(102, "second"), at(103)).is_none());
        assert!(merger.push(seg(101, "first"), at(103)).is_none());

        // Not yet due
        assert!(merger.drain_due(at(103)).is_empty());

        // Both due, released in timestamp order
        let due = merger.drain_due(at(106));
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].text, "first");
        assert_eq!(due[1].text, "second");
        assert!(!due[0].late);
    }

    #[test]
    fn test_late_arrival_forwarded_immediately() {
        let mut merger = TimelineMerger::new(Duration::from_secs(3));

        let released = merger.push(seg(90, "old words"), at(100)).unwrap();
        assert!(released.late);
        assert_eq!(merger.buffered(), 0);
    }

    #[test]
    fn test_tie_break_is_arrival_order() {
        let mut merger = TimelineMerger::new(Duration::from_secs(3));

        // Same start_ts from two sources
        merger.push(seg(100, "arrived first"), at(100));
        merger.push(seg(100, "arrived second"), at(100));

        let due = merger.drain_due(at(110));
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].text, "arrived first");
        assert_eq!(due[1].text, "arrived second");
        assert!(due[0].id < due[1].id);
    }

    #[test]
    fn test_ids_are_monotonic() {
        let mut merger = TimelineMerger::new(Duration::from_secs(3));

        merger.push(seg(100, "a"), at(100));
        merger.push(seg(99, "b"), at(100));
        let late = merger.push(seg(10, "c"), at(100)).unwrap();

        assert_eq!(late.id, 2);
        let due = merger.drain_due(at(110));
        assert_eq!(due[0].id, 1);
        assert_eq!(due[1].id, 0);
    }

    #[test]
    fn test_flush_releases_everything_in_order() {
        let mut merger = TimelineMerger::new(Duration::from_secs(3));

        merger.push(seg(102, "b"), at(102));
        merger.push(seg(101, "a"), at(102));

        let rest = merger.flush();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].text, "a");
        assert_eq!(rest[1].text, "b");
        assert_eq!(merger.buffered(), 0);
    }
}
