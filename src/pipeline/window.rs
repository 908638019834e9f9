//! Rolling window buffer over the recent transcript.
//!
//! The window is owned exclusively by the merger task. Readers only
//! ever see `WindowSnapshot`s, so they never observe a half-applied
//! eviction and the window itself needs no locks.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::domain::TranscriptSegment;

/// Result of offering a segment to the window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitOutcome {
    Admitted,
    /// Late segment whose span the window has already advanced past
    DroppedLate,
    /// Segment violated an invariant (logged upstream)
    DroppedInvalid,
}

/// Time-bounded, timestamp-ordered buffer of transcript segments
pub struct RollingWindow {
    duration: Duration,
    /// Sorted by `(start_ts, id)`
    segments: Vec<TranscriptSegment>,
    admitted_total: u64,
    dropped_late: u64,
}

/// Immutable point-in-time view of the window
#[derive(Debug, Clone)]
pub struct WindowSnapshot {
    pub segments: Arc<[TranscriptSegment]>,
    pub taken_at: DateTime<Utc>,
    /// Segments admitted since the session started
    pub admitted_total: u64,
    /// Late segments dropped because the window had moved past them
    pub dropped_late: u64,
}

impl WindowSnapshot {
    /// Empty snapshot for channel initialization
    pub fn empty() -> Self {
        Self {
            segments: Arc::from(Vec::new()),
            taken_at: Utc::now(),
            admitted_total: 0,
            dropped_late: 0,
        }
    }

    /// Full window text, segments joined in timestamp order
    pub fn transcript_text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl RollingWindow {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            segments: Vec::new(),
            admitted_total: 0,
            dropped_late: 0,
        }
    }

    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - chrono::Duration::from_std(self.duration).unwrap_or_else(|_| chrono::Duration::zero())
    }

    /// Insert a segment in timestamp order.
    ///
    /// In-order arrivals append in O(1); out-of-order (late) arrivals
    /// binary-search their position. A late segment entirely behind the
    /// window's span is counted and dropped.
    pub fn admit(&mut self, segment: TranscriptSegment, now: DateTime<Utc>) -> AdmitOutcome {
        if segment.validate().is_err() {
            return AdmitOutcome::DroppedInvalid;
        }

        if segment.late && segment.end_ts < self.cutoff(now) {
            self.dropped_late += 1;
            return AdmitOutcome::DroppedLate;
        }

        let key = segment.order_key();
        match self.segments.last() {
            Some(last) if last.order_key() > key => {
                let idx = self.segments.partition_point(|s| s.order_key() < key);
                self.segments.insert(idx, segment);
            }
            _ => self.segments.push(segment),
        }

        self.admitted_total += 1;
        AdmitOutcome::Admitted
    }

    /// Remove exactly the segments whose `end_ts` has left the window,
    /// returning how many were evicted
    pub fn evict(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = self.cutoff(now);
        let before = self.segments.len();
        self.segments.retain(|s| s.end_ts >= cutoff);
        before - self.segments.len()
    }

    /// Immutable copy for readers
    pub fn snapshot(&self) -> WindowSnapshot {
        WindowSnapshot {
            segments: Arc::from(self.segments.as_slice()),
            taken_at: Utc::now(),
            admitted_total: self.admitted_total,
            dropped_late: self.dropped_late,
        }
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn admitted_total(&self) -> u64 {
        self.admitted_total
    }

    pub fn dropped_late(&self) -> u64 {
        self.dropped_late
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SegmentSource;
    use chrono::TimeZone;

    fn seg(id: u64, start_s: i64, end_s: i64) -> TranscriptSegment {
        TranscriptSegment {
            id,
            source: SegmentSource::Mic,
            speaker_id: None,
            text: format!("segment {}", id),
            start_ts: Utc.timestamp_opt(start_s, 0).unwrap(),
            end_ts: Utc.timestamp_opt(end_s, 0).unwrap(),
            confidence: 0.9,
            late: false,
        }
    }

    fn at(s: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(s, 0).unwrap()
    }

    #[test]
    fn test_in_order_admission() {
        let mut window = RollingWindow::new(Duration::from_secs(300));

        for i in 0..5 {
            let outcome = window.admit(seg(i, i as i64 * 10, i as i64 * 10 + 5), at(100));
            assert_eq!(outcome, AdmitOutcome::Admitted);
        }

        assert_eq!(window.len(), 5);
        assert_eq!(window.admitted_total(), 5);

        let snap = window.snapshot();
        let ids: Vec<u64> = snap.segments.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_out_of_order_insertion() {
        let mut window = RollingWindow::new(Duration::from_secs(300));

        window.admit(seg(1, 10, 12), at(100));
        window.admit(seg(2, 30, 32), at(100));

        // Late segment lands between the two
        let mut late = seg(3, 20, 22);
        late.late = true;
        assert_eq!(window.admit(late, at(100)), AdmitOutcome::Admitted);

        let snap = window.snapshot();
        let ids: Vec<u64> = snap.segments.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 3, 2]);
    }

    #[test]
    fn test_eviction_is_exact() {
        let mut window = RollingWindow::new(Duration::from_secs(60));

        window.admit(seg(1, 0, 5), at(50));
        window.admit(seg(2, 30, 35), at(50));
        window.admit(seg(3, 58, 62), at(63));

        // At t=66 the cutoff is 6: segment 1 (end 5) leaves, the rest stay
        window.evict(at(66));
        let ids: Vec<u64> = window.snapshot().segments.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![2, 3]);

        // Boundary: end_ts == cutoff stays
        window.evict(at(95));
        let ids: Vec<u64> = window.snapshot().segments.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![2, 3]);

        window.evict(at(96));
        let ids: Vec<u64> = window.snapshot().segments.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![3]);
    }

    #[test]
    fn test_late_segment_behind_window_dropped_and_counted() {
        let mut window = RollingWindow::new(Duration::from_secs(60));
        window.admit(seg(1, 100, 105), at(110));

        let mut stale = seg(2, 10, 15);
        stale.late = true;
        assert_eq!(window.admit(stale, at(110)), AdmitOutcome::DroppedLate);

        assert_eq!(window.dropped_late(), 1);
        assert_eq!(window.len(), 1);
        // Drops do not count as admissions
        assert_eq!(window.admitted_total(), 1);
    }

    #[test]
    fn test_invalid_segment_dropped() {
        let mut window = RollingWindow::new(Duration::from_secs(60));
        let inverted = seg(1, 20, 10);
        assert_eq!(window.admit(inverted, at(30)), AdmitOutcome::DroppedInvalid);
        assert!(window.is_empty());
    }

    #[test]
    fn test_snapshot_immune_to_later_eviction() {
        let mut window = RollingWindow::new(Duration::from_secs(60));
        window.admit(seg(1, 0, 5), at(10));
        window.admit(seg(2, 8, 9), at(10));

        let snap = window.snapshot();
        window.evict(at(200));
        assert!(window.is_empty());

        // The snapshot still holds both segments
        assert_eq!(snap.segments.len(), 2);
    }

    #[test]
    fn test_equal_start_ts_ordered_by_id() {
        let mut window = RollingWindow::new(Duration::from_secs(60));
        window.admit(seg(5, 10, 12), at(20));

        let mut earlier_id = seg(3, 10, 12);
        earlier_id.late = true;
        window.admit(earlier_id, at(20));

        let ids: Vec<u64> = window.snapshot().segments.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![3, 5]);
    }
}
