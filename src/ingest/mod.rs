//! Stream adapters: independent capture tasks feeding the merger.
//!
//! Each adapter owns one collaborator (recognizer process, capture
//! command), normalizes its output into `TranscriptSegment`s, and
//! forwards them over a shared mpsc channel. Collaborator faults are
//! retried with exponential backoff; past the retry budget the adapter
//! publishes `Degraded` on its status channel and keeps reconnecting.
//! An adapter failure never terminates the pipeline.

pub mod screenshot;
pub mod speech;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::{SegmentSource, TranscriptSegment};
use crate::error::CoreError;
use speech::SpeechCollaborator;

pub use screenshot::{spawn_capture_task, CommandCapture, ScreenCapture, ScreenshotLog};
pub use speech::{CommandSpeech, RawSegment};

/// Health of one input source, published on a watch channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStatus {
    Active,
    /// Retry budget exhausted; still reconnecting in the background
    Degraded { attempts: u32 },
    Stopped,
}

/// Retry policy for collaborator faults
#[derive(Debug, Clone, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts before the source goes degraded
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay() -> u64 {
    500
}
fn default_max_delay() -> u64 {
    15000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Calculate delay for a specific attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::from_millis(self.initial_delay_ms);
        }

        let delay =
            self.initial_delay_ms as f64 * self.backoff_multiplier.powi((attempt - 1) as i32);

        let capped = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(capped)
    }

    /// Check if we should retry based on attempt count
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Handle to a running adapter task
pub struct AdapterHandle {
    pub status: watch::Receiver<SourceStatus>,
    task: JoinHandle<()>,
}

impl AdapterHandle {
    /// Wait for the adapter task to finish after the stop signal
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!("adapter task panicked: {}", e);
        }
    }
}

/// Spawn an adapter task around a speech collaborator.
///
/// The task loops on `next_batch`, normalizes segments (monotonic
/// non-decreasing `start_ts` per source, invariant validation), and
/// forwards them to `out`. It exits when `stop` flips to true.
pub fn spawn_speech_adapter(
    source: SegmentSource,
    collaborator: Box<dyn SpeechCollaborator>,
    retry: RetryPolicy,
    out: mpsc::Sender<TranscriptSegment>,
    mut stop: watch::Receiver<bool>,
) -> AdapterHandle {
    let (status_tx, status_rx) = watch::channel(SourceStatus::Active);

    let task = tokio::spawn(async move {
        let mut collaborator = collaborator;
        let mut attempt: u32 = 0;
        // Floor for start_ts normalization within this adapter
        let mut last_start: Option<DateTime<Utc>> = None;

        loop {
            if *stop.borrow() {
                break;
            }

            let batch = tokio::select! {
                result = collaborator.next_batch() => result,
                _ = stop.changed() => break,
            };

            match batch {
                Ok(raw_segments) => {
                    if attempt > 0 {
                        info!(%source, "source recovered");
                        attempt = 0;
                        let _ = status_tx.send(SourceStatus::Active);
                    }

                    for raw in raw_segments {
                        match normalize(source, raw, &mut last_start) {
                            Ok(segment) => {
                                if out.send(segment).await.is_err() {
                                    // Merger gone; session is shutting down
                                    let _ = status_tx.send(SourceStatus::Stopped);
                                    return;
                                }
                            }
                            Err(e) => {
                                warn!(%source, "dropping segment: {}", e);
                            }
                        }
                    }
                }
                Err(e) => {
                    attempt += 1;
                    warn!(%source, attempt, "collaborator fault: {}", e);

                    if !retry.should_retry(attempt) {
                        // Half-open: signal degraded but keep trying
                        let degraded = CoreError::DegradedSource {
                            name: source.to_string(),
                            attempts: attempt,
                        };
                        warn!("{}", degraded);
                        let _ = status_tx.send(SourceStatus::Degraded { attempts: attempt });
                    }

                    let delay = retry.delay_for_attempt(attempt);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = stop.changed() => break,
                    }
                }
            }
        }

        debug!(%source, "adapter stopped");
        let _ = status_tx.send(SourceStatus::Stopped);
    });

    AdapterHandle {
        status: status_rx,
        task,
    }
}

/// Turn a raw collaborator segment into a validated transcript segment.
///
/// `start_ts` is clamped to be non-decreasing within the adapter; the
/// merger handles cross-adapter ordering. The id is a placeholder until
/// the merger assigns the real sequence number.
fn normalize(
    source: SegmentSource,
    raw: RawSegment,
    last_start: &mut Option<DateTime<Utc>>,
) -> Result<TranscriptSegment, CoreError> {
    let mut start_ts = raw.start_ts;
    if let Some(floor) = *last_start {
        if start_ts < floor {
            start_ts = floor;
        }
    }
    let end_ts = raw.end_ts.max(start_ts);

    let segment = TranscriptSegment {
        id: 0,
        source,
        speaker_id: raw.speaker_id,
        text: raw.text,
        start_ts,
        end_ts,
        confidence: raw.confidence,
        late: false,
    };
    segment.validate()?;

    *last_start = Some(start_ts);
    Ok(segment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn raw(start_s: i64, end_s: i64, text: &str) -> RawSegment {
        RawSegment {
            text: text.to_string(),
            speaker_id: None,
            start_ts: Utc.timestamp_opt(start_s, 0).unwrap(),
            end_ts: Utc.timestamp_opt(end_s, 0).unwrap(),
            confidence: 0.8,
        }
    }

    #[test]
    fn test_retry_policy_delays() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 10000,
            backoff_multiplier: 2.0,
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(4000));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(8000));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(10000)); // Capped
    }

    #[test]
    fn test_retry_should_retry() {
        let policy = RetryPolicy {
            max_attempts: 3,
            ..Default::default()
        };

        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn test_normalize_clamps_backwards_timestamps() {
        let mut last = None;

        let s1 = normalize(SegmentSource::Mic, raw(10, 12, "first"), &mut last).unwrap();
        assert_eq!(s1.start_ts, Utc.timestamp_opt(10, 0).unwrap());

        // Recognizer emitted an earlier start; clamped to the floor
        let s2 = normalize(SegmentSource::Mic, raw(8, 9, "second"), &mut last).unwrap();
        assert_eq!(s2.start_ts, Utc.timestamp_opt(10, 0).unwrap());
        assert_eq!(s2.end_ts, Utc.timestamp_opt(10, 0).unwrap());
    }

    #[test]
    fn test_normalize_rejects_empty_text() {
        let mut last = None;
        assert!(normalize(SegmentSource::Mic, raw(0, 1, "  "), &mut last).is_err());
        // Rejected segments do not advance the floor
        assert!(last.is_none());
    }
}
