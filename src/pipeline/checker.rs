//! Consistency checker: the cyclical heart of the core.
//!
//! Each cycle takes a window snapshot, derives candidate statements,
//! asks the knowledge base for semantically close prior statements,
//! and has the LLM judge the best match. Verdicts of contradiction or
//! unacknowledged change become findings, appended exactly once.
//!
//! Collaborator faults abandon the affected candidate only; the cycle
//! is reported degraded and the next tick proceeds. A fully degraded
//! checker never touches transcription or capture.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::adapters::{KnowledgeBase, LlmJudge};
use crate::config::CoreConfig;
use crate::domain::{
    extract_statements, finding_key, ConsistencyFinding, PriorReference, SegmentationOptions,
    Verdict,
};

use super::sink::FindingSink;
use super::window::WindowSnapshot;

/// Counters for one checker cycle
#[derive(Debug, Default, Clone, Copy)]
pub struct CycleReport {
    /// Statements derived from the snapshot
    pub candidates: usize,
    /// Skipped because a previous cycle settled the same text
    pub settled_skipped: usize,
    /// Statements with no prior above the similarity threshold
    pub unmatched: usize,
    /// Judgments requested from the LLM
    pub judged: usize,
    /// Findings appended this cycle
    pub findings_emitted: usize,
    /// Reportable verdicts suppressed by the idempotency key
    pub duplicates_suppressed: usize,
    /// Candidates abandoned on collaborator fault or timeout
    pub degraded: usize,
}

impl CycleReport {
    pub fn is_degraded(&self) -> bool {
        self.degraded > 0
    }
}

/// Cycle state that survives across checks
pub struct ConsistencyChecker {
    config: CoreConfig,
    meeting_id: String,
    kb: Arc<dyn KnowledgeBase>,
    judge: Arc<dyn LlmJudge>,
    sink: Arc<FindingSink>,
    /// Finding keys already appended
    emitted: HashSet<String>,
    /// Content keys judged consistent/unrelated or unmatched; skipped
    /// until the text materially changes (which changes the key)
    settled: HashSet<String>,
}

impl ConsistencyChecker {
    pub fn new(
        config: CoreConfig,
        meeting_id: String,
        kb: Arc<dyn KnowledgeBase>,
        judge: Arc<dyn LlmJudge>,
        sink: Arc<FindingSink>,
    ) -> Self {
        Self {
            config,
            meeting_id,
            kb,
            judge,
            sink,
            emitted: HashSet::new(),
            settled: HashSet::new(),
        }
    }

    fn segmentation(&self) -> SegmentationOptions {
        SegmentationOptions {
            max_gap_secs: self.config.statement_gap_secs,
            min_tokens: self.config.min_statement_tokens,
        }
    }

    /// Run one full check over a snapshot
    #[instrument(skip(self, snapshot), fields(meeting_id = %self.meeting_id, segments = snapshot.segments.len()))]
    pub async fn run_cycle(&mut self, snapshot: &WindowSnapshot) -> CycleReport {
        let mut report = CycleReport::default();

        let statements = extract_statements(&snapshot.segments, self.segmentation());
        report.candidates = statements.len();

        for statement in statements {
            let content_key = statement.content_key();
            if self.settled.contains(&content_key) {
                report.settled_skipped += 1;
                continue;
            }

            let matches = match self
                .kb
                .query(
                    &statement.text,
                    &self.meeting_id,
                    self.config.top_k,
                    self.config.knowledge_timeout,
                )
                .await
            {
                Ok(matches) => matches,
                Err(e) => {
                    warn!("knowledge base fault, abandoning candidate: {}", e);
                    report.degraded += 1;
                    continue;
                }
            };

            let best = best_match(&matches, self.config.similarity_threshold);
            let prior = match best {
                Some(prior) => prior,
                None => {
                    // Nothing similar enough; the LLM is never consulted.
                    // The knowledge base is stable for this meeting, so
                    // the same text would stay unmatched next cycle.
                    report.unmatched += 1;
                    self.settled.insert(content_key);
                    continue;
                }
            };

            report.judged += 1;
            let (judgment, rationale) = match self
                .judge
                .judge(&statement, &prior, self.config.llm_timeout)
                .await
            {
                Ok(result) => result,
                Err(e) => {
                    warn!("judge fault, abandoning candidate: {}", e);
                    report.degraded += 1;
                    continue;
                }
            };

            if judgment.is_reportable() {
                let key = finding_key(&statement, &prior);
                if self.emitted.insert(key) {
                    let finding = ConsistencyFinding::new(
                        statement,
                        prior,
                        Verdict::from(judgment),
                        rationale,
                    );
                    info!(
                        finding_id = %finding.id,
                        verdict = ?finding.verdict,
                        "inconsistency detected"
                    );
                    self.sink.append_finding(finding).await;
                    report.findings_emitted += 1;
                } else {
                    report.duplicates_suppressed += 1;
                }
            } else {
                debug!(judgment = ?judgment, "candidate settled");
                self.settled.insert(content_key);
            }
        }

        if report.is_degraded() {
            warn!(degraded = report.degraded, "cycle completed degraded");
        } else {
            debug!(
                candidates = report.candidates,
                findings = report.findings_emitted,
                "cycle completed"
            );
        }

        report
    }
}

/// Only the single highest-similarity match at or above the threshold
/// is judged; weaker matches are noise
fn best_match(matches: &[PriorReference], threshold: f32) -> Option<PriorReference> {
    matches
        .iter()
        .filter(|m| m.similarity >= threshold)
        .max_by(|a, b| {
            a.similarity
                .partial_cmp(&b.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .cloned()
}

/// Spawn the checker task.
///
/// A cycle runs when the interval elapses or when `segment_trigger`
/// new segments have been admitted since the last cycle, whichever
/// comes first. The stop signal cancels an in-flight cycle; findings
/// already appended by that cycle are preserved.
pub fn spawn_checker_task(
    mut checker: ConsistencyChecker,
    mut snapshots: watch::Receiver<WindowSnapshot>,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<ConsistencyChecker> {
    tokio::spawn(async move {
        let interval = checker.config.checker_interval;
        let trigger = checker.config.segment_trigger as u64;
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick resolves immediately; consume it
        ticker.tick().await;

        let mut last_admitted: u64 = 0;

        loop {
            let mut run = false;

            tokio::select! {
                _ = ticker.tick() => {
                    run = true;
                }
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let admitted = snapshots.borrow().admitted_total;
                    if trigger > 0 && admitted.saturating_sub(last_admitted) >= trigger {
                        debug!(admitted, "segment trigger reached, running early cycle");
                        run = true;
                    }
                }
                _ = stop.changed() => {
                    if *stop.borrow() {
                        break;
                    }
                }
            }

            if run {
                let snapshot = snapshots.borrow().clone();
                last_admitted = snapshot.admitted_total;

                tokio::select! {
                    _report = checker.run_cycle(&snapshot) => {}
                    _ = stop.changed() => {
                        if *stop.borrow() {
                            // Drops the in-flight cycle; appended
                            // findings survive in the sink
                            break;
                        }
                    }
                }
                ticker.reset();
            }
        }

        debug!("checker stopped");
        checker
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prior(meeting: &str, similarity: f32) -> PriorReference {
        PriorReference {
            meeting_id: meeting.to_string(),
            snippet: format!("snippet from {}", meeting),
            similarity,
        }
    }

    #[test]
    fn test_best_match_picks_highest_above_threshold() {
        let matches = vec![prior("a", 0.7), prior("b", 0.92), prior("c", 0.85)];

        let best = best_match(&matches, 0.8).unwrap();
        assert_eq!(best.meeting_id, "b");
    }

    #[test]
    fn test_best_match_none_below_threshold() {
        let matches = vec![prior("a", 0.5), prior("b", 0.79)];
        assert!(best_match(&matches, 0.8).is_none());
        assert!(best_match(&[], 0.8).is_none());
    }
}
