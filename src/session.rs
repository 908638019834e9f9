//! Meeting session lifecycle.
//!
//! `MeetingSession::start` wires adapters, merger, checker, summarizer
//! and sink together and returns a handle. `stop` performs the ordered
//! shutdown: signal, join adapters, drain the merger, finish the
//! checker, flush the sink, then write the meeting back to the
//! knowledge base and the meetings database. Partial results are
//! never lost.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{KnowledgeBase, LlmJudge};
use crate::config::CoreConfig;
use crate::domain::{extract_statements, MeetingSummary, SegmentSource, SegmentationOptions};
use crate::ingest::speech::SpeechCollaborator;
use crate::ingest::{
    spawn_capture_task, spawn_speech_adapter, AdapterHandle, ScreenCapture, ScreenshotLog,
    SourceStatus,
};
use crate::pipeline::checker::spawn_checker_task;
use crate::pipeline::merger::spawn_merger_task;
use crate::pipeline::{ConsistencyChecker, FindingSink, RollingWindow, TimelineMerger, WindowSnapshot};
use crate::store::{MeetingRecord, MeetingStore};

const ADAPTER_CHANNEL_CAPACITY: usize = 256;

/// What a finished session looked like
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub meeting_id: String,
    pub title: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub segment_count: usize,
    pub dropped_late: u64,
    pub finding_count: usize,
    pub summary: Option<String>,
}

/// A running meeting session
pub struct SessionHandle {
    pub meeting_id: String,
    started_at: DateTime<Utc>,
    config: CoreConfig,

    stop_tx: watch::Sender<bool>,
    adapters: Vec<AdapterHandle>,
    merger_task: JoinHandle<()>,
    checker_task: JoinHandle<ConsistencyChecker>,
    capture_task: Option<JoinHandle<()>>,
    summary_task: Option<JoinHandle<()>>,

    snapshots: watch::Receiver<WindowSnapshot>,
    sink: Arc<FindingSink>,
    screenshots: Arc<ScreenshotLog>,
    kb: Arc<dyn KnowledgeBase>,
    judge: Arc<dyn LlmJudge>,
}

pub struct MeetingSession;

impl MeetingSession {
    /// Wire up and launch every task of a session.
    ///
    /// Fails only on fatal configuration; collaborators being down at
    /// start shows up later as degraded sources or degraded cycles.
    pub fn start(
        config: CoreConfig,
        speech_sources: Vec<(SegmentSource, Box<dyn SpeechCollaborator>)>,
        capture: Option<Arc<dyn ScreenCapture>>,
        kb: Arc<dyn KnowledgeBase>,
        judge: Arc<dyn LlmJudge>,
    ) -> Result<SessionHandle> {
        config.validate().context("session configuration rejected")?;

        let meeting_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        info!(%meeting_id, "starting meeting session");

        let (stop_tx, stop_rx) = watch::channel(false);
        let (segment_tx, segment_rx) = mpsc::channel(ADAPTER_CHANNEL_CAPACITY);
        let (snapshot_tx, snapshot_rx) = watch::channel(WindowSnapshot::empty());

        let sink = Arc::new(FindingSink::with_path(config.findings_path(&meeting_id)));

        let adapters = speech_sources
            .into_iter()
            .map(|(source, collaborator)| {
                spawn_speech_adapter(
                    source,
                    collaborator,
                    config.retry.clone(),
                    segment_tx.clone(),
                    stop_rx.clone(),
                )
            })
            .collect();
        // Adapters hold the only senders; the merger sees EOF once they stop
        drop(segment_tx);

        let merger_task = spawn_merger_task(
            segment_rx,
            RollingWindow::new(config.window_duration),
            TimelineMerger::new(config.lateness_bound),
            snapshot_tx,
            stop_rx.clone(),
        );

        let checker = ConsistencyChecker::new(
            config.clone(),
            meeting_id.clone(),
            Arc::clone(&kb),
            Arc::clone(&judge),
            Arc::clone(&sink),
        );
        let checker_task = spawn_checker_task(checker, snapshot_rx.clone(), stop_rx.clone());

        let screenshots = Arc::new(ScreenshotLog::new());
        let capture_task = capture.map(|capture| {
            spawn_capture_task(
                capture,
                Arc::clone(&screenshots),
                config.screenshots_dir(&meeting_id),
                config.screenshot_interval,
                stop_rx.clone(),
            )
        });

        let summary_task = Some(spawn_summary_task(
            Arc::clone(&judge),
            Arc::clone(&sink),
            snapshot_rx.clone(),
            config.summary_interval,
            config.llm_timeout,
            stop_rx,
        ));

        Ok(SessionHandle {
            meeting_id,
            started_at,
            config,
            stop_tx,
            adapters,
            merger_task,
            checker_task,
            capture_task,
            summary_task,
            snapshots: snapshot_rx,
            sink,
            screenshots,
            kb,
            judge,
        })
    }
}

impl SessionHandle {
    /// Sink access for live subscribers and pollers
    pub fn sink(&self) -> Arc<FindingSink> {
        Arc::clone(&self.sink)
    }

    /// Latest published window snapshot
    pub fn snapshot(&self) -> WindowSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn screenshots(&self) -> Arc<ScreenshotLog> {
        Arc::clone(&self.screenshots)
    }

    /// Current status of each speech source
    pub fn source_statuses(&self) -> Vec<SourceStatus> {
        self.adapters.iter().map(|a| *a.status.borrow()).collect()
    }

    /// Ordered shutdown; returns what the session produced.
    #[instrument(skip(self), fields(meeting_id = %self.meeting_id))]
    pub async fn stop(mut self) -> Result<SessionReport> {
        info!("stopping session");
        let _ = self.stop_tx.send(true);

        for adapter in self.adapters.drain(..) {
            adapter.join().await;
        }
        if let Err(e) = (&mut self.merger_task).await {
            warn!("merger task panicked: {}", e);
        }
        if let Err(e) = (&mut self.checker_task).await {
            warn!("checker task panicked: {}", e);
        }
        if let Some(task) = self.capture_task.take() {
            let _ = task.await;
        }
        if let Some(task) = self.summary_task.take() {
            let _ = task.await;
        }

        // The merger published its drained state before exiting
        let final_snapshot = self.snapshots.borrow().clone();
        let transcript = final_snapshot.transcript_text();

        // Closing summary is best-effort; a dead LLM cannot lose findings
        let summary = if transcript.is_empty() {
            None
        } else {
            match self.judge.summarize(&transcript, self.config.llm_timeout).await {
                Ok(text) => Some(text),
                Err(e) => {
                    warn!("closing summary failed: {}", e);
                    None
                }
            }
        };
        if let Some(ref text) = summary {
            self.sink
                .append_summary(MeetingSummary {
                    ts: Utc::now(),
                    text: text.clone(),
                    segment_count: final_snapshot.segments.len(),
                })
                .await;
        }

        self.sink.flush().await;

        // Write the meeting into the knowledge base for future sessions
        let statements = extract_statements(
            &final_snapshot.segments,
            SegmentationOptions {
                max_gap_secs: self.config.statement_gap_secs,
                min_tokens: self.config.min_statement_tokens,
            },
        );
        if !statements.is_empty() {
            if let Err(e) = self
                .kb
                .write(
                    &self.meeting_id,
                    &statements,
                    summary.as_deref(),
                    self.config.knowledge_timeout,
                )
                .await
            {
                warn!("knowledge base write-back failed: {}", e);
            }
        }

        let title = if transcript.is_empty() {
            None
        } else {
            match self
                .judge
                .suggest_title(&transcript, self.config.llm_timeout)
                .await
            {
                Ok(title) => Some(title),
                Err(e) => {
                    warn!("title suggestion failed: {}", e);
                    None
                }
            }
        };

        let findings = self.sink.findings().await;
        let ended_at = Utc::now();

        let report = SessionReport {
            meeting_id: self.meeting_id.clone(),
            title: title.clone(),
            started_at: self.started_at,
            ended_at,
            segment_count: final_snapshot.segments.len(),
            dropped_late: final_snapshot.dropped_late,
            finding_count: findings.len(),
            summary,
        };

        if let Err(e) = self.record_meeting(&report, &transcript) {
            warn!("meeting record not written: {}", e);
        }

        info!(
            segments = report.segment_count,
            findings = report.finding_count,
            "session stopped"
        );
        Ok(report)
    }

    fn record_meeting(&self, report: &SessionReport, transcript: &str) -> Result<()> {
        let store = MeetingStore::open(&self.config.meetings_db_path())?;
        store.insert(&MeetingRecord {
            id: report.meeting_id.clone(),
            title: report
                .title
                .clone()
                .unwrap_or_else(|| format!("Meeting {}", report.started_at.format("%Y-%m-%d %H:%M"))),
            created_at: report.started_at,
            duration_secs: (report.ended_at - report.started_at).num_seconds(),
            status: "completed".to_string(),
            transcript: transcript.to_string(),
            analysis: report.summary.clone(),
            finding_count: report.finding_count as i64,
        })
    }
}

/// Periodic meeting-level summaries appended to the sink
fn spawn_summary_task(
    judge: Arc<dyn LlmJudge>,
    sink: Arc<FindingSink>,
    snapshots: watch::Receiver<WindowSnapshot>,
    interval: Duration,
    llm_timeout: Duration,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = snapshots.borrow().clone();
                    if snapshot.segments.is_empty() {
                        continue;
                    }

                    match judge.summarize(&snapshot.transcript_text(), llm_timeout).await {
                        Ok(text) => {
                            sink.append_summary(MeetingSummary {
                                ts: Utc::now(),
                                text,
                                segment_count: snapshot.segments.len(),
                            })
                            .await;
                        }
                        Err(e) => {
                            warn!("periodic summary failed: {}", e);
                        }
                    }
                }
                _ = stop.changed() => {
                    if *stop.borrow() {
                        break;
                    }
                }
            }
        }
    })
}
