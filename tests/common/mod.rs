//! Scripted collaborators shared by the integration tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use recass::adapters::{KnowledgeBase, LlmJudge};
use recass::domain::{CandidateStatement, Judgment, PriorReference, SegmentSource, TranscriptSegment};
use recass::error::{CoreError, CoreResult};
use recass::ingest::speech::{RawSegment, SpeechCollaborator};
use recass::pipeline::{RollingWindow, WindowSnapshot};

/// Build a transcript segment with second-granularity timestamps
pub fn segment(
    id: u64,
    source: SegmentSource,
    speaker: Option<&str>,
    start_s: i64,
    end_s: i64,
    text: &str,
) -> TranscriptSegment {
    use chrono::TimeZone;
    TranscriptSegment {
        id,
        source,
        speaker_id: speaker.map(|s| s.to_string()),
        text: text.to_string(),
        start_ts: Utc.timestamp_opt(start_s, 0).unwrap(),
        end_ts: Utc.timestamp_opt(end_s, 0).unwrap(),
        confidence: 0.9,
        late: false,
    }
}

/// Snapshot over a fixed set of segments
pub fn snapshot_of(segments: Vec<TranscriptSegment>) -> WindowSnapshot {
    let mut window = RollingWindow::new(Duration::from_secs(3600));
    let now = Utc::now();
    for seg in segments {
        window.admit(seg, now);
    }
    window.snapshot()
}

/// Speech collaborator that plays back scripted utterances.
///
/// Each batch gets timestamps relative to the moment it is emitted, so
/// segments are never accidentally late. Once the script is exhausted
/// it blocks like an idle recognizer.
pub struct ScriptedSpeech {
    batches: VecDeque<Vec<(Option<String>, String)>>,
    pause: Duration,
}

impl ScriptedSpeech {
    pub fn new(batches: Vec<Vec<(Option<&str>, &str)>>) -> Self {
        let batches = batches
            .into_iter()
            .map(|batch| {
                batch
                    .into_iter()
                    .map(|(speaker, text)| (speaker.map(|s| s.to_string()), text.to_string()))
                    .collect()
            })
            .collect();
        Self {
            batches,
            pause: Duration::from_millis(10),
        }
    }
}

#[async_trait]
impl SpeechCollaborator for ScriptedSpeech {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn next_batch(&mut self) -> CoreResult<Vec<RawSegment>> {
        tokio::time::sleep(self.pause).await;

        match self.batches.pop_front() {
            Some(utterances) => {
                let base = Utc::now();
                Ok(utterances
                    .into_iter()
                    .enumerate()
                    .map(|(i, (speaker_id, text))| RawSegment {
                        text,
                        speaker_id,
                        start_ts: base + chrono::Duration::milliseconds(i as i64 * 10),
                        end_ts: base + chrono::Duration::milliseconds(i as i64 * 10 + 5),
                        confidence: 0.9,
                    })
                    .collect())
            }
            None => {
                // Idle recognizer: block until the adapter is stopped
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Vec::new())
            }
        }
    }
}

/// Speech collaborator that faults on every call
pub struct FailingSpeech;

#[async_trait]
impl SpeechCollaborator for FailingSpeech {
    fn name(&self) -> &str {
        "failing"
    }

    async fn next_batch(&mut self) -> CoreResult<Vec<RawSegment>> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Err(CoreError::transient("failing", "no audio device"))
    }
}

/// Knowledge base with one canned match list and a failure trigger
pub struct MockKnowledgeBase {
    /// Returned for every query unless `fail_on` matches
    pub matches: Vec<PriorReference>,
    /// Queries containing this substring fault
    pub fail_on: Option<String>,
    pub queries: Mutex<Vec<String>>,
    pub writes: Mutex<Vec<String>>,
}

impl MockKnowledgeBase {
    pub fn with_matches(matches: Vec<PriorReference>) -> Self {
        Self {
            matches,
            fail_on: None,
            queries: Mutex::new(Vec::new()),
            writes: Mutex::new(Vec::new()),
        }
    }

    pub fn empty() -> Self {
        Self::with_matches(Vec::new())
    }

    pub fn query_count(&self) -> usize {
        self.queries.lock().unwrap().len()
    }
}

#[async_trait]
impl KnowledgeBase for MockKnowledgeBase {
    async fn query(
        &self,
        text: &str,
        _exclude_meeting_id: &str,
        _top_k: usize,
        _timeout: Duration,
    ) -> CoreResult<Vec<PriorReference>> {
        if let Some(ref needle) = self.fail_on {
            if text.contains(needle.as_str()) {
                return Err(CoreError::transient("knowledge", "backend down"));
            }
        }
        self.queries.lock().unwrap().push(text.to_string());
        Ok(self.matches.clone())
    }

    async fn write(
        &self,
        meeting_id: &str,
        _statements: &[CandidateStatement],
        _summary: Option<&str>,
        _timeout: Duration,
    ) -> CoreResult<()> {
        self.writes.lock().unwrap().push(meeting_id.to_string());
        Ok(())
    }
}

/// Judge returning a fixed judgment, with call counting
pub struct MockJudge {
    pub judgment: Judgment,
    pub rationale: String,
    /// Candidates containing this substring fault instead of judging
    pub fail_on: Option<String>,
    /// Candidates containing this substring block like a wedged model
    pub hang_on: Option<String>,
    pub judge_calls: AtomicUsize,
}

impl MockJudge {
    pub fn returning(judgment: Judgment) -> Self {
        Self {
            judgment,
            rationale: "scripted rationale".to_string(),
            fail_on: None,
            hang_on: None,
            judge_calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.judge_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmJudge for MockJudge {
    async fn judge(
        &self,
        candidate: &CandidateStatement,
        _prior: &PriorReference,
        timeout: Duration,
    ) -> CoreResult<(Judgment, String)> {
        if let Some(ref needle) = self.fail_on {
            if candidate.text.contains(needle.as_str()) {
                return Err(CoreError::CollaboratorTimeout {
                    collaborator: "ollama".to_string(),
                    timeout,
                });
            }
        }
        if let Some(ref needle) = self.hang_on {
            if candidate.text.contains(needle.as_str()) {
                tokio::time::sleep(Duration::from_secs(600)).await;
            }
        }
        self.judge_calls.fetch_add(1, Ordering::SeqCst);
        Ok((self.judgment, self.rationale.clone()))
    }

    async fn summarize(&self, _transcript: &str, _timeout: Duration) -> CoreResult<String> {
        Ok("scripted summary".to_string())
    }

    async fn suggest_title(&self, _transcript: &str, _timeout: Duration) -> CoreResult<String> {
        Ok("Scripted Title".to_string())
    }
}

/// A prior reference with the given similarity
pub fn prior(meeting_id: &str, snippet: &str, similarity: f32) -> PriorReference {
    PriorReference {
        meeting_id: meeting_id.to_string(),
        snippet: snippet.to_string(),
        similarity,
    }
}
