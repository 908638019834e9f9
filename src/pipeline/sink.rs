//! Append-only finding sink.
//!
//! `append` is total: the in-memory log always grows, subscribers are
//! always notified, and JSONL persistence is best-effort. A failed
//! write lands in a retry queue and never blocks the checker. There is
//! no update or delete; corrections are new findings that reference
//! the superseded id.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

use crate::domain::{ConsistencyFinding, MeetingSummary, SinkEntry};

const BROADCAST_CAPACITY: usize = 256;

/// Ordered, append-only log of findings and summaries
pub struct FindingSink {
    entries: Mutex<Vec<SinkEntry>>,
    /// Entries whose persistence failed, awaiting retry
    pending: Mutex<Vec<SinkEntry>>,
    path: Option<PathBuf>,
    tx: broadcast::Sender<SinkEntry>,
}

impl FindingSink {
    /// In-memory only (tests, `at_end` consumers)
    pub fn in_memory() -> Self {
        Self::new(None)
    }

    /// Persisting sink; the parent directory is created on first write
    pub fn with_path(path: PathBuf) -> Self {
        Self::new(Some(path))
    }

    fn new(path: Option<PathBuf>) -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            entries: Mutex::new(Vec::new()),
            pending: Mutex::new(Vec::new()),
            path,
            tx,
        }
    }

    /// Append an entry. Never fails; persistence errors are queued.
    pub async fn append(&self, entry: SinkEntry) {
        self.entries.lock().await.push(entry.clone());

        // No receivers is fine
        let _ = self.tx.send(entry.clone());

        if self.path.is_some() {
            if let Err(e) = self.persist(&entry).await {
                warn!("finding persistence failed, queued for retry: {}", e);
                self.pending.lock().await.push(entry);
            }
        }
    }

    pub async fn append_finding(&self, finding: ConsistencyFinding) {
        self.append(SinkEntry::Finding(finding)).await;
    }

    pub async fn append_summary(&self, summary: MeetingSummary) {
        self.append(SinkEntry::Summary(summary)).await;
    }

    async fn persist(&self, entry: &SinkEntry) -> Result<()> {
        let path = match &self.path {
            Some(p) => p,
            None => return Ok(()),
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create sink directory: {}", parent.display()))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("Failed to open findings file: {}", path.display()))?;

        let json = serde_json::to_string(entry).context("Failed to serialize sink entry")?;
        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .context("Failed to write sink entry")?;
        file.flush().await.context("Failed to flush sink entry")?;

        Ok(())
    }

    /// Retry queued writes; called on a timer and at shutdown
    pub async fn flush(&self) {
        let queued: Vec<SinkEntry> = std::mem::take(&mut *self.pending.lock().await);
        if queued.is_empty() {
            return;
        }

        debug!(count = queued.len(), "retrying queued sink writes");
        for entry in queued {
            if let Err(e) = self.persist(&entry).await {
                warn!("sink retry failed, re-queued: {}", e);
                self.pending.lock().await.push(entry);
            }
        }
    }

    /// Ordered snapshot of everything appended so far
    pub async fn entries(&self) -> Vec<SinkEntry> {
        self.entries.lock().await.clone()
    }

    /// Just the findings, in append order
    pub async fn findings(&self) -> Vec<ConsistencyFinding> {
        self.entries
            .lock()
            .await
            .iter()
            .filter_map(|e| match e {
                SinkEntry::Finding(f) => Some(f.clone()),
                SinkEntry::Summary(_) => None,
            })
            .collect()
    }

    /// Live stream of appended entries
    pub fn subscribe(&self) -> broadcast::Receiver<SinkEntry> {
        self.tx.subscribe()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CandidateStatement, PriorReference, Verdict};
    use chrono::Utc;

    fn finding(text: &str) -> ConsistencyFinding {
        ConsistencyFinding::new(
            CandidateStatement {
                text: text.to_string(),
                started_at: Utc::now(),
                ended_at: Utc::now(),
                segment_ids: vec![1],
                speaker: "mic".to_string(),
            },
            PriorReference {
                meeting_id: "mtg-1".to_string(),
                snippet: "earlier words".to_string(),
                similarity: 0.85,
            },
            Verdict::Contradiction,
            "amounts differ".to_string(),
        )
    }

    #[tokio::test]
    async fn test_append_order_preserved() {
        let sink = FindingSink::in_memory();

        sink.append_finding(finding("first")).await;
        sink.append_finding(finding("second")).await;

        let findings = sink.findings().await;
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].statement.text, "first");
        assert_eq!(findings[1].statement.text, "second");
    }

    #[tokio::test]
    async fn test_broadcast_delivery() {
        let sink = FindingSink::in_memory();
        let mut rx = sink.subscribe();

        sink.append_finding(finding("live")).await;

        let entry = rx.recv().await.unwrap();
        match entry {
            SinkEntry::Finding(f) => assert_eq!(f.statement.text, "live"),
            SinkEntry::Summary(_) => panic!("expected finding"),
        }
    }

    #[tokio::test]
    async fn test_persistence_jsonl() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("meetings").join("m1").join("findings.jsonl");
        let sink = FindingSink::with_path(path.clone());

        sink.append_finding(finding("persisted")).await;

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 1);

        let back: SinkEntry = serde_json::from_str(lines[0]).unwrap();
        assert!(matches!(back, SinkEntry::Finding(_)));
    }

    #[tokio::test]
    async fn test_append_total_when_persistence_fails() {
        // A directory path makes every open fail
        let temp = tempfile::TempDir::new().unwrap();
        let sink = FindingSink::with_path(temp.path().to_path_buf());

        sink.append_finding(finding("still recorded")).await;

        // The entry is in memory despite the failed write
        assert_eq!(sink.findings().await.len(), 1);
        assert_eq!(sink.pending.lock().await.len(), 1);
    }
}
