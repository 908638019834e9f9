//! Speech recognition collaborators.
//!
//! The recognizer is an external process (VAD + STT, optionally with
//! diarization) that writes one JSON segment per stdout line. The core
//! never touches raw audio.

use std::process::Stdio;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, warn};

use crate::error::{CoreError, CoreResult};

/// A segment as emitted by a recognizer, before normalization
#[derive(Debug, Clone, Deserialize)]
pub struct RawSegment {
    pub text: String,
    #[serde(default)]
    pub speaker_id: Option<String>,
    pub start_ts: DateTime<Utc>,
    pub end_ts: DateTime<Utc>,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
}

fn default_confidence() -> f32 {
    1.0
}

/// Source of raw speech segments.
///
/// `next_batch` blocks until segments are available; an error means the
/// collaborator faulted and the adapter framework should back off and
/// retry.
#[async_trait]
pub trait SpeechCollaborator: Send {
    fn name(&self) -> &str;

    async fn next_batch(&mut self) -> CoreResult<Vec<RawSegment>>;
}

/// Recognizer subprocess emitting JSONL segments on stdout.
///
/// The process is spawned lazily and respawned after EOF or a fault,
/// so a crashed recognizer shows up as a transient error rather than
/// a dead source.
#[derive(Debug)]
pub struct CommandSpeech {
    name: String,
    program: String,
    args: Vec<String>,
    child: Option<Child>,
    lines: Option<Lines<BufReader<ChildStdout>>>,
}

impl CommandSpeech {
    /// Build from a shell-style command string, e.g.
    /// `"recass-stt --device mic"`
    pub fn from_command(name: impl Into<String>, command: &str) -> CoreResult<Self> {
        let mut parts = command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| CoreError::FatalConfig("empty recognizer command".to_string()))?
            .to_string();
        let args = parts.map(|s| s.to_string()).collect();

        Ok(Self {
            name: name.into(),
            program,
            args,
            child: None,
            lines: None,
        })
    }

    fn spawn(&mut self) -> CoreResult<()> {
        debug!(name = %self.name, program = %self.program, "spawning recognizer");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                CoreError::transient(&self.name, format!("failed to spawn recognizer: {}", e))
            })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            CoreError::transient(&self.name, "recognizer stdout not captured".to_string())
        })?;

        self.lines = Some(BufReader::new(stdout).lines());
        self.child = Some(child);
        Ok(())
    }

    fn teardown(&mut self) {
        self.lines = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
        }
    }
}

#[async_trait]
impl SpeechCollaborator for CommandSpeech {
    fn name(&self) -> &str {
        &self.name
    }

    async fn next_batch(&mut self) -> CoreResult<Vec<RawSegment>> {
        if self.lines.is_none() {
            self.spawn()?;
        }

        // spawn() always sets lines on success
        let lines = match self.lines.as_mut() {
            Some(l) => l,
            None => {
                return Err(CoreError::transient(
                    &self.name,
                    "recognizer not running".to_string(),
                ))
            }
        };

        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    return Ok(Vec::new());
                }
                match serde_json::from_str::<RawSegment>(line) {
                    Ok(segment) => Ok(vec![segment]),
                    Err(e) => {
                        // Malformed output is a data problem, not a fault
                        warn!(name = %self.name, "unparseable recognizer line: {}", e);
                        Ok(Vec::new())
                    }
                }
            }
            Ok(None) => {
                // EOF: recognizer exited; respawn on the next call
                self.teardown();
                Err(CoreError::transient(
                    &self.name,
                    "recognizer exited".to_string(),
                ))
            }
            Err(e) => {
                self.teardown();
                Err(CoreError::transient(
                    &self.name,
                    format!("recognizer read failed: {}", e),
                ))
            }
        }
    }
}

impl Drop for CommandSpeech {
    fn drop(&mut self) {
        self.teardown();
    }
}
