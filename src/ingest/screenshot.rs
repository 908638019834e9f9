//! Periodic screenshot capture.
//!
//! Screenshots are visual context only. They live in a side log and are
//! associated to transcript segments by timestamp proximity when a
//! consumer reads them; they never enter the merge path.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::process::Command;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::domain::ScreenshotRef;
use crate::error::{CoreError, CoreResult};

/// Screen capture collaborator
#[async_trait]
pub trait ScreenCapture: Send + Sync {
    /// Capture one screenshot into `dir`, returning its path
    async fn capture(&self, dir: &Path) -> CoreResult<PathBuf>;
}

/// Capture via an external command.
///
/// The command string may contain `{out}`, replaced with the target
/// file path (e.g. `grim {out}` or `scrot -o {out}`).
pub struct CommandCapture {
    command: String,
}

impl CommandCapture {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl ScreenCapture for CommandCapture {
    async fn capture(&self, dir: &Path) -> CoreResult<PathBuf> {
        let filename = format!("{}.png", Utc::now().format("%Y%m%d_%H%M%S%.3f"));
        let out_path = dir.join(filename);

        let rendered = self.command.replace("{out}", &out_path.to_string_lossy());
        let mut parts = rendered.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| CoreError::FatalConfig("empty capture command".to_string()))?;

        let status = Command::new(program)
            .args(parts)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| CoreError::transient("screenshot", e.to_string()))?;

        if !status.success() {
            return Err(CoreError::transient(
                "screenshot",
                format!("capture command exited with {}", status),
            ));
        }

        Ok(out_path)
    }
}

/// Time-ordered log of captured screenshots
#[derive(Default)]
pub struct ScreenshotLog {
    refs: Mutex<Vec<ScreenshotRef>>,
}

impl ScreenshotLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, r: ScreenshotRef) {
        self.refs.lock().await.push(r);
    }

    pub async fn len(&self) -> usize {
        self.refs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.refs.lock().await.is_empty()
    }

    /// The capture closest in time to `ts`, if any
    pub async fn nearest(&self, ts: chrono::DateTime<Utc>) -> Option<ScreenshotRef> {
        let refs = self.refs.lock().await;
        refs.iter()
            .min_by_key(|r| (r.ts - ts).num_milliseconds().abs())
            .cloned()
    }

    pub async fn all(&self) -> Vec<ScreenshotRef> {
        self.refs.lock().await.clone()
    }
}

/// Spawn the periodic capture task.
///
/// Capture faults are logged and skipped; the next tick tries again.
pub fn spawn_capture_task(
    capture: Arc<dyn ScreenCapture>,
    log: Arc<ScreenshotLog>,
    dir: PathBuf,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            warn!("cannot create screenshot dir {}: {}", dir.display(), e);
            return;
        }

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match capture.capture(&dir).await {
                        Ok(path) => {
                            debug!(path = %path.display(), "captured screenshot");
                            log.push(ScreenshotRef {
                                ts: Utc::now(),
                                path,
                            })
                            .await;
                        }
                        Err(e) => {
                            warn!("screenshot capture failed: {}", e);
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

        debug!("capture task stopped");
    })
}
