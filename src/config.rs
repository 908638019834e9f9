//! Configuration for the meeting core.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (RECASS_HOME, RECASS_OLLAMA_URL, RECASS_KNOWLEDGE_URL)
//! 2. Config file (.recass/config.yaml)
//! 3. Defaults (~/.config/recass)
//!
//! Config file discovery:
//! - Searches current directory and parents for .recass/config.yaml
//! - Falls back to ~/.config/recass/config.yaml

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::CoreError;
use crate::ingest::RetryPolicy;

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub home: Option<String>,
    #[serde(default)]
    pub window: Option<WindowConfig>,
    #[serde(default)]
    pub checker: Option<CheckerConfig>,
    #[serde(default)]
    pub collaborators: Option<CollaboratorConfig>,
    #[serde(default)]
    pub capture: Option<CaptureConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WindowConfig {
    pub duration_secs: Option<u64>,
    pub lateness_bound_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckerConfig {
    pub interval_secs: Option<u64>,
    pub segment_trigger: Option<usize>,
    pub similarity_threshold: Option<f32>,
    pub top_k: Option<usize>,
    pub min_statement_tokens: Option<usize>,
    pub statement_gap_secs: Option<f64>,
    pub summary_interval_secs: Option<u64>,
    pub handoff: Option<HandoffMode>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CollaboratorConfig {
    pub ollama_url: Option<String>,
    pub ollama_model: Option<String>,
    pub llm_timeout_secs: Option<u64>,
    pub knowledge_url: Option<String>,
    pub knowledge_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CaptureConfig {
    pub screenshot_interval_secs: Option<u64>,
    pub screenshot_command: Option<String>,
    pub mic_command: Option<String>,
    pub loopback_command: Option<String>,
    /// Backoff for faulting recognizers and capture commands
    pub retry: Option<RetryPolicy>,
}

/// When findings are handed to consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffMode {
    /// Broadcast each finding the moment it is appended
    Immediate,
    /// Consumers read the sink snapshot at session end
    AtEnd,
}

/// Resolved runtime configuration with all defaults applied
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// State directory (findings, screenshots, meetings.db)
    pub home: PathBuf,

    pub window_duration: Duration,
    pub lateness_bound: Duration,

    pub checker_interval: Duration,
    /// New admissions that trigger a cycle before the interval elapses
    pub segment_trigger: usize,
    pub similarity_threshold: f32,
    pub top_k: usize,
    pub min_statement_tokens: usize,
    pub statement_gap_secs: f64,
    pub summary_interval: Duration,
    pub handoff: HandoffMode,

    pub ollama_url: String,
    pub ollama_model: String,
    pub llm_timeout: Duration,
    pub knowledge_url: String,
    pub knowledge_timeout: Duration,

    pub screenshot_interval: Duration,
    pub screenshot_command: Option<String>,
    pub mic_command: Option<String>,
    pub loopback_command: Option<String>,
    pub retry: RetryPolicy,
}

impl Default for CoreConfig {
    fn default() -> Self {
        let home = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("recass");

        Self {
            home,
            window_duration: Duration::from_secs(300),
            lateness_bound: Duration::from_secs(3),
            checker_interval: Duration::from_secs(60),
            segment_trigger: 25,
            similarity_threshold: 0.8,
            top_k: 5,
            min_statement_tokens: 6,
            statement_gap_secs: 2.0,
            summary_interval: Duration::from_secs(300),
            handoff: HandoffMode::Immediate,
            ollama_url: "http://localhost:11434".to_string(),
            ollama_model: "llama3".to_string(),
            llm_timeout: Duration::from_secs(15),
            knowledge_url: "http://localhost:8800".to_string(),
            knowledge_timeout: Duration::from_secs(5),
            screenshot_interval: Duration::from_secs(10),
            screenshot_command: None,
            mic_command: None,
            loopback_command: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl CoreConfig {
    /// Load configuration from all sources
    pub fn load() -> Result<Self> {
        let file = match find_config_file() {
            Some(path) => load_config_file(&path)?,
            None => ConfigFile::default(),
        };
        Ok(Self::from_file(file))
    }

    /// Apply file values and env overrides on top of defaults
    pub fn from_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(home) = file.home {
            config.home = PathBuf::from(home);
        }

        if let Some(w) = file.window {
            if let Some(s) = w.duration_secs {
                config.window_duration = Duration::from_secs(s);
            }
            if let Some(s) = w.lateness_bound_secs {
                config.lateness_bound = Duration::from_secs(s);
            }
        }

        if let Some(c) = file.checker {
            if let Some(s) = c.interval_secs {
                config.checker_interval = Duration::from_secs(s);
            }
            if let Some(n) = c.segment_trigger {
                config.segment_trigger = n;
            }
            if let Some(t) = c.similarity_threshold {
                config.similarity_threshold = t;
            }
            if let Some(k) = c.top_k {
                config.top_k = k;
            }
            if let Some(n) = c.min_statement_tokens {
                config.min_statement_tokens = n;
            }
            if let Some(g) = c.statement_gap_secs {
                config.statement_gap_secs = g;
            }
            if let Some(s) = c.summary_interval_secs {
                config.summary_interval = Duration::from_secs(s);
            }
            if let Some(h) = c.handoff {
                config.handoff = h;
            }
        }

        if let Some(c) = file.collaborators {
            if let Some(u) = c.ollama_url {
                config.ollama_url = u;
            }
            if let Some(m) = c.ollama_model {
                config.ollama_model = m;
            }
            if let Some(s) = c.llm_timeout_secs {
                config.llm_timeout = Duration::from_secs(s);
            }
            if let Some(u) = c.knowledge_url {
                config.knowledge_url = u;
            }
            if let Some(s) = c.knowledge_timeout_secs {
                config.knowledge_timeout = Duration::from_secs(s);
            }
        }

        if let Some(c) = file.capture {
            if let Some(s) = c.screenshot_interval_secs {
                config.screenshot_interval = Duration::from_secs(s);
            }
            config.screenshot_command = c.screenshot_command;
            config.mic_command = c.mic_command;
            config.loopback_command = c.loopback_command;
            if let Some(r) = c.retry {
                config.retry = r;
            }
        }

        // Env overrides win over the file
        if let Ok(home) = std::env::var("RECASS_HOME") {
            config.home = PathBuf::from(home);
        }
        if let Ok(url) = std::env::var("RECASS_OLLAMA_URL") {
            config.ollama_url = url;
        }
        if let Ok(url) = std::env::var("RECASS_KNOWLEDGE_URL") {
            config.knowledge_url = url;
        }

        config
    }

    /// Check for unusable configuration; the only startup-fatal class
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.knowledge_url.trim().is_empty() {
            return Err(CoreError::FatalConfig(
                "knowledge base endpoint is not configured".to_string(),
            ));
        }
        if self.ollama_url.trim().is_empty() {
            return Err(CoreError::FatalConfig(
                "ollama endpoint is not configured".to_string(),
            ));
        }
        if self.window_duration.is_zero() {
            return Err(CoreError::FatalConfig(
                "window duration must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(CoreError::FatalConfig(format!(
                "similarity threshold {} outside [0, 1]",
                self.similarity_threshold
            )));
        }
        Ok(())
    }

    /// Path to the findings log for a meeting
    pub fn findings_path(&self, meeting_id: &str) -> PathBuf {
        self.home.join("meetings").join(meeting_id).join("findings.jsonl")
    }

    /// Directory for a meeting's screenshots
    pub fn screenshots_dir(&self, meeting_id: &str) -> PathBuf {
        self.home.join("meetings").join(meeting_id).join("screenshots")
    }

    /// Path to the meetings database
    pub fn meetings_db_path(&self) -> PathBuf {
        self.home.join("meetings.db")
    }
}

/// Find config file by searching current directory and parents,
/// then the user config directory
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".recass").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    let user_config = dirs::config_dir()?.join("recass").join("config.yaml");
    if user_config.exists() {
        return Some(user_config);
    }

    None
}

/// Load and parse a config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}
