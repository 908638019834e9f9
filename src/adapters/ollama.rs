//! Ollama LLM client for consistency judgments and summaries.
//!
//! Endpoints: POST /api/generate, GET /api/tags (health)

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{CandidateStatement, Judgment, PriorReference};
use crate::error::{CoreError, CoreResult};

/// Judgment prompts use a low temperature to keep verdicts factual
const JUDGE_TEMPERATURE: f32 = 0.3;
const SUMMARY_TEMPERATURE: f32 = 0.5;

/// Prompt inputs are truncated to keep request size bounded
const MAX_PROMPT_CHARS: usize = 4000;

/// LLM collaborator contract.
///
/// Every call carries an explicit timeout; implementations must not
/// outlive it. Errors are transient from the caller's perspective.
#[async_trait]
pub trait LlmJudge: Send + Sync {
    /// Classify a candidate statement against a prior statement
    async fn judge(
        &self,
        candidate: &CandidateStatement,
        prior: &PriorReference,
        timeout: Duration,
    ) -> CoreResult<(Judgment, String)>;

    /// Summarize a transcript
    async fn summarize(&self, transcript: &str, timeout: Duration) -> CoreResult<String>;

    /// Suggest a short meeting title
    async fn suggest_title(&self, transcript: &str, timeout: Duration) -> CoreResult<String>;
}

/// Ollama-backed judge
pub struct OllamaJudge {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

impl OllamaJudge {
    pub fn new(base_url: String, model: String) -> Self {
        Self {
            base_url,
            model,
            client: reqwest::Client::new(),
        }
    }

    /// Check that the Ollama server is reachable
    pub async fn health_check(&self) -> CoreResult<()> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(3))
            .send()
            .await
            .map_err(|e| CoreError::transient("ollama", e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(CoreError::transient(
                "ollama",
                format!("health check returned {}", response.status()),
            ))
        }
    }

    async fn generate(
        &self,
        prompt: &str,
        temperature: f32,
        timeout: Duration,
    ) -> CoreResult<String> {
        let url = format!("{}/api/generate", self.base_url);
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            temperature,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CoreError::CollaboratorTimeout {
                        collaborator: "ollama".to_string(),
                        timeout,
                    }
                } else {
                    CoreError::transient("ollama", e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CoreError::transient(
                "ollama",
                format!("generate returned {}", status),
            ));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| CoreError::transient("ollama", e.to_string()))?;

        Ok(body.response.trim().to_string())
    }
}

#[async_trait]
impl LlmJudge for OllamaJudge {
    async fn judge(
        &self,
        candidate: &CandidateStatement,
        prior: &PriorReference,
        timeout: Duration,
    ) -> CoreResult<(Judgment, String)> {
        let prompt = judge_prompt(candidate, prior);
        debug!(model = %self.model, "requesting consistency judgment");

        let response = self.generate(&prompt, JUDGE_TEMPERATURE, timeout).await?;
        Ok(parse_judgment(&response))
    }

    async fn summarize(&self, transcript: &str, timeout: Duration) -> CoreResult<String> {
        let prompt = format!(
            "Summarize the key points, decisions, and action items of this \
             meeting transcript in a few short sentences.\n\nTranscript:\n{}",
            truncate(transcript, MAX_PROMPT_CHARS)
        );
        self.generate(&prompt, SUMMARY_TEMPERATURE, timeout).await
    }

    async fn suggest_title(&self, transcript: &str, timeout: Duration) -> CoreResult<String> {
        let prompt = format!(
            "Suggest a short descriptive title (at most 8 words) for this \
             meeting transcript. Reply with the title only.\n\nTranscript:\n{}",
            truncate(transcript, MAX_PROMPT_CHARS)
        );
        let title = self.generate(&prompt, SUMMARY_TEMPERATURE, timeout).await?;
        Ok(title.trim_matches('"').to_string())
    }
}

fn judge_prompt(candidate: &CandidateStatement, prior: &PriorReference) -> String {
    format!(
        "You compare two meeting statements for factual consistency.\n\
         \n\
         Earlier statement (meeting {}):\n{}\n\
         \n\
         Current statement (speaker {}):\n{}\n\
         \n\
         Answer on the first line with exactly one word:\n\
         CONTRADICTION if the current statement directly contradicts the earlier one,\n\
         CHANGED if the position changed without acknowledging the earlier statement,\n\
         CONSISTENT if they agree,\n\
         UNRELATED if they do not address the same fact.\n\
         Then explain briefly on the following lines.",
        prior.meeting_id,
        truncate(&prior.snippet, MAX_PROMPT_CHARS / 2),
        candidate.speaker,
        truncate(&candidate.text, MAX_PROMPT_CHARS / 2),
    )
}

/// Parse the first-line verdict; anything unrecognized is treated as
/// unrelated so a confused model never fabricates a finding
fn parse_judgment(response: &str) -> (Judgment, String) {
    let mut lines = response.lines();
    let verdict_line = lines.next().unwrap_or("").trim().to_uppercase();
    let rationale = lines.collect::<Vec<_>>().join("\n").trim().to_string();

    let judgment = if verdict_line.starts_with("CONTRADICTION") {
        Judgment::Contradiction
    } else if verdict_line.starts_with("CHANGED") {
        Judgment::UnacknowledgedChange
    } else if verdict_line.starts_with("CONSISTENT") {
        Judgment::Consistent
    } else {
        Judgment::Unrelated
    };

    (judgment, rationale)
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
