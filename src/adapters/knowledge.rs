//! Knowledge base client for semantic search over prior meetings.
//!
//! Endpoints: POST /query, POST /write

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{CandidateStatement, PriorReference};
use crate::error::{CoreError, CoreResult};

/// Knowledge base collaborator contract.
///
/// Queries always exclude the current meeting so a statement is never
/// compared against itself. All calls carry explicit timeouts.
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// Top-k semantically similar prior statements
    async fn query(
        &self,
        text: &str,
        exclude_meeting_id: &str,
        top_k: usize,
        timeout: Duration,
    ) -> CoreResult<Vec<PriorReference>>;

    /// Persist a finished meeting's statements and summary
    async fn write(
        &self,
        meeting_id: &str,
        statements: &[CandidateStatement],
        summary: Option<&str>,
        timeout: Duration,
    ) -> CoreResult<()>;
}

/// HTTP JSON knowledge base client
pub struct HttpKnowledgeBase {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    text: &'a str,
    exclude_meeting_id: &'a str,
    top_k: usize,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    matches: Vec<PriorReference>,
}

#[derive(Debug, Serialize)]
struct WriteRequest<'a> {
    meeting_id: &'a str,
    statements: &'a [CandidateStatement],
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<&'a str>,
}

impl HttpKnowledgeBase {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    fn map_err(&self, e: reqwest::Error, timeout: Duration) -> CoreError {
        if e.is_timeout() {
            CoreError::CollaboratorTimeout {
                collaborator: "knowledge".to_string(),
                timeout,
            }
        } else {
            CoreError::transient("knowledge", e.to_string())
        }
    }
}

#[async_trait]
impl KnowledgeBase for HttpKnowledgeBase {
    async fn query(
        &self,
        text: &str,
        exclude_meeting_id: &str,
        top_k: usize,
        timeout: Duration,
    ) -> CoreResult<Vec<PriorReference>> {
        let url = format!("{}/query", self.base_url);
        let request = QueryRequest {
            text,
            exclude_meeting_id,
            top_k,
        };

        debug!(top_k, "querying knowledge base");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| self.map_err(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CoreError::transient(
                "knowledge",
                format!("query returned {}", status),
            ));
        }

        let body: QueryResponse = response
            .json()
            .await
            .map_err(|e| CoreError::transient("knowledge", e.to_string()))?;

        Ok(body.matches)
    }

    async fn write(
        &self,
        meeting_id: &str,
        statements: &[CandidateStatement],
        summary: Option<&str>,
        timeout: Duration,
    ) -> CoreResult<()> {
        let url = format!("{}/write", self.base_url);
        let request = WriteRequest {
            meeting_id,
            statements,
            summary,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| self.map_err(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CoreError::transient(
                "knowledge",
                format!("write returned {}", status),
            ));
        }

        Ok(())
    }
}
