//! Error taxonomy for the meeting core.
//!
//! Four classes with distinct handling:
//! - `TransientCollaborator`: retried with backoff, never escalates past
//!   the affected unit of work
//! - `DegradedSource`: surfaced as a status signal while the pipeline
//!   keeps running
//! - `DataIntegrity`: the offending unit is logged and dropped
//! - `FatalConfig`: the only class that aborts session startup

use std::time::Duration;

use thiserror::Error;

/// Errors produced by the ingestion and checking pipeline
#[derive(Debug, Error)]
pub enum CoreError {
    /// A collaborator call failed or timed out; safe to retry
    #[error("collaborator '{collaborator}' unavailable: {message}")]
    TransientCollaborator {
        collaborator: String,
        message: String,
    },

    /// A collaborator call exceeded its deadline
    #[error("collaborator '{collaborator}' timed out after {timeout:?}")]
    CollaboratorTimeout {
        collaborator: String,
        timeout: Duration,
    },

    /// An input source exhausted its retry budget and is reconnecting
    #[error("source '{name}' degraded after {attempts} attempts")]
    DegradedSource { name: String, attempts: u32 },

    /// A data unit violated an invariant and was dropped
    #[error("data integrity violation: {0}")]
    DataIntegrity(String),

    /// Configuration is unusable; startup must fail
    #[error("fatal configuration error: {0}")]
    FatalConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    /// Whether the failed operation may be retried in place
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::TransientCollaborator { .. } | Self::CollaboratorTimeout { .. }
        )
    }

    pub fn transient(collaborator: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TransientCollaborator {
            collaborator: collaborator.into(),
            message: message.into(),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let err = CoreError::transient("ollama", "connection refused");
        assert!(err.is_transient());

        let err = CoreError::CollaboratorTimeout {
            collaborator: "knowledge".to_string(),
            timeout: Duration::from_secs(5),
        };
        assert!(err.is_transient());

        let err = CoreError::DataIntegrity("end before start".to_string());
        assert!(!err.is_transient());

        let err = CoreError::FatalConfig("missing endpoint".to_string());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_display_messages() {
        let err = CoreError::transient("ollama", "connection refused");
        assert_eq!(
            err.to_string(),
            "collaborator 'ollama' unavailable: connection refused"
        );

        let err = CoreError::DegradedSource {
            name: "mic".to_string(),
            attempts: 3,
        };
        assert_eq!(err.to_string(), "source 'mic' degraded after 3 attempts");
    }
}
