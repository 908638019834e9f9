//! External collaborator integrations.
//!
//! Collaborators are reached through narrow async traits so the checker
//! and session can be tested against scripted implementations:
//! - `LlmJudge`: Ollama-backed judgment, summary, and title generation
//! - `KnowledgeBase`: HTTP semantic search over prior meetings

pub mod knowledge;
pub mod ollama;

pub use knowledge::{HttpKnowledgeBase, KnowledgeBase};
pub use ollama::{LlmJudge, OllamaJudge};
