//! History-aware query reformulation.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::llm::ChatModel;
use crate::models::ConversationTurn;
use crate::prompts;

/// Rewrites a follow-up question into one that stands on its own.
pub struct QueryReformulator {
    model: Arc<dyn ChatModel>,
}

impl QueryReformulator {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    /// With no history the question is returned unchanged and the model is
    /// not called. An empty model reply also falls back to the question.
    pub async fn reformulate(&self, question: &str, history: &[ConversationTurn]) -> Result<String> {
        if history.is_empty() {
            return Ok(question.to_string());
        }

        let messages = prompts::reformulation_messages(question, history);
        let rewritten = self
            .model
            .complete(&messages)
            .await
            .context("Query reformulation failed")?;

        let rewritten = rewritten.trim();
        if rewritten.is_empty() {
            return Ok(question.to_string());
        }

        tracing::debug!(original = question, standalone = rewritten, "reformulated question");
        Ok(rewritten.to_string())
    }
}
