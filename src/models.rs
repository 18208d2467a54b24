//! Core data models used throughout CorpGuide.
//!
//! These types represent the pages, chunks, conversation turns, and query
//! responses that flow through the ingestion and question-answering pipeline.

use serde::Serialize;
use std::collections::BTreeMap;

/// Metadata key holding the originating file name of a chunk.
pub const SOURCE_KEY: &str = "source";
/// Metadata key holding the 1-based page number a chunk was cut from.
pub const PAGE_KEY: &str = "page";

/// One page of a source file, as produced by the loader.
#[derive(Debug, Clone)]
pub struct Document {
    pub content: String,
    pub source_name: String,
    pub page: usize,
}

/// A semantically bounded span of text plus provenance metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
    pub metadata: BTreeMap<String, String>,
}

impl Chunk {
    /// The `source` metadata value, if set.
    pub fn source(&self) -> Option<&str> {
        self.metadata.get(SOURCE_KEY).map(String::as_str)
    }

    pub fn set_source(&mut self, source: impl Into<String>) {
        self.metadata.insert(SOURCE_KEY.to_string(), source.into());
    }
}

/// A chunk returned from similarity search, with its cosine score.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Human,
    Ai,
}

impl Role {
    /// Parse a wire role tag. Unknown tags yield `None`.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "human" | "user" => Some(Role::Human),
            "ai" | "assistant" => Some(Role::Ai),
            _ => None,
        }
    }

    /// Role name in OpenAI-compatible chat messages.
    pub fn as_chat_role(&self) -> &'static str {
        match self {
            Role::Human => "user",
            Role::Ai => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
}

impl ConversationTurn {
    pub fn human(text: impl Into<String>) -> Self {
        Self {
            role: Role::Human,
            text: text.into(),
        }
    }

    pub fn ai(text: impl Into<String>) -> Self {
        Self {
            role: Role::Ai,
            text: text.into(),
        }
    }
}

/// Result of one question-answering call.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<String>,
    /// Wall-clock seconds spent reformulating, retrieving, and generating.
    pub latency: f64,
}
