//! Shared fakes for integration tests: a keyword embedder, a plain-text
//! loader standing in for PDF parsing, and a language model that answers by
//! quoting the retrieved context.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use corpguide::config::Config;
use corpguide::embedding::EmbeddingProvider;
use corpguide::index::VectorIndex;
use corpguide::llm::{ChatMessage, ChatModel, LlmError};
use corpguide::models::Document;
use corpguide::pipeline::RagPipeline;
use corpguide::processor::{DocumentLoader, DocumentProcessor};
use corpguide::prompts::{CONTEXTUALIZE_PROMPT, FALLBACK_ANSWER};
use corpguide::store::SqliteStore;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const VOCAB: [&str; 8] = [
    "annual", "leave", "days", "salary", "paid", "overtime", "remote", "sick",
];

pub const LEAVE_POLICY: &str = "Employees are entitled to 21 days of annual leave per year. \
Annual leave must be approved by the line manager. \
Sick leave requires a medical certificate after two days.";

pub const PAY_POLICY: &str = "Salary is paid on the 25th of every month. \
Overtime is paid at one and a half times the hourly rate.";

/// Bag-of-words embedding over [`VOCAB`] plus a constant bias dimension.
pub struct KeywordEmbedder;

pub fn keyword_vector(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    let mut v: Vec<f32> = VOCAB
        .iter()
        .map(|w| lower.matches(w).count() as f32)
        .collect();
    v.push(0.1);
    v
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keywords"
    }
    fn dims(&self) -> usize {
        VOCAB.len() + 1
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| keyword_vector(t)).collect())
    }
}

/// Treats every file as one UTF-8 page.
pub struct TextLoader;

#[async_trait]
impl DocumentLoader for TextLoader {
    async fn load(&self, path: &Path) -> Result<Vec<Document>> {
        Ok(vec![Document {
            content: std::fs::read_to_string(path)?,
            source_name: path.display().to_string(),
            page: 1,
        }])
    }
}

/// Answers with the first context sentence sharing a vocabulary word with
/// the question, or the fallback sentence. Reformulation calls echo the
/// question.
#[derive(Default)]
pub struct QuotingModel {
    pub calls: AtomicUsize,
}

impl QuotingModel {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn context_of(system: &str) -> &str {
    let start = system.find("<context>").map(|i| i + "<context>".len());
    let end = system.find("</context>");
    match (start, end) {
        (Some(s), Some(e)) if s <= e => &system[s..e],
        _ => "",
    }
}

#[async_trait]
impl ChatModel for QuotingModel {
    fn model_name(&self) -> &str {
        "quoting"
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let question = messages
            .last()
            .map(|m| m.content.to_lowercase())
            .unwrap_or_default();
        let system = messages.first().map(|m| m.content.as_str()).unwrap_or("");

        if system == CONTEXTUALIZE_PROMPT {
            return Ok(messages
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default());
        }

        let keywords: Vec<&str> = VOCAB
            .iter()
            .copied()
            .filter(|w| question.contains(w))
            .collect();

        let answer = context_of(system)
            .split(['.', '\n'])
            .map(str::trim)
            .filter(|sentence| !sentence.is_empty())
            .find(|sentence| {
                let s = sentence.to_lowercase();
                keywords.iter().any(|w| s.contains(w))
            })
            .map(|s| format!("{}.", s))
            .unwrap_or_else(|| FALLBACK_ANSWER.to_string());

        Ok(answer)
    }
}

pub fn config_for(data_dir: &Path, persist_dir: &Path) -> Config {
    let mut config = Config::default();
    config.data.dir = data_dir.to_path_buf();
    config.db.persist_dir = persist_dir.to_path_buf();
    config.retrieval.top_k = 2;
    config
}

/// A pipeline over a real SQLite index with fake embedding, loading and
/// generation.
pub async fn build_pipeline(config: &Config, model: Arc<dyn ChatModel>) -> RagPipeline {
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(KeywordEmbedder);
    let store = SqliteStore::open(&config.db.persist_dir).await.unwrap();
    let index = VectorIndex::new(
        Arc::new(store),
        embedder.clone(),
        config.db.collection.clone(),
        config.embedding.batch_size,
    );
    let processor =
        DocumentProcessor::with_loader(config, embedder, Arc::new(TextLoader)).unwrap();
    RagPipeline::new(config.clone(), Arc::new(index), processor, model)
}

pub fn write_policies(dir: &Path) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(dir.join("leave_policy.pdf"), LEAVE_POLICY).unwrap();
    std::fs::write(dir.join("pay_policy.pdf"), PAY_POLICY).unwrap();
}
