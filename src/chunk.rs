//! Semantic text chunker.
//!
//! Splits page text into [`Chunk`]s whose boundaries follow shifts in meaning
//! rather than a fixed size:
//!
//! 1. The text is split into sentences after `.`, `?`, `!`, `؟` or `۔`
//!    followed by whitespace.
//! 2. Each sentence is widened into a window with `buffer_size` neighbours
//!    on either side, and every window is embedded.
//! 3. The cosine distance between consecutive windows is computed.
//! 4. A break is placed after every sentence whose distance to the next one
//!    exceeds the `breakpoint_percentile`-th percentile of all distances.
//!
//! Each chunk receives a random UUID plus a SHA-256 hash of its text.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::embedding::{cosine_similarity, embed_batched, EmbeddingProvider};
use crate::models::{Chunk, Document, PAGE_KEY};

const SENTENCE_TERMINATORS: [char; 5] = ['.', '?', '!', '؟', '۔'];

/// Embedding-driven splitter. One instance is shared across all files of a run.
pub struct SemanticChunker {
    embedder: Arc<dyn EmbeddingProvider>,
    breakpoint_percentile: f64,
    buffer_size: usize,
    min_chunk_chars: Option<usize>,
    batch_size: usize,
}

impl SemanticChunker {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        config: &ChunkingConfig,
        batch_size: usize,
    ) -> Self {
        Self {
            embedder,
            breakpoint_percentile: config.breakpoint_percentile,
            buffer_size: config.buffer_size,
            min_chunk_chars: config.min_chunk_chars,
            batch_size,
        }
    }

    /// Split one text into semantically coherent pieces. Blank input yields
    /// no pieces; a single sentence is returned unchanged.
    pub async fn split_text(&self, text: &str) -> Result<Vec<String>> {
        let sentences = split_sentences(text);
        if sentences.len() <= 1 {
            return Ok(sentences);
        }

        let windows = combine_sentences(&sentences, self.buffer_size);
        let embeddings = embed_batched(self.embedder.as_ref(), &windows, self.batch_size)
            .await
            .context("Failed to embed sentence windows")?;

        let distances = window_distances(&embeddings);
        let threshold = percentile(&distances, self.breakpoint_percentile);

        Ok(group_sentences(
            &sentences,
            &distances,
            threshold,
            self.min_chunk_chars,
        ))
    }

    /// Split every page and attach its page number. The `source` key is left
    /// for the caller to set.
    pub async fn split_documents(&self, documents: &[Document]) -> Result<Vec<Chunk>> {
        let mut chunks = Vec::new();
        for doc in documents {
            for piece in self.split_text(&doc.content).await? {
                let mut chunk = make_chunk(&piece);
                chunk
                    .metadata
                    .insert(PAGE_KEY.to_string(), doc.page.to_string());
                chunks.push(chunk);
            }
        }
        Ok(chunks)
    }
}

/// Split on whitespace that directly follows a sentence terminator.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut prev: Option<char> = None;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if c.is_whitespace() && prev.is_some_and(|p| SENTENCE_TERMINATORS.contains(&p)) {
            push_trimmed(&mut sentences, &text[start..i]);
            while let Some(&(_, next)) = chars.peek() {
                if !next.is_whitespace() {
                    break;
                }
                chars.next();
            }
            start = chars.peek().map(|&(j, _)| j).unwrap_or(text.len());
            prev = None;
            continue;
        }
        prev = Some(c);
    }
    push_trimmed(&mut sentences, &text[start..]);

    sentences
}

fn push_trimmed(out: &mut Vec<String>, piece: &str) {
    let trimmed = piece.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

/// Each sentence joined with up to `buffer_size` neighbours on either side.
pub fn combine_sentences(sentences: &[String], buffer_size: usize) -> Vec<String> {
    (0..sentences.len())
        .map(|i| {
            let lo = i.saturating_sub(buffer_size);
            let hi = (i + buffer_size + 1).min(sentences.len());
            sentences[lo..hi].join(" ")
        })
        .collect()
}

fn window_distances(embeddings: &[Vec<f32>]) -> Vec<f64> {
    embeddings
        .windows(2)
        .map(|pair| 1.0 - cosine_similarity(&pair[0], &pair[1]) as f64)
        .collect()
}

/// Percentile with linear interpolation between closest ranks.
/// Returns `0.0` for an empty slice.
pub fn percentile(values: &[f64], pct: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let rank = (pct / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Cut after every sentence whose outgoing distance exceeds `threshold`.
/// Groups shorter than `min_chars` are carried into the following group.
fn group_sentences(
    sentences: &[String],
    distances: &[f64],
    threshold: f64,
    min_chars: Option<usize>,
) -> Vec<String> {
    let mut groups = Vec::new();
    let mut start = 0;

    for (i, &d) in distances.iter().enumerate() {
        if d <= threshold {
            continue;
        }
        let text = sentences[start..=i].join(" ");
        if min_chars.is_some_and(|min| text.chars().count() < min) {
            continue;
        }
        groups.push(text);
        start = i + 1;
    }

    if start < sentences.len() {
        groups.push(sentences[start..].join(" "));
    }

    groups
}

pub fn make_chunk(text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        text: text.to_string(),
        hash,
        metadata: BTreeMap::new(),
    }
}
