//! Storage abstraction for the vector index.
//!
//! The [`VectorStore`] trait is the narrow contract the index needs from a
//! backend: append embedded chunks to a named collection, run brute-force
//! cosine search over it, count it and clear it. Two backends exist:
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`SqliteStore`] | Production; one SQLite file under the persist directory |
//! | [`InMemoryStore`] | Tests and embedded use; lost on drop |
//!
//! Implementations must be `Send + Sync` to be shared across request tasks.

mod memory;
mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Chunk, RetrievedChunk};

/// A chunk paired with the embedding of its text.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Append records to `collection`. Existing records are untouched.
    async fn add(&self, collection: &str, records: &[EmbeddedChunk]) -> Result<()>;

    /// The `limit` records of `collection` most similar to `query_vec`, best
    /// first. Records whose dimensionality differs from the query are ignored.
    async fn search(
        &self,
        collection: &str,
        query_vec: &[f32],
        limit: usize,
    ) -> Result<Vec<RetrievedChunk>>;

    async fn count(&self, collection: &str) -> Result<usize>;

    /// Delete every record of `collection`, returning how many were removed.
    async fn clear(&self, collection: &str) -> Result<u64>;
}

/// Sort best-first and keep the top `limit`.
pub(crate) fn rank(mut hits: Vec<RetrievedChunk>, limit: usize) -> Vec<RetrievedChunk> {
    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    hits.truncate(limit);
    hits
}
