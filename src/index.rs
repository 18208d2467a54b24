//! The persistent vector index: embeds chunks on insert, embeds questions on
//! query, and delegates storage and cosine search to a [`VectorStore`].

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::config::Config;
use crate::embedding::{embed_batched, embed_query, EmbeddingProvider};
use crate::models::{Chunk, RetrievedChunk};
use crate::store::{EmbeddedChunk, SqliteStore, VectorStore};

/// Text embedded by [`VectorIndex::probe`].
const PROBE_QUERY: &str = "policy";

pub struct VectorIndex {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    collection: String,
    batch_size: usize,
}

impl VectorIndex {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        collection: impl Into<String>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            collection: collection.into(),
            batch_size,
        }
    }

    /// Open the SQLite-backed index under `db.persist_dir`.
    pub async fn open(config: &Config, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let store = SqliteStore::open(&config.db.persist_dir)
            .await
            .with_context(|| {
                format!(
                    "Failed to open vector index at {}",
                    config.db.persist_dir.display()
                )
            })?;
        Ok(Self::new(
            Arc::new(store),
            embedder,
            config.db.collection.clone(),
            config.embedding.batch_size,
        ))
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Embed and append `chunks`. An empty slice is a no-op.
    pub async fn insert(&self, chunks: &[Chunk]) -> Result<()> {
        if chunks.is_empty() {
            tracing::warn!(collection = %self.collection, "no chunks to insert");
            return Ok(());
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embed_batched(self.embedder.as_ref(), &texts, self.batch_size)
            .await
            .context("Failed to embed chunks")?;

        let records: Vec<EmbeddedChunk> = chunks
            .iter()
            .cloned()
            .zip(vectors)
            .map(|(chunk, vector)| EmbeddedChunk { chunk, vector })
            .collect();

        self.store
            .add(&self.collection, &records)
            .await
            .context("Failed to store chunks")?;

        tracing::info!(
            collection = %self.collection,
            inserted = records.len(),
            "inserted chunks"
        );
        Ok(())
    }

    /// The `k` chunks closest to `text`, best first.
    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<RetrievedChunk>> {
        let query_vec = embed_query(self.embedder.as_ref(), text)
            .await
            .context("Failed to embed query")?;
        self.store
            .search(&self.collection, &query_vec, k)
            .await
            .context("Vector search failed")
    }

    pub async fn count(&self) -> Result<usize> {
        self.store.count(&self.collection).await
    }

    /// Remove every record of the collection.
    pub async fn reset(&self) -> Result<()> {
        let removed = self.store.clear(&self.collection).await?;
        tracing::info!(collection = %self.collection, removed, "index reset");
        Ok(())
    }

    /// Health check: the record count, after verifying a trivial query can
    /// be answered. A populated collection that returns nothing (e.g. vectors
    /// from a different embedding model) is reported as an error.
    pub async fn probe(&self) -> Result<usize> {
        let n = self.count().await?;
        if n == 0 {
            return Ok(0);
        }
        let hits = self.query(PROBE_QUERY, 1).await?;
        if hits.is_empty() {
            anyhow::bail!(
                "Index holds {} records but none match the current embedding model",
                n
            );
        }
        Ok(n)
    }
}
