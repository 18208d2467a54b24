//! In-memory [`VectorStore`] for tests and embedded use.
//!
//! Collections live in a `HashMap` behind `std::sync::RwLock`. Search is
//! brute-force cosine similarity over every record of the collection.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use super::{rank, EmbeddedChunk, VectorStore};
use crate::embedding::cosine_similarity;
use crate::models::RetrievedChunk;

#[derive(Default)]
pub struct InMemoryStore {
    collections: RwLock<HashMap<String, Vec<EmbeddedChunk>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow::anyhow!("in-memory store lock poisoned")
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn add(&self, collection: &str, records: &[EmbeddedChunk]) -> Result<()> {
        let mut collections = self.collections.write().map_err(poisoned)?;
        collections
            .entry(collection.to_string())
            .or_default()
            .extend(records.iter().cloned());
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        query_vec: &[f32],
        limit: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        let collections = self.collections.read().map_err(poisoned)?;
        let hits = collections
            .get(collection)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.vector.len() == query_vec.len())
                    .map(|r| RetrievedChunk {
                        chunk: r.chunk.clone(),
                        score: cosine_similarity(query_vec, &r.vector),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(rank(hits, limit))
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let collections = self.collections.read().map_err(poisoned)?;
        Ok(collections.get(collection).map_or(0, Vec::len))
    }

    async fn clear(&self, collection: &str) -> Result<u64> {
        let mut collections = self.collections.write().map_err(poisoned)?;
        Ok(collections
            .remove(collection)
            .map_or(0, |records| records.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::make_chunk;

    fn record(text: &str, vector: Vec<f32>) -> EmbeddedChunk {
        EmbeddedChunk {
            chunk: make_chunk(text),
            vector,
        }
    }

    #[tokio::test]
    async fn search_ranks_by_similarity() {
        let store = InMemoryStore::new();
        store
            .add(
                "c",
                &[
                    record("far", vec![0.0, 1.0]),
                    record("near", vec![1.0, 0.1]),
                    record("mid", vec![1.0, 1.0]),
                ],
            )
            .await
            .unwrap();

        let hits = store.search("c", &[1.0, 0.0], 2).await.unwrap();
        let texts: Vec<&str> = hits.iter().map(|h| h.chunk.text.as_str()).collect();
        assert_eq!(texts, vec!["near", "mid"]);
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn collections_are_isolated() {
        let store = InMemoryStore::new();
        store.add("a", &[record("x", vec![1.0])]).await.unwrap();
        store.add("b", &[record("y", vec![1.0])]).await.unwrap();

        assert_eq!(store.clear("a").await.unwrap(), 1);
        assert_eq!(store.count("a").await.unwrap(), 0);
        assert_eq!(store.count("b").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn mismatched_dimensions_are_ignored() {
        let store = InMemoryStore::new();
        store
            .add("c", &[record("old", vec![1.0, 0.0, 0.0])])
            .await
            .unwrap();
        assert!(store.search("c", &[1.0, 0.0], 5).await.unwrap().is_empty());
    }
}
