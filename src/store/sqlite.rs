//! SQLite-backed [`VectorStore`].
//!
//! Records live in the `records` table of `index.sqlite3` inside the persist
//! directory. Vectors are stored as little-endian f32 blobs and scored in
//! process; there is no ANN index.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use super::{rank, EmbeddedChunk, VectorStore};
use crate::db;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::migrate;
use crate::models::{Chunk, RetrievedChunk};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the index under `persist_dir` and ensure the schema exists.
    ///
    /// A file SQLite rejects as corrupt or not a database is deleted and
    /// replaced by an empty index, which startup then rebuilds.
    pub async fn open(persist_dir: &Path) -> Result<Self> {
        match Self::connect_and_migrate(persist_dir).await {
            Ok(store) => Ok(store),
            Err(e) if is_corrupt(&e) => {
                tracing::warn!(
                    path = %db::index_path(persist_dir).display(),
                    error = %format!("{:#}", e),
                    "index database is corrupt; replacing it with an empty index"
                );
                db::remove_index_files(persist_dir)?;
                Self::connect_and_migrate(persist_dir).await
            }
            Err(e) => Err(e),
        }
    }

    async fn connect_and_migrate(persist_dir: &Path) -> Result<Self> {
        let pool = db::connect(persist_dir).await?;
        if let Err(e) = migrate::run_migrations(&pool).await {
            pool.close().await;
            return Err(e.context("Failed to initialize index schema"));
        }
        Ok(Self::new(pool))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// SQLITE_CORRUPT (11) or SQLITE_NOTADB (26), including extended codes.
fn is_corrupt(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<sqlx::Error>()
            .and_then(|e| e.as_database_error())
            .and_then(|db| db.code())
            .and_then(|code| code.parse::<i32>().ok())
            .is_some_and(|code| matches!(code & 0xff, 11 | 26))
    })
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn add(&self, collection: &str, records: &[EmbeddedChunk]) -> Result<()> {
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        for record in records {
            let metadata_json = serde_json::to_string(&record.chunk.metadata)?;
            sqlx::query(
                r#"
                INSERT INTO records (id, collection, text, hash, metadata_json, embedding, dims, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&record.chunk.id)
            .bind(collection)
            .bind(&record.chunk.text)
            .bind(&record.chunk.hash)
            .bind(&metadata_json)
            .bind(vec_to_blob(&record.vector))
            .bind(record.vector.len() as i64)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        query_vec: &[f32],
        limit: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT id, text, hash, metadata_json, embedding
            FROM records
            WHERE collection = ? AND dims = ?
            "#,
        )
        .bind(collection)
        .bind(query_vec.len() as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let vector = blob_to_vec(&blob);
            let metadata_json: String = row.get("metadata_json");
            let metadata: BTreeMap<String, String> = serde_json::from_str(&metadata_json)
                .context("Corrupt metadata in index record")?;

            hits.push(RetrievedChunk {
                score: cosine_similarity(query_vec, &vector),
                chunk: Chunk {
                    id: row.get("id"),
                    text: row.get("text"),
                    hash: row.get("hash"),
                    metadata,
                },
            });
        }

        Ok(rank(hits, limit))
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE collection = ?")
            .bind(collection)
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }

    async fn clear(&self, collection: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM records WHERE collection = ?")
            .bind(collection)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
