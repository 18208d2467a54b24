//! Index health overview.
//!
//! Summarizes what is indexed (record counts per source file, last write
//! time), whether a trivial query can be answered, and which models are
//! configured. Used by `corpguide status`.

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;

use crate::config::Config;
use crate::db;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::index::VectorIndex;
use crate::migrate;
use crate::store::SqliteStore;

/// Per-source breakdown of one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceStats {
    pub source: String,
    pub chunk_count: i64,
    pub last_added_ts: i64,
}

/// Chunk counts grouped by the `source` metadata value, largest first.
pub async fn source_stats(pool: &SqlitePool, collection: &str) -> Result<Vec<SourceStats>> {
    let rows = sqlx::query(
        r#"
        SELECT
            COALESCE(json_extract(metadata_json, '$.source'), 'Unknown') AS source,
            COUNT(*) AS chunk_count,
            MAX(created_at) AS last_added
        FROM records
        WHERE collection = ?
        GROUP BY 1
        ORDER BY chunk_count DESC, source ASC
        "#,
    )
    .bind(collection)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| SourceStats {
            source: row.get("source"),
            chunk_count: row.get("chunk_count"),
            last_added_ts: row.get("last_added"),
        })
        .collect())
}

/// Run the status command and print a summary.
pub async fn run_status(config: &Config) -> Result<()> {
    let index_path = db::index_path(&config.db.persist_dir);

    print!("{}", header());
    println!();
    println!("  Index:       {}", index_path.display());
    println!("  Collection:  {}", config.db.collection);
    println!("  Startup:     {}", config.startup.policy);
    println!("  LLM:         {}", config.llm.model);
    println!(
        "  Embeddings:  {} ({})",
        config.embedding.provider,
        config.embedding.model.as_deref().unwrap_or("default")
    );

    if !index_path.exists() {
        println!();
        println!("  Index not built. Run `corpguide ingest` or start the server.");
        println!();
        return Ok(());
    }

    let size = std::fs::metadata(&index_path).map(|m| m.len()).unwrap_or(0);
    let pool = db::connect(&config.db.persist_dir).await?;
    migrate::run_migrations(&pool).await?;

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE collection = ?")
        .bind(&config.db.collection)
        .fetch_one(&pool)
        .await?;

    println!("  Size:        {}", format_bytes(size));
    println!("  Records:     {}", total);

    let probe = match create_provider(&config.embedding) {
        Ok(provider) => {
            let embedder: Arc<dyn EmbeddingProvider> = Arc::from(provider);
            let index = VectorIndex::new(
                Arc::new(SqliteStore::new(pool.clone())),
                embedder,
                config.db.collection.clone(),
                config.embedding.batch_size,
            );
            match index.probe().await {
                Ok(0) => "empty".to_string(),
                Ok(n) => format!("ok ({} records)", n),
                Err(e) => format!("failed: {:#}", e),
            }
        }
        Err(e) => format!("unavailable: {:#}", e),
    };
    println!("  Probe:       {}", probe);

    let stats = source_stats(&pool, &config.db.collection).await?;
    if !stats.is_empty() {
        println!();
        println!("  By source:");
        println!("  {:<36} {:>8}   {}", "SOURCE", "CHUNKS", "ADDED");
        println!("  {}", "-".repeat(60));
        for s in &stats {
            println!(
                "  {:<36} {:>8}   {}",
                s.source,
                s.chunk_count,
                format_ts_relative(s.last_added_ts)
            );
        }
    }

    println!();
    pool.close().await;
    Ok(())
}

const TITLE: &str = "CorpGuide: Index Status";

fn header() -> String {
    format!("{}\n{}\n", TITLE, "=".repeat(TITLE.len()))
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;

    if delta < 0 {
        format_ts_iso(ts)
    } else if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
