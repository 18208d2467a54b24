//! Batch ingestion.
//!
//! Rebuilds the index from scratch: the persist directory is deleted, every
//! PDF in the data directory is processed (failures are logged and skipped)
//! and the resulting chunks are inserted into a fresh collection.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::index::VectorIndex;
use crate::processor::DocumentProcessor;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub files_found: usize,
    pub files_processed: usize,
    pub files_failed: usize,
    pub chunks_written: usize,
}

/// Process every matching file under `data_dir` and insert the chunks.
pub async fn ingest_directory(
    processor: &DocumentProcessor,
    index: &VectorIndex,
    data_dir: &Path,
) -> Result<IngestReport> {
    let files = processor.discover(data_dir)?;
    let mut report = IngestReport {
        files_found: files.len(),
        ..IngestReport::default()
    };

    if files.is_empty() {
        tracing::warn!(dir = %data_dir.display(), "no documents found");
        return Ok(report);
    }

    let processed = processor.process_files(&files).await;
    report.files_processed = processed.processed;
    report.files_failed = processed.failed.len();

    index
        .insert(&processed.chunks)
        .await
        .context("Failed to write chunks to the index")?;
    report.chunks_written = processed.chunks.len();

    tracing::info!(
        files = report.files_processed,
        failed = report.files_failed,
        chunks = report.chunks_written,
        "ingestion complete"
    );
    Ok(report)
}

/// `corpguide ingest`: wipe the index and rebuild it from the data directory.
pub async fn run_ingest(config: &Config) -> Result<()> {
    let persist_dir = &config.db.persist_dir;
    if persist_dir.exists() {
        std::fs::remove_dir_all(persist_dir).with_context(|| {
            format!("Failed to remove index directory: {}", persist_dir.display())
        })?;
        tracing::info!(dir = %persist_dir.display(), "removed existing index");
    }

    let data_dir = &config.data.dir;
    if !data_dir.exists() {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;
        println!("Created data directory {}", data_dir.display());
        println!("Add PDF files to it and run `corpguide ingest` again.");
        return Ok(());
    }

    let embedder: Arc<dyn EmbeddingProvider> = Arc::from(
        create_provider(&config.embedding).context("Failed to create embedding provider")?,
    );
    let processor = DocumentProcessor::new(config, embedder.clone())?;
    let index = VectorIndex::open(config, embedder).await?;

    let report = ingest_directory(&processor, &index, data_dir).await?;

    println!("ingest {}", data_dir.display());
    println!("  files found: {}", report.files_found);
    if report.files_found == 0 {
        println!("  no PDF files to ingest");
        return Ok(());
    }
    println!("  files processed: {}", report.files_processed);
    println!("  files skipped: {}", report.files_failed);
    println!("  chunks written: {}", report.chunks_written);
    println!("  collection: {}", index.collection());
    println!("ok");

    Ok(())
}
