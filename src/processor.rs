//! Directory-level document processing.
//!
//! Discovers source files in the data directory, loads each into per-page
//! [`Document`]s through a [`DocumentLoader`], splits them with the
//! [`SemanticChunker`] and stamps every resulting chunk with the file name of
//! its origin. A file that fails to load or split is logged and skipped; the
//! rest of the directory is still processed.

use anyhow::{Context, Result};
use async_trait::async_trait;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use crate::chunk::SemanticChunker;
use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::extract::{self, MIME_PDF};
use crate::models::{Chunk, Document};

/// Turns one file into its pages.
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    async fn load(&self, path: &Path) -> Result<Vec<Document>>;
}

/// Loads PDFs page by page. Blank pages are dropped but keep their numbering.
pub struct PdfLoader;

#[async_trait]
impl DocumentLoader for PdfLoader {
    async fn load(&self, path: &Path) -> Result<Vec<Document>> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let pages = tokio::task::spawn_blocking(move || extract::extract_pages(&bytes, MIME_PDF))
            .await?
            .with_context(|| format!("Failed to extract text from {}", path.display()))?;

        let source_name = path.display().to_string();
        Ok(pages
            .into_iter()
            .enumerate()
            .filter(|(_, text)| !text.trim().is_empty())
            .map(|(i, content)| Document {
                content,
                source_name: source_name.clone(),
                page: i + 1,
            })
            .collect())
    }
}

/// Outcome of processing a list of files.
#[derive(Debug, Default)]
pub struct ProcessReport {
    pub chunks: Vec<Chunk>,
    pub processed: usize,
    pub failed: Vec<PathBuf>,
}

pub struct DocumentProcessor {
    loader: Arc<dyn DocumentLoader>,
    chunker: SemanticChunker,
    include: GlobSet,
}

impl DocumentProcessor {
    /// Processor with the PDF loader.
    pub fn new(config: &Config, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        Self::with_loader(config, embedder, Arc::new(PdfLoader))
    }

    pub fn with_loader(
        config: &Config,
        embedder: Arc<dyn EmbeddingProvider>,
        loader: Arc<dyn DocumentLoader>,
    ) -> Result<Self> {
        let include = build_globset(&config.data.include_globs)?;
        let chunker = SemanticChunker::new(embedder, &config.chunking, config.embedding.batch_size);
        Ok(Self {
            loader,
            chunker,
            include,
        })
    }

    /// Top-level files of `dir` whose name matches the include globs, sorted.
    pub fn discover(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();

        for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if self.include.is_match(name.as_ref()) {
                files.push(entry.into_path());
            }
        }

        files.sort();
        Ok(files)
    }

    /// Chunks from every matching file in `dir`, each tagged with the
    /// originating file name under the `source` key.
    pub async fn process(&self, dir: &Path) -> Result<Vec<Chunk>> {
        if !dir.exists() {
            tracing::warn!(dir = %dir.display(), "data directory does not exist");
            return Ok(Vec::new());
        }

        let files = self.discover(dir)?;
        tracing::info!(dir = %dir.display(), files = files.len(), "processing documents");
        Ok(self.process_files(&files).await.chunks)
    }

    /// Process `files` in order. Failures are logged and recorded, never
    /// returned.
    pub async fn process_files(&self, files: &[PathBuf]) -> ProcessReport {
        let mut report = ProcessReport::default();

        for path in files {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string());

            match self.process_one(path).await {
                Ok(mut chunks) => {
                    for chunk in &mut chunks {
                        chunk.set_source(file_name.as_str());
                    }
                    tracing::info!(file = %file_name, chunks = chunks.len(), "processed");
                    report.processed += 1;
                    report.chunks.extend(chunks);
                }
                Err(e) => {
                    tracing::error!(file = %file_name, error = %format!("{:#}", e), "skipping file");
                    report.failed.push(path.clone());
                }
            }
        }

        report
    }

    /// Load and split a single file. Does not set the `source` key.
    pub async fn process_one(&self, path: &Path) -> Result<Vec<Chunk>> {
        let documents = self.loader.load(path).await?;
        self.chunker
            .split_documents(&documents)
            .await
            .with_context(|| format!("Failed to split {}", path.display()))
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(
            GlobBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .with_context(|| format!("Invalid include glob: {}", pattern))?,
        );
    }
    Ok(builder.build()?)
}
