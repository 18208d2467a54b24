//! RAG orchestrator.
//!
//! [`RagPipeline`] owns the vector index, the document processor and the
//! language model, and exposes two workflows:
//!
//! - **startup**: probe the index and, depending on the configured
//!   [`StartupPolicy`], rebuild it from the data directory. Progress is
//!   published as a [`PipelineState`] that the HTTP layer reads to decide
//!   whether it can serve questions yet.
//! - **process_query**: reformulate → retrieve → generate, returning the
//!   answer, the deduplicated source file names and the elapsed seconds.
//!
//! ```text
//! Uninitialized → CheckingIndex → Healthy ─────→ Ready
//!                      │                          ↑
//!                      └────────→ Rebuilding ─────┤
//!                                      └──→ ReadyDegraded
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::{Config, StartupPolicy};
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::history;
use crate::index::VectorIndex;
use crate::llm::{ChatModel, GroqClient};
use crate::models::{ConversationTurn, QueryResponse, RetrievedChunk};
use crate::processor::DocumentProcessor;
use crate::prompts::{self, FALLBACK_ANSWER};
use crate::reformulate::QueryReformulator;

/// Source label for chunks that somehow lack a `source` key.
const UNKNOWN_SOURCE: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Uninitialized,
    CheckingIndex,
    Healthy,
    Rebuilding,
    Ready,
    /// Serving, but the index is empty or could not be rebuilt; every answer
    /// will be the fallback sentence until documents are ingested.
    ReadyDegraded,
}

impl PipelineState {
    pub fn is_ready(self) -> bool {
        matches!(self, PipelineState::Ready | PipelineState::ReadyDegraded)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PipelineState::Uninitialized => "uninitialized",
            PipelineState::CheckingIndex => "checking_index",
            PipelineState::Healthy => "healthy",
            PipelineState::Rebuilding => "rebuilding",
            PipelineState::Ready => "ready",
            PipelineState::ReadyDegraded => "ready_degraded",
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct RagPipeline {
    config: Config,
    index: Arc<VectorIndex>,
    processor: DocumentProcessor,
    reformulator: QueryReformulator,
    model: Arc<dyn ChatModel>,
    state: watch::Sender<PipelineState>,
}

impl RagPipeline {
    /// Wire the production components. Fails when the language model client
    /// or the index cannot be constructed; an empty or unreadable index is
    /// not an error here and is handled by [`startup`](Self::startup).
    pub async fn from_config(config: &Config) -> Result<Self> {
        let model: Arc<dyn ChatModel> = Arc::new(
            GroqClient::new(&config.llm).context("Failed to create language model client")?,
        );

        let embedder: Arc<dyn EmbeddingProvider> = Arc::from(
            create_provider(&config.embedding).context("Failed to create embedding provider")?,
        );

        let index = VectorIndex::open(config, embedder.clone()).await?;
        let processor = DocumentProcessor::new(config, embedder)?;

        Ok(Self::new(config.clone(), Arc::new(index), processor, model))
    }

    pub fn new(
        config: Config,
        index: Arc<VectorIndex>,
        processor: DocumentProcessor,
        model: Arc<dyn ChatModel>,
    ) -> Self {
        let (state, _) = watch::channel(PipelineState::Uninitialized);
        Self {
            config,
            index,
            processor,
            reformulator: QueryReformulator::new(model.clone()),
            model,
            state,
        }
    }

    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    fn set_state(&self, next: PipelineState) {
        let prev = self.state.send_replace(next);
        info!(from = %prev, to = %next, "pipeline state");
    }

    /// Run the startup state machine to completion and return the final
    /// (serving) state. Never fails: every index problem ends in either
    /// `Ready` or `ReadyDegraded`.
    pub async fn startup(&self) -> PipelineState {
        let policy = self.config.startup.policy;
        info!(%policy, collection = %self.index.collection(), "starting pipeline");

        let final_state = match policy {
            StartupPolicy::RebuildAlways => {
                warn!("startup policy rebuild_always: existing index will be discarded");
                self.rebuild().await
            }
            StartupPolicy::RebuildIfUnhealthy => match self.check_index().await {
                Some(_) => {
                    self.set_state(PipelineState::Healthy);
                    PipelineState::Ready
                }
                None => self.rebuild().await,
            },
            StartupPolicy::NeverRebuild => match self.check_index().await {
                Some(_) => PipelineState::Ready,
                None => {
                    warn!("index unusable and startup policy forbids rebuilding");
                    PipelineState::ReadyDegraded
                }
            },
        };

        self.set_state(final_state);
        final_state
    }

    /// `Some(count)` when the index holds readable records.
    async fn check_index(&self) -> Option<usize> {
        self.set_state(PipelineState::CheckingIndex);
        match self.index.probe().await {
            Ok(0) => {
                info!("index is empty");
                None
            }
            Ok(n) => {
                info!(records = n, "index is healthy");
                Some(n)
            }
            Err(e) => {
                warn!(error = %format!("{:#}", e), "index probe failed");
                None
            }
        }
    }

    async fn rebuild(&self) -> PipelineState {
        self.set_state(PipelineState::Rebuilding);

        if let Err(e) = self.index.reset().await {
            error!(error = %format!("{:#}", e), "could not clear index before rebuild");
            return PipelineState::ReadyDegraded;
        }

        let data_dir = &self.config.data.dir;
        let chunks = match self.processor.process(data_dir).await {
            Ok(chunks) => chunks,
            Err(e) => {
                error!(dir = %data_dir.display(), error = %format!("{:#}", e), "document processing failed");
                return PipelineState::ReadyDegraded;
            }
        };

        if chunks.is_empty() {
            warn!(dir = %data_dir.display(), "no chunks produced; answers will fall back until documents are ingested");
            return PipelineState::ReadyDegraded;
        }

        match self.index.insert(&chunks).await {
            Ok(()) => {
                info!(chunks = chunks.len(), "index rebuilt");
                PipelineState::Ready
            }
            Err(e) => {
                error!(error = %format!("{:#}", e), "failed to store rebuilt index");
                PipelineState::ReadyDegraded
            }
        }
    }

    /// Answer `question` from the indexed documents.
    ///
    /// `history` is capped to the most recent `llm.max_history_turns` turns.
    /// The whole call is bounded by `llm.request_timeout_secs`.
    pub async fn process_query(
        &self,
        question: &str,
        history: &[ConversationTurn],
    ) -> Result<QueryResponse> {
        let start = Instant::now();
        let history = history::cap(history, self.config.llm.max_history_turns);
        let limit = Duration::from_secs(self.config.llm.request_timeout_secs);

        let (answer, sources) = match tokio::time::timeout(limit, self.answer(question, history)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                error!(error = %format!("{:#}", e), "query failed");
                return Err(e);
            }
            Err(_) => {
                error!(timeout_secs = limit.as_secs(), "query timed out");
                anyhow::bail!("Query timed out after {} seconds", limit.as_secs());
            }
        };

        let latency = start.elapsed().as_secs_f64();
        info!(latency, sources = sources.len(), "answered");

        Ok(QueryResponse {
            answer,
            sources,
            latency,
        })
    }

    async fn answer(
        &self,
        question: &str,
        history: &[ConversationTurn],
    ) -> Result<(String, Vec<String>)> {
        let standalone = self.reformulator.reformulate(question, history).await?;

        let mut hits = self
            .index
            .query(&standalone, self.config.retrieval.top_k)
            .await
            .context("Retrieval failed")?;
        if let Some(min) = self.config.retrieval.min_score {
            hits.retain(|h| h.score >= min);
        }

        if hits.is_empty() {
            info!("no context retrieved; returning fallback answer");
            return Ok((FALLBACK_ANSWER.to_string(), Vec::new()));
        }

        let messages = prompts::answer_messages(question, &hits, history);
        let answer = self
            .model
            .complete(&messages)
            .await
            .context("Answer generation failed")?;
        let answer = answer.trim();

        if prompts::is_fallback(answer) {
            return Ok((FALLBACK_ANSWER.to_string(), Vec::new()));
        }

        Ok((answer.to_string(), collect_sources(&hits)))
    }
}

/// Distinct `source` values of `hits`, sorted.
pub fn collect_sources(hits: &[RetrievedChunk]) -> Vec<String> {
    hits.iter()
        .map(|h| h.chunk.source().unwrap_or(UNKNOWN_SOURCE).to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::make_chunk;
    use crate::llm::{ChatMessage, LlmError};
    use crate::models::Document;
    use crate::processor::DocumentLoader;
    use crate::store::{InMemoryStore, VectorStore};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const VOCAB: [&str; 6] = ["leave", "annual", "salary", "overtime", "remote", "days"];

    /// Bag-of-words over a tiny vocabulary, plus a bias term so that no
    /// vector is all zeros.
    struct KeywordEmbedder;

    #[async_trait]
    impl EmbeddingProvider for KeywordEmbedder {
        fn model_name(&self) -> &str {
            "keywords"
        }
        fn dims(&self) -> usize {
            VOCAB.len() + 1
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let t = t.to_lowercase();
                    let mut v: Vec<f32> = VOCAB.iter().map(|w| t.matches(w).count() as f32).collect();
                    v.push(0.1);
                    v
                })
                .collect())
        }
    }

    struct TextLoader;

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

    /// Replies with a fixed answer and records every call.
    struct Scripted {
        reply: String,
        delay: Duration,
        calls: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl Scripted {
        fn new(reply: &str) -> Arc<Self> {
            Self::slow(reply, Duration::ZERO)
        }

        fn slow(reply: &str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                delay,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ChatModel for Scripted {
        fn model_name(&self) -> &str {
            "scripted"
        }
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
            self.calls.lock().unwrap().push(messages.to_vec());
            tokio::time::sleep(self.delay).await;
            Ok(self.reply.clone())
        }
    }

    struct Fixture {
        pipeline: RagPipeline,
        store: Arc<dyn VectorStore>,
        _data: TempDir,
    }

    fn fixture(files: &[(&str, &str)], model: Arc<dyn ChatModel>, tweak: impl FnOnce(&mut Config)) -> Fixture {
        let data = TempDir::new().unwrap();
        for (name, body) in files {
            std::fs::write(data.path().join(name), body).unwrap();
        }

        let mut config = Config::default();
        config.data.dir = data.path().to_path_buf();
        tweak(&mut config);

        let store: Arc<dyn VectorStore> = Arc::new(InMemoryStore::new());
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(KeywordEmbedder);
        let index = VectorIndex::new(store.clone(), embedder.clone(), "policy_docs", 16);
        let processor =
            DocumentProcessor::with_loader(&config, embedder, Arc::new(TextLoader)).unwrap();

        Fixture {
            pipeline: RagPipeline::new(config, Arc::new(index), processor, model),
            store,
            _data: data,
        }
    }

    async fn seed(index: &VectorIndex, items: &[(&str, &str)]) {
        let chunks: Vec<_> = items
            .iter()
            .map(|(text, source)| {
                let mut c = make_chunk(text);
                c.set_source(*source);
                c
            })
            .collect();
        index.insert(&chunks).await.unwrap();
    }

    #[test]
    fn sources_are_deduplicated() {
        let hit = |source: &str| {
            let mut chunk = make_chunk("x");
            chunk.set_source(source);
            RetrievedChunk { chunk, score: 1.0 }
        };
        let unlabeled = RetrievedChunk {
            chunk: make_chunk("y"),
            score: 0.5,
        };
        let sources = collect_sources(&[hit("b.pdf"), hit("a.pdf"), hit("b.pdf"), unlabeled]);
        assert_eq!(sources, vec!["Unknown", "a.pdf", "b.pdf"]);
    }

    #[tokio::test]
    async fn answer_cites_each_source_once() {
        let model = Scripted::new("Annual leave is 21 days.");
        let fx = fixture(&[], model.clone(), |c| c.retrieval.top_k = 3);
        seed(
            fx.pipeline.index(),
            &[
                ("Annual leave is 21 days per year.", "leave.pdf"),
                ("Annual leave requests go to your manager.", "leave.pdf"),
                ("Salary is paid on the 25th.", "pay.pdf"),
            ],
        )
        .await;

        let resp = fx
            .pipeline
            .process_query("How many annual leave days?", &[])
            .await
            .unwrap();
        assert_eq!(resp.answer, "Annual leave is 21 days.");
        assert_eq!(resp.sources, vec!["leave.pdf", "pay.pdf"]);
        assert!(resp.latency >= 0.0);
        assert_eq!(model.call_count(), 1);
    }

    #[tokio::test]
    async fn empty_index_refuses_without_calling_model() {
        let model = Scripted::new("made up");
        let fx = fixture(&[], model.clone(), |_| {});

        let resp = fx
            .pipeline
            .process_query("What is the dress code?", &[])
            .await
            .unwrap();
        assert_eq!(resp.answer, FALLBACK_ANSWER);
        assert!(resp.sources.is_empty());
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn fallback_answer_carries_no_sources() {
        let fx = fixture(&[], Scripted::new(FALLBACK_ANSWER), |_| {});
        seed(fx.pipeline.index(), &[("Salary is paid monthly.", "pay.pdf")]).await;

        let resp = fx
            .pipeline
            .process_query("Can I bring my dog?", &[])
            .await
            .unwrap();
        assert_eq!(resp.answer, FALLBACK_ANSWER);
        assert!(resp.sources.is_empty());
    }

    #[tokio::test]
    async fn min_score_filters_weak_matches() {
        let model = Scripted::new("unused");
        let fx = fixture(&[], model.clone(), |c| c.retrieval.min_score = Some(0.99));
        seed(fx.pipeline.index(), &[("Salary is paid monthly.", "pay.pdf")]).await;

        let resp = fx
            .pipeline
            .process_query("remote work", &[])
            .await
            .unwrap();
        assert_eq!(resp.answer, FALLBACK_ANSWER);
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn history_is_capped_and_forwarded() {
        let model = Scripted::new("Sick leave is 10 days.");
        let fx = fixture(&[], model.clone(), |c| c.llm.max_history_turns = 2);
        seed(fx.pipeline.index(), &[("Sick leave is 10 days.", "leave.pdf")]).await;

        let history = vec![
            ConversationTurn::human("old question"),
            ConversationTurn::ai("old answer"),
            ConversationTurn::human("How many annual leave days?"),
            ConversationTurn::ai("21 days."),
        ];
        fx.pipeline
            .process_query("And sick leave?", &history)
            .await
            .unwrap();

        let calls = model.calls.lock().unwrap();
        // Reformulation plus answer.
        assert_eq!(calls.len(), 2);
        let answer_call = &calls[1];
        assert_eq!(answer_call.len(), 4);
        assert_eq!(answer_call[1].content, "How many annual leave days?");
        assert_eq!(answer_call[3].content, "And sick leave?");
        assert!(!answer_call.iter().any(|m| m.content == "old question"));
    }

    #[tokio::test]
    async fn slow_model_hits_request_timeout() {
        let model = Scripted::slow("late", Duration::from_secs(5));
        let fx = fixture(&[], model, |c| c.llm.request_timeout_secs = 1);
        seed(fx.pipeline.index(), &[("Overtime is paid at 1.5x.", "pay.pdf")]).await;

        let err = fx
            .pipeline
            .process_query("overtime rate?", &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn startup_keeps_healthy_index() {
        let fx = fixture(&[("new.pdf", "Remote work needs approval.")], Scripted::new("x"), |_| {});
        seed(fx.pipeline.index(), &[("Annual leave is 21 days.", "leave.pdf")]).await;

        assert_eq!(fx.pipeline.startup().await, PipelineState::Ready);
        assert_eq!(fx.store.count("policy_docs").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn startup_rebuilds_empty_index() {
        let fx = fixture(
            &[("leave.pdf", "Annual leave is 21 days. Leave requests need approval.")],
            Scripted::new("x"),
            |_| {},
        );
        assert_eq!(fx.pipeline.state(), PipelineState::Uninitialized);
        assert_eq!(fx.pipeline.startup().await, PipelineState::Ready);
        assert!(fx.pipeline.state().is_ready());
        assert!(fx.store.count("policy_docs").await.unwrap() >= 1);
    }

    #[tokio::test]
    async fn startup_rebuilds_unreadable_index() {
        let fx = fixture(&[("leave.pdf", "Annual leave is 21 days.")], Scripted::new("x"), |_| {});
        // Vectors from a different model: wrong dimensionality.
        let mut stale = make_chunk("stale");
        stale.set_source("old.pdf");
        fx.store
            .add(
                "policy_docs",
                &[crate::store::EmbeddedChunk {
                    chunk: stale,
                    vector: vec![1.0, 0.0],
                }],
            )
            .await
            .unwrap();

        assert_eq!(fx.pipeline.startup().await, PipelineState::Ready);
        let hits = fx.pipeline.index().query("annual leave", 5).await.unwrap();
        assert!(hits.iter().all(|h| h.chunk.source() == Some("leave.pdf")));
        assert_eq!(fx.store.count("policy_docs").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn startup_without_documents_is_degraded() {
        let fx = fixture(&[], Scripted::new("x"), |_| {});
        assert_eq!(fx.pipeline.startup().await, PipelineState::ReadyDegraded);
        assert!(fx.pipeline.state().is_ready());

        let resp = fx.pipeline.process_query("anything", &[]).await.unwrap();
        assert_eq!(resp.answer, FALLBACK_ANSWER);
    }

    #[tokio::test]
    async fn never_rebuild_leaves_index_alone() {
        let fx = fixture(&[("leave.pdf", "Annual leave is 21 days.")], Scripted::new("x"), |c| {
            c.startup.policy = StartupPolicy::NeverRebuild
        });
        assert_eq!(fx.pipeline.startup().await, PipelineState::ReadyDegraded);
        assert_eq!(fx.store.count("policy_docs").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn rebuild_always_replaces_index() {
        let fx = fixture(&[("leave.pdf", "Annual leave is 21 days.")], Scripted::new("x"), |c| {
            c.startup.policy = StartupPolicy::RebuildAlways
        });
        seed(fx.pipeline.index(), &[("Old text about salary.", "old.pdf")]).await;

        assert_eq!(fx.pipeline.startup().await, PipelineState::Ready);
        let hits = fx.pipeline.index().query("salary", 5).await.unwrap();
        assert!(hits.iter().all(|h| h.chunk.source() == Some("leave.pdf")));
    }

    /// Serves whatever it holds but cannot be cleared.
    struct UnclearableStore(InMemoryStore);

    #[async_trait]
    impl VectorStore for UnclearableStore {
        async fn add(&self, collection: &str, records: &[crate::store::EmbeddedChunk]) -> Result<()> {
            self.0.add(collection, records).await
        }
        async fn search(
            &self,
            collection: &str,
            query_vec: &[f32],
            limit: usize,
        ) -> Result<Vec<RetrievedChunk>> {
            self.0.search(collection, query_vec, limit).await
        }
        async fn count(&self, collection: &str) -> Result<usize> {
            self.0.count(collection).await
        }
        async fn clear(&self, _collection: &str) -> Result<u64> {
            anyhow::bail!("disk I/O error")
        }
    }

    #[tokio::test]
    async fn failed_clear_does_not_mix_old_and_new_records() {
        let data = TempDir::new().unwrap();
        std::fs::write(data.path().join("leave.pdf"), "Annual leave is 21 days.").unwrap();
        let mut config = Config::default();
        config.data.dir = data.path().to_path_buf();
        config.startup.policy = StartupPolicy::RebuildAlways;

        let store: Arc<dyn VectorStore> = Arc::new(UnclearableStore(InMemoryStore::new()));
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(KeywordEmbedder);
        let index = VectorIndex::new(store.clone(), embedder.clone(), "policy_docs", 16);
        seed(&index, &[("Old text about salary.", "old.pdf")]).await;
        let processor =
            DocumentProcessor::with_loader(&config, embedder, Arc::new(TextLoader)).unwrap();
        let pipeline = RagPipeline::new(config, Arc::new(index), processor, Scripted::new("x"));

        assert_eq!(pipeline.startup().await, PipelineState::ReadyDegraded);
        assert_eq!(store.count("policy_docs").await.unwrap(), 1);
    }
}
