//! # CorpGuide
//!
//! A retrieval-augmented assistant that answers questions about company
//! policy strictly from a corpus of PDF documents.
//!
//! Documents are split into semantically coherent chunks, embedded, and kept
//! in a persistent vector index. Each question is first rewritten into a
//! standalone form using the conversation so far, then the closest chunks are
//! retrieved and handed to the language model together with instructions to
//! answer only from them.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  PDF files  │──▶│  Processor   │──▶│ Vector index │
//! │   (data/)   │   │ semantic chk │   │  (SQLite)    │
//! └─────────────┘   └──────────────┘   └──────┬───────┘
//!                                             │
//!        question ──▶ reformulate ──▶ retrieve ┘──▶ LLM ──▶ answer + sources
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export GROQ_API_KEY=...
//! corpguide ingest                    # build the index from ./data
//! corpguide ask "How many days of annual leave do I get?"
//! corpguide serve                     # HTTP API + chat page on :8000
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`extract`] | PDF page text extraction |
//! | [`chunk`] | Semantic chunking |
//! | [`processor`] | Directory scanning and per-file processing |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`store`] | Vector storage backends |
//! | [`index`] | Embed-and-search vector index |
//! | [`llm`] | Chat-completions client |
//! | [`prompts`] | Prompt text |
//! | [`reformulate`] | History-aware question rewriting |
//! | [`history`] | Chat history and sessions |
//! | [`pipeline`] | Startup state machine and query orchestration |
//! | [`server`] | HTTP server |
//! | [`ingest`] | Batch index rebuild |

pub mod ask;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod history;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod processor;
pub mod prompts;
pub mod reformulate;
pub mod server;
pub mod status;
pub mod store;
