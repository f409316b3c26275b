//! # Document Portal
//!
//! Document analysis, comparison and conversational retrieval over uploaded
//! files.
//!
//! Uploads (PDF, DOCX, TXT, Markdown) flow through one of three pipelines:
//!
//! - **Analyze**: extract text with page markers and ask the chat model for
//!   structured [`models::Metadata`].
//! - **Compare**: extract two documents and ask the chat model for
//!   page-wise [`models::ComparisonRow`]s.
//! - **Chat**: chunk and embed documents into a per-session vector index,
//!   then answer questions with a two-stage retrieval chain.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌──────────────┐
//! │ Uploads  │──▶│  Extract  │──▶│ Chunk+Embed  │──▶ index_base/<session>/
//! └──────────┘   └─────┬─────┘   └──────────────┘          │
//!                      │                                   ▼
//!              ┌───────┴───────┐                   ┌──────────────┐
//!              │Analyze/Compare│                   │ Conversational│
//!              │  (chat model) │                   │     RAG       │
//!              └───────────────┘                   └──────────────┘
//! ```
//!
//! Model clients are built once by [`model_loader::ModelLoader`] and passed
//! to each component as `Arc<dyn ChatModel>` / `Arc<dyn EmbeddingProvider>`.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | YAML configuration parsing |
//! | [`error`] | Error type and context wrapping |
//! | [`models`] | Core data types |
//! | [`extract`] | PDF / DOCX / text extraction |
//! | [`chunk`] | Text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`llm`] | Chat model abstraction |
//! | [`model_loader`] | Credential checks and client construction |
//! | [`prompts`] | Prompt templates |
//! | [`parser`] | JSON output parsing with repair |
//! | [`session`] | Session ids and directory layout |
//! | [`vector_store`] | Persisted vector index and retriever |
//! | [`ingest`] | Upload ingestion pipeline |
//! | [`analyzer`] | Metadata extraction |
//! | [`compare`] | Document comparison |
//! | [`rag`] | Conversational retrieval chain |
//! | [`server`] | HTTP API |

pub mod analyzer;
pub mod chunk;
pub mod compare;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod llm;
pub mod model_loader;
pub mod models;
pub mod parser;
pub mod prompts;
pub mod rag;
pub mod server;
pub mod session;
pub mod vector_store;
