//! Session memory for Cairn.
//!
//! This crate stores the records an assistant session produces (user turns,
//! assistant turns, tool uses, and extracted knowledge), deduplicates them by
//! content, scores their usefulness, and hands them back either as a
//! token-budgeted context bundle or through semantic search.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  MemoryContext (one per process)                                        │
//! │  ┌──────────────────────┐   ┌────────────────────┐                      │
//! │  │ ConversationManager  │   │ KnowledgeManager   │  typed add_* calls   │
//! │  └──────────┬───────────┘   └─────────┬──────────┘                      │
//! │             └───────────┬─────────────┘                                 │
//! │                    Recorder  (validate → render → score)                │
//! │             ┌───────────┴─────────────┐                                 │
//! │  ┌──────────▼───────────┐   ┌─────────▼──────────┐                      │
//! │  │ RecordStore          │   │ VectorIndex        │                      │
//! │  │ conversation.jsonl   │   │ vectors.json       │                      │
//! │  │ knowledge.jsonl      │   │ (rebuildable)      │                      │
//! │  └──────────────────────┘   └────────────────────┘                      │
//! │        ▲ packer::assemble         ▲ search::rank                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The record files are the source of truth. The vector index is derived
//! from them and healed by [`MemoryContext::reconcile`] whenever it falls
//! behind (embedder outage, crash before persist, embedder change).
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use cairn_embed::HashEmbedder;
//! use cairn_memory::{ContextOptions, DecisionInput, MemoryContext, Origin, SearchQuery};
//!
//! # async fn demo() -> cairn_memory::Result<()> {
//! let ctx = MemoryContext::open(
//!     ContextOptions::new(".cairn"),
//!     Arc::new(HashEmbedder::default()),
//! )
//! .await?;
//!
//! let origin = Origin::new("session-1", 3).with_topics(["security"]);
//! ctx.add_decision(
//!     DecisionInput::new("Which TLS stack?", "Use rustls", "No system OpenSSL"),
//!     &origin,
//! )
//! .await?;
//!
//! let bundle = ctx.assemble_context(2000, &["security".to_string()], None)?;
//! let hits = ctx.search(&SearchQuery::new("tls").with_limit(5)).await?;
//! # let _ = (bundle, hits);
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod error;
pub mod lock;
pub mod manager;
pub mod packer;
pub mod quality;
pub mod search;
pub mod store;
pub mod types;
pub mod validation;
pub mod vector;

// Re-export error types
pub use error::{MemoryError, Result};

// Re-export the context
pub use context::{
    ContextOptions, ContextRequest, DEFAULT_MAX_TOKENS, KindStats, MemoryContext, StoreStats,
};

// Re-export managers and typed inputs
pub use manager::{
    ArtifactInput, ConventionInput, ConversationManager, DecisionInput, KnowledgeManager,
    LearningInput, MessageInput, Origin, RecordInput, Recorder, ToolUseInput,
};

// Re-export store
pub use store::{NewRecord, RecordFilter, RecordStore};

// Re-export search
pub use search::{SearchMetadata, SearchQuery, SearchResult};

// Re-export packer
pub use packer::{estimate_tokens, render_bundle};

// Re-export vector index
pub use vector::{IndexInconsistency, ReconcileReport, SimilarityResult, VectorIndex};

// Re-export types
pub use types::{Record, RecordId, RecordKind, Section, content_hash, normalize_text};

// Re-export validation
pub use validation::ValidationError;
