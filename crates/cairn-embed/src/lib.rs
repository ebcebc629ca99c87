//! Text embedding providers for Cairn.
//!
//! Embeddings back the semantic side of the memory store: every record's text
//! is embedded once when it is written, and queries are embedded with the same
//! provider at search time.
//!
//! # Providers
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  Embedder trait                         │
//! │  - embed() -> Vec<f32>                  │
//! │  - embed_batch() -> Vec<Vec<f32>>       │
//! └─────────────────────────────────────────┘
//!                    │
//!     ┌──────────────┼──────────────┐
//!     ▼              ▼              ▼
//! ┌────────┐   ┌──────────┐   ┌────────┐
//! │  Hash  │   │  OpenAI  │   │  Mock  │
//! └────────┘   └──────────┘   └────────┘
//! ```
//!
//! The hash embedder is the offline default: it needs no model files and no
//! network, which matters because the embedder runs inside hook processes that
//! must finish quickly.

pub mod embeddings;
pub mod error;

pub use embeddings::{
    Embedder, EmbedderSpec, HashEmbedder, MockEmbedder, OpenAiEmbedder, OpenAiEmbedderConfig,
    SharedEmbedder, build_embedder, cosine_similarity, l2_normalize,
};
pub use error::{EmbedError, Result};

#[cfg(any(test, feature = "testing"))]
pub use embeddings::UnavailableEmbedder;
