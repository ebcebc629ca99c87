//! Semantic search over stored records.
//!
//! A query is embedded with the same embedder that indexed the records, the
//! vector index is searched over the filtered candidate set, and hits are
//! joined back to their records.

use std::collections::{BTreeSet, HashMap};

use cairn_embed::Embedder;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::error::{MemoryError, Result};
use crate::store::{RecordFilter, RecordStore};
use crate::types::{Record, RecordId, RecordKind};
use crate::validation::validate_required;
use crate::vector::VectorIndex;

/// Default number of results.
pub const DEFAULT_SEARCH_LIMIT: usize = 10;

// ─────────────────────────────────────────────────────────────────────────────
// Query
// ─────────────────────────────────────────────────────────────────────────────

/// Parameters for a semantic search.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    /// Free-text query.
    pub text: String,
    /// Maximum number of results.
    pub limit: usize,
    /// Kind filters (empty = all kinds).
    pub kinds: Vec<RecordKind>,
    /// Restrict to one session.
    pub session_id: Option<String>,
    /// Drop results below this similarity.
    pub min_similarity: Option<f32>,
}

impl SearchQuery {
    /// Create a query with the default limit and no filters.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            limit: DEFAULT_SEARCH_LIMIT,
            kinds: Vec::new(),
            session_id: None,
            min_similarity: None,
        }
    }

    /// Set the maximum number of results.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Add a kind filter.
    pub fn with_kind(mut self, kind: RecordKind) -> Self {
        self.kinds.push(kind);
        self
    }

    /// Filter results to a specific session.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Set the minimum similarity threshold.
    pub fn with_min_similarity(mut self, min: f32) -> Self {
        self.min_similarity = Some(min);
        self
    }

    fn record_filter(&self) -> RecordFilter {
        RecordFilter {
            kinds: self.kinds.clone(),
            session_id: self.session_id.clone(),
            topics: Vec::new(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Results
// ─────────────────────────────────────────────────────────────────────────────

/// Record fields returned alongside a hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchMetadata {
    pub session_id: String,
    pub turn: u32,
    pub topics: BTreeSet<String>,
    pub quality: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    pub created_at: DateTime<Utc>,
}

/// One search hit. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub text: String,
    pub kind: RecordKind,
    pub similarity: f32,
    pub record_id: RecordId,
    pub metadata: SearchMetadata,
}

impl SearchResult {
    fn from_record(record: Record, similarity: f32) -> Self {
        Self {
            text: record.text,
            kind: record.kind,
            similarity,
            record_id: record.id,
            metadata: SearchMetadata {
                session_id: record.session_id,
                turn: record.turn,
                topics: record.topics,
                quality: record.quality,
                confidence: record.confidence,
                created_at: record.created_at,
            },
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

/// Embed a query text.
///
/// Any backend failure surfaces as [`MemoryError::EmbeddingUnavailable`].
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    validate_required("query", text)?;
    embedder
        .embed(text)
        .await
        .map_err(|e| MemoryError::EmbeddingUnavailable(e.to_string()))
}

/// Rank stored records against an already-embedded query.
///
/// Results are sorted by similarity descending, then newest first, and
/// truncated to `query.limit`.
pub fn rank(
    store: &RecordStore,
    index: &VectorIndex,
    query_vector: &[f32],
    query: &SearchQuery,
) -> Result<Vec<SearchResult>> {
    if query.limit == 0 {
        return Ok(Vec::new());
    }

    let candidates: HashMap<RecordId, Record> = store
        .list(&query.record_filter())?
        .into_iter()
        .map(|r| (r.id, r))
        .collect();
    let in_scope: &dyn Fn(&RecordId) -> bool = &|id| candidates.contains_key(id);
    let hits = index.search(query_vector, candidates.len(), Some(in_scope));

    let mut results: Vec<SearchResult> = hits
        .into_iter()
        .filter(|hit| query.min_similarity.is_none_or(|min| hit.similarity >= min))
        .filter_map(|hit| {
            candidates
                .get(&hit.record_id)
                .map(|r| SearchResult::from_record(r.clone(), hit.similarity))
        })
        .collect();

    results.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then_with(|| b.metadata.created_at.cmp(&a.metadata.created_at))
    });
    results.truncate(query.limit);

    debug!(
        query_len = query.text.len(),
        candidates = candidates.len(),
        results = results.len(),
        "Ranked search results"
    );
    Ok(results)
}
