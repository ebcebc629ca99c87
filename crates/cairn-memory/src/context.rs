//! The per-process memory context.
//!
//! [`MemoryContext`] owns the record store, the vector index and the embedder
//! for one process. It is built once at startup and passed to whatever needs
//! it; there is no global instance.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use cairn_embed::SharedEmbedder;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{MemoryError, Result};
use crate::manager::{
    ArtifactInput, ConventionInput, ConversationManager, DecisionInput, KnowledgeManager,
    LearningInput, Origin, RecordInput, Recorder, ToolUseInput,
};
use crate::packer;
use crate::search::{self, SearchQuery, SearchResult};
use crate::store::{DEFAULT_LOCK_TIMEOUT, RecordFilter, RecordStore};
use crate::types::{Record, RecordId, RecordKind};
use crate::vector::{IndexInconsistency, RECONCILE_BATCH_SIZE, ReconcileReport, VectorIndex};

/// Token budget used when a request doesn't give one.
pub const DEFAULT_MAX_TOKENS: usize = 4000;

// ─────────────────────────────────────────────────────────────────────────────
// Options
// ─────────────────────────────────────────────────────────────────────────────

/// How a [`MemoryContext`] is opened.
#[derive(Debug, Clone)]
pub struct ContextOptions {
    pub store_dir: PathBuf,
    pub lock_timeout: Duration,
    /// Lock waits never run past this instant.
    pub lock_deadline: Option<Instant>,
    /// Persist the vector index after this many new vectors (0 = explicit
    /// flush only).
    pub index_flush_every: usize,
    pub default_max_tokens: usize,
    pub min_quality: Option<f32>,
}

impl ContextOptions {
    pub fn new(store_dir: impl Into<PathBuf>) -> Self {
        Self {
            store_dir: store_dir.into(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            lock_deadline: None,
            index_flush_every: 1,
            default_max_tokens: DEFAULT_MAX_TOKENS,
            min_quality: None,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Cut lock waits short at `deadline`, for callers running under a
    /// time limit of their own.
    pub fn with_lock_deadline(mut self, deadline: Instant) -> Self {
        self.lock_deadline = Some(deadline);
        self
    }

    pub fn with_index_flush_every(mut self, every: usize) -> Self {
        self.index_flush_every = every;
        self
    }

    pub fn with_default_max_tokens(mut self, max_tokens: usize) -> Self {
        self.default_max_tokens = max_tokens;
        self
    }

    pub fn with_min_quality(mut self, min_quality: f32) -> Self {
        self.min_quality = Some(min_quality);
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Context Request
// ─────────────────────────────────────────────────────────────────────────────

/// Parameters for assembling a context bundle. Empty filters match all.
#[derive(Debug, Clone, Default)]
pub struct ContextRequest {
    pub max_tokens: Option<usize>,
    pub topics: Vec<String>,
    pub kinds: Vec<RecordKind>,
    pub session_id: Option<String>,
    pub min_quality: Option<f32>,
}

impl ContextRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics = topics.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_kind(mut self, kind: RecordKind) -> Self {
        self.kinds.push(kind);
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_min_quality(mut self, min_quality: f32) -> Self {
        self.min_quality = Some(min_quality);
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stats
// ─────────────────────────────────────────────────────────────────────────────

/// Per-kind totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KindStats {
    pub count: usize,
    pub tokens: usize,
}

/// Store-wide statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub by_kind: BTreeMap<RecordKind, KindStats>,
    pub total_records: usize,
    pub total_tokens: usize,
    /// Records with a vector in the index.
    pub embedded: usize,
    /// Records still waiting for a vector.
    pub pending: usize,
    /// Unparseable lines skipped while reading the store.
    pub skipped_lines: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory Context
// ─────────────────────────────────────────────────────────────────────────────

/// Everything one process needs to read and write session memory.
pub struct MemoryContext {
    recorder: Recorder,
    options: ContextOptions,
    index_problem: Option<IndexInconsistency>,
    startup: ReconcileReport,
}

impl MemoryContext {
    /// Open the store and reconcile the vector index against it.
    ///
    /// Reconciliation problems never fail the open: the store is usable even
    /// when the embedder is down or the index can't be written.
    pub async fn open(options: ContextOptions, embedder: SharedEmbedder) -> Result<Self> {
        let mut ctx = Self::open_without_reconcile(options, embedder)?;
        ctx.startup = match ctx.reconcile().await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "Startup reconcile failed");
                ReconcileReport::default()
            }
        };
        Ok(ctx)
    }

    /// Open without touching the index beyond loading it.
    pub fn open_without_reconcile(options: ContextOptions, embedder: SharedEmbedder) -> Result<Self> {
        let mut store = RecordStore::open(&options.store_dir, options.lock_timeout)?;
        if let Some(deadline) = options.lock_deadline {
            store = store.with_lock_deadline(deadline);
        }
        let (index, problem) =
            VectorIndex::load(&options.store_dir, embedder.dimensions(), embedder.name());
        let index_problem = match problem {
            Some(IndexInconsistency::Missing) if store.is_empty() => None,
            other => other,
        };

        info!(
            store = %options.store_dir.display(),
            records = store.len(),
            vectors = index.len(),
            embedder = embedder.name(),
            "Opened memory context"
        );

        let recorder = Recorder::new(store, index, embedder, options.index_flush_every);
        Ok(Self {
            recorder,
            options,
            index_problem,
            startup: ReconcileReport::default(),
        })
    }

    /// Store directory.
    pub fn store_dir(&self) -> &Path {
        &self.options.store_dir
    }

    pub fn options(&self) -> &ContextOptions {
        &self.options
    }

    pub fn store(&self) -> &RecordStore {
        self.recorder.store()
    }

    /// Result of the reconcile performed by [`open`](Self::open).
    pub fn startup_report(&self) -> &ReconcileReport {
        &self.startup
    }

    pub fn conversation(&self) -> ConversationManager<'_> {
        ConversationManager::new(&self.recorder)
    }

    pub fn knowledge(&self) -> KnowledgeManager<'_> {
        KnowledgeManager::new(&self.recorder)
    }

    // ── Writes ───────────────────────────────────────────────────────────────

    /// Record any kind of input.
    pub async fn record(&self, input: RecordInput, origin: &Origin) -> Result<Record> {
        self.recorder.record(input, origin).await
    }

    pub async fn add_user_message(&self, text: impl Into<String>, origin: &Origin) -> Result<Record> {
        self.conversation().add_user_message(text, origin).await
    }

    pub async fn add_assistant_message(
        &self,
        text: impl Into<String>,
        origin: &Origin,
    ) -> Result<Record> {
        self.conversation().add_assistant_message(text, origin).await
    }

    pub async fn add_tool_use(&self, tool_use: ToolUseInput, origin: &Origin) -> Result<Record> {
        self.conversation().add_tool_use(tool_use, origin).await
    }

    pub async fn add_decision(&self, decision: DecisionInput, origin: &Origin) -> Result<Record> {
        self.knowledge().add_decision(decision, origin).await
    }

    pub async fn add_convention(
        &self,
        convention: ConventionInput,
        origin: &Origin,
    ) -> Result<Record> {
        self.knowledge().add_convention(convention, origin).await
    }

    pub async fn add_learning(&self, learning: LearningInput, origin: &Origin) -> Result<Record> {
        self.knowledge().add_learning(learning, origin).await
    }

    pub async fn add_artifact(&self, artifact: ArtifactInput, origin: &Origin) -> Result<Record> {
        self.knowledge().add_artifact(artifact, origin).await
    }

    /// Add topics to a record (extend-only).
    pub fn annotate_topics<S: AsRef<str>>(&self, id: &RecordId, topics: &[S]) -> Result<Record> {
        self.store().annotate_topics(id, topics)
    }

    /// Revise a knowledge record's confidence.
    pub fn revise_confidence(&self, id: &RecordId, confidence: f32) -> Result<Record> {
        self.store().revise_confidence(id, confidence)
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    /// Semantic search.
    ///
    /// An unavailable embedder degrades to an empty result rather than an
    /// error.
    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>> {
        let vector = match search::embed_query(self.recorder.embedder().as_ref(), &query.text).await
        {
            Ok(v) => v,
            Err(MemoryError::EmbeddingUnavailable(reason)) => {
                warn!(%reason, "Search degraded, embedder unavailable");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };
        let index = self.recorder.index().lock();
        search::rank(self.store(), &index, &vector, query)
    }

    /// Pack the most useful records matching `topics` into `max_tokens`.
    pub fn assemble_context(
        &self,
        max_tokens: usize,
        topics: &[String],
        min_quality: Option<f32>,
    ) -> Result<Vec<Record>> {
        let mut request = ContextRequest::new()
            .with_max_tokens(max_tokens)
            .with_topics(topics.iter().cloned());
        request.min_quality = min_quality;
        self.assemble(&request)
    }

    /// Pack a context bundle for a full request.
    pub fn assemble(&self, request: &ContextRequest) -> Result<Vec<Record>> {
        let filter = RecordFilter {
            kinds: request.kinds.clone(),
            session_id: request.session_id.clone(),
            topics: request.topics.clone(),
        };
        let candidates = self.store().list(&filter)?;
        let max_tokens = request.max_tokens.unwrap_or(self.options.default_max_tokens);
        let min_quality = request.min_quality.or(self.options.min_quality);

        let bundle = packer::assemble(candidates, max_tokens, min_quality);
        info!(
            records = bundle.len(),
            tokens = packer::total_tokens(&bundle),
            max_tokens,
            "Assembled context bundle"
        );
        Ok(bundle)
    }

    /// Counts per kind, token totals and index coverage.
    pub fn get_stats(&self) -> Result<StoreStats> {
        let records = self.store().all_records()?;
        let index = self.recorder.index().lock();

        let mut stats = StoreStats {
            skipped_lines: self.store().skipped_lines(),
            ..StoreStats::default()
        };
        for record in &records {
            let tokens = record.token_cost();
            let entry = stats.by_kind.entry(record.kind).or_default();
            entry.count += 1;
            entry.tokens += tokens;
            stats.total_tokens += tokens;
            if index.contains(&record.id) {
                stats.embedded += 1;
            }
        }
        stats.total_records = records.len();
        stats.pending = stats.total_records - stats.embedded;
        Ok(stats)
    }

    // ── Index Maintenance ────────────────────────────────────────────────────

    /// Report whether the index currently disagrees with the store.
    pub fn check_index(&self) -> Result<()> {
        let records = self.store().all_records()?;
        let problem = self
            .index_problem
            .clone()
            .or_else(|| self.recorder.index().lock().check(&records));
        match problem {
            Some(p) => Err(MemoryError::IndexInconsistency(p)),
            None => Ok(()),
        }
    }

    /// Re-embed records missing from the index, drop orphans, and persist.
    pub async fn reconcile(&mut self) -> Result<ReconcileReport> {
        self.reconcile_limited(usize::MAX).await
    }

    /// Like [`reconcile`](Self::reconcile), embedding at most `max_embeds`
    /// records. The rest are reported as pending.
    ///
    /// The index is persisted after every batch, so a caller cancelled
    /// mid-way (a hook hitting its deadline) keeps the batches it finished
    /// and the next process carries on from there.
    pub async fn reconcile_limited(&mut self, max_embeds: usize) -> Result<ReconcileReport> {
        let records = self.store().all_records()?;
        let embedder = self.recorder.embedder().clone();

        let mut report = self
            .recorder
            .index()
            .lock()
            .prepare(&records, embedder.as_ref());
        // A discarded index file counts as the reason for the rebuild.
        if report.rebuilt.is_none() {
            report.rebuilt = self.index_problem.take();
        } else {
            self.index_problem = None;
        }
        self.recorder.flush()?;

        let missing = self.recorder.index().lock().missing(&records);
        let todo = &missing[..missing.len().min(max_embeds)];
        for batch in todo.chunks(RECONCILE_BATCH_SIZE) {
            let texts: Vec<&str> = batch.iter().map(|r| r.text.as_str()).collect();
            match embedder.embed_batch(&texts).await {
                Ok(vectors) => {
                    report.embedded += self.recorder.index().lock().add_batch(batch, vectors);
                }
                Err(e) => {
                    warn!(error = %e, "Embedding failed during reconcile, will retry next time");
                    report.error = Some(e.to_string());
                    break;
                }
            }
            self.recorder.flush()?;
        }
        report.pending = missing.len() - report.embedded;

        report.log();
        Ok(report)
    }

    /// Persist any unsaved vectors.
    pub fn flush(&self) -> Result<()> {
        self.recorder.flush()
    }
}
