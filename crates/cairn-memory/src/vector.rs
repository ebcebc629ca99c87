//! Exact nearest-neighbour index over record embeddings.
//!
//! The index is a derived artifact: every vector belongs to a record in the
//! [`RecordStore`](crate::store::RecordStore), and anything missing can be
//! rebuilt by re-embedding. It is persisted as a single JSON document
//! (`vectors.json`) tagged with the embedder name and dimensions that
//! produced it.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cairn_embed::{Embedder, cosine_similarity, l2_normalize};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{MemoryError, Result};
use crate::lock::StoreLock;
use crate::types::{Record, RecordId};
use crate::validation::{ValidationError, validate_embedding};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Index file name within the store directory.
pub const INDEX_FILE: &str = "vectors.json";

/// Current on-disk format version.
const INDEX_VERSION: u32 = 1;

/// Records embedded per backend call during reconciliation.
pub const RECONCILE_BATCH_SIZE: usize = 32;

// ─────────────────────────────────────────────────────────────────────────────
// Results and Diagnostics
// ─────────────────────────────────────────────────────────────────────────────

/// Result of a similarity search.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityResult {
    /// The matching record.
    pub record_id: RecordId,
    /// Cosine similarity (higher is more similar).
    pub similarity: f32,
}

/// Why a persisted index could not be used as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexInconsistency {
    /// No index file exists.
    Missing,
    /// The file exists but could not be read or parsed.
    Corrupt(String),
    /// The file was written by an unknown format version.
    UnsupportedVersion(u32),
    /// The vectors were produced by a different embedder.
    ProviderMismatch { expected: String, found: String },
    /// The vectors have a different dimensionality.
    DimensionMismatch { expected: usize, found: usize },
    /// Records without a vector, or vectors without a record.
    Diverged { missing: usize, orphaned: usize },
}

impl fmt::Display for IndexInconsistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "index file is missing"),
            Self::Corrupt(reason) => write!(f, "index file is corrupt: {reason}"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported index version {v}"),
            Self::ProviderMismatch { expected, found } => {
                write!(f, "index built by '{found}', expected '{expected}'")
            }
            Self::DimensionMismatch { expected, found } => {
                write!(f, "index has {found} dimensions, expected {expected}")
            }
            Self::Diverged { missing, orphaned } => write!(
                f,
                "{missing} records lack a vector and {orphaned} vectors lack a record"
            ),
        }
    }
}

/// Outcome of [`VectorIndex::reconcile`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Vectors (re)computed for records that lacked one.
    pub embedded: usize,
    /// Orphan vectors dropped.
    pub removed: usize,
    /// Records still without a vector (embedder failed part-way).
    pub pending: usize,
    /// Set when the whole index was discarded for a provenance mismatch.
    pub rebuilt: Option<IndexInconsistency>,
    /// Embedder error that stopped reconciliation early.
    pub error: Option<String>,
}

impl ReconcileReport {
    /// Total repairs performed.
    pub fn repairs(&self) -> usize {
        self.embedded + self.removed
    }

    pub(crate) fn log(&self) {
        if self.repairs() > 0 || self.pending > 0 {
            info!(
                embedded = self.embedded,
                removed = self.removed,
                pending = self.pending,
                "Reconciled vector index"
            );
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// On-disk Format
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    provider: String,
    dimensions: usize,
    entries: Vec<IndexEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexEntry {
    record_id: RecordId,
    vector: Vec<f32>,
}

fn read_index_file(path: &Path) -> std::result::Result<IndexFile, IndexInconsistency> {
    let contents = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(IndexInconsistency::Missing);
        }
        Err(e) => return Err(IndexInconsistency::Corrupt(e.to_string())),
    };
    let file: IndexFile = serde_json::from_slice(&contents)
        .map_err(|e| IndexInconsistency::Corrupt(e.to_string()))?;
    if file.version != INDEX_VERSION {
        return Err(IndexInconsistency::UnsupportedVersion(file.version));
    }
    Ok(file)
}

// ─────────────────────────────────────────────────────────────────────────────
// Vector Index
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory vector index with exact cosine search.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    dimensions: usize,
    provider: String,
    entries: HashMap<RecordId, Vec<f32>>,
    /// Ids removed since the last persist, so a merge does not resurrect them.
    removed: HashSet<RecordId>,
    dirty: bool,
}

impl VectorIndex {
    /// Create an empty index for vectors from `provider`.
    pub fn new(dimensions: usize, provider: impl Into<String>) -> Self {
        Self {
            dimensions,
            provider: provider.into(),
            entries: HashMap::new(),
            removed: HashSet::new(),
            dirty: false,
        }
    }

    /// Path of the index file in a store directory.
    pub fn file_path(dir: &Path) -> PathBuf {
        dir.join(INDEX_FILE)
    }

    /// Load the persisted index, falling back to an empty one.
    ///
    /// The second value explains why the file was not used; the caller heals
    /// it with [`reconcile`](Self::reconcile).
    pub fn load(
        dir: &Path,
        dimensions: usize,
        provider: &str,
    ) -> (Self, Option<IndexInconsistency>) {
        let mut index = Self::new(dimensions, provider);
        let file = match read_index_file(&Self::file_path(dir)) {
            Ok(file) => file,
            Err(reason) => {
                if reason != IndexInconsistency::Missing {
                    warn!(%reason, "Discarding persisted vector index");
                }
                return (index, Some(reason));
            }
        };

        if file.provider != provider {
            let reason = IndexInconsistency::ProviderMismatch {
                expected: provider.to_string(),
                found: file.provider,
            };
            warn!(%reason, "Discarding persisted vector index");
            return (index, Some(reason));
        }
        if file.dimensions != dimensions {
            let reason = IndexInconsistency::DimensionMismatch {
                expected: dimensions,
                found: file.dimensions,
            };
            warn!(%reason, "Discarding persisted vector index");
            return (index, Some(reason));
        }

        let mut invalid = 0usize;
        for entry in file.entries {
            if index.insert_vector(entry.record_id, entry.vector).is_err() {
                invalid += 1;
            }
        }
        if invalid > 0 {
            warn!(invalid, "Dropped invalid vectors from persisted index");
        }
        index.dirty = invalid > 0;

        debug!(vectors = index.len(), "Loaded vector index");
        (index, None)
    }

    /// Vector dimensionality.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Name of the embedder that produced these vectors.
    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.entries.contains_key(id)
    }

    /// Whether there are changes not yet persisted.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Add or replace the vector for a record.
    pub fn add(
        &mut self,
        id: RecordId,
        vector: Vec<f32>,
    ) -> std::result::Result<(), ValidationError> {
        self.insert_vector(id, vector)?;
        self.removed.remove(&id);
        self.dirty = true;
        Ok(())
    }

    fn insert_vector(
        &mut self,
        id: RecordId,
        mut vector: Vec<f32>,
    ) -> std::result::Result<(), ValidationError> {
        validate_embedding(&vector, self.dimensions)?;
        l2_normalize(&mut vector);
        self.entries.insert(id, vector);
        Ok(())
    }

    /// Remove a record's vector.
    pub fn remove(&mut self, id: &RecordId) -> bool {
        let existed = self.entries.remove(id).is_some();
        if existed {
            self.removed.insert(*id);
            self.dirty = true;
        }
        existed
    }

    /// Exact k-nearest-neighbour search.
    ///
    /// `filter` restricts the candidate set before ranking. Results are sorted
    /// by similarity descending, ties by record id.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&dyn Fn(&RecordId) -> bool>,
    ) -> Vec<SimilarityResult> {
        if k == 0 || query.len() != self.dimensions {
            return Vec::new();
        }

        let mut results: Vec<SimilarityResult> = self
            .entries
            .iter()
            .filter(|(id, _)| filter.is_none_or(|f| f(*id)))
            .map(|(id, vector)| SimilarityResult {
                record_id: *id,
                similarity: cosine_similarity(query, vector),
            })
            .collect();

        results.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.record_id.cmp(&b.record_id))
        });
        results.truncate(k);
        results
    }

    /// Compare the index against the record store without changing it.
    pub fn check(&self, records: &[Record]) -> Option<IndexInconsistency> {
        let live: HashSet<RecordId> = records.iter().map(|r| r.id).collect();
        let missing = live.iter().filter(|id| !self.contains(id)).count();
        let orphaned = self.entries.keys().filter(|id| !live.contains(id)).count();
        (missing > 0 || orphaned > 0).then_some(IndexInconsistency::Diverged { missing, orphaned })
    }

    /// Bring the index in line with the record store.
    ///
    /// Drops vectors whose record no longer exists and embeds every record
    /// that lacks a vector, oldest first. If `embedder` is not the one this
    /// index was built with, everything is discarded and re-embedded. An
    /// embedder failure stops the pass and is reported, not raised: the
    /// remaining records are left for the next reconcile.
    pub async fn reconcile(
        &mut self,
        records: &[Record],
        embedder: &dyn Embedder,
    ) -> ReconcileReport {
        let mut report = self.prepare(records, embedder);

        let missing = self.missing(records);
        for batch in missing.chunks(RECONCILE_BATCH_SIZE) {
            let texts: Vec<&str> = batch.iter().map(|r| r.text.as_str()).collect();
            match embedder.embed_batch(&texts).await {
                Ok(vectors) => report.embedded += self.add_batch(batch, vectors),
                Err(e) => {
                    warn!(error = %e, "Embedding failed during reconcile, will retry next time");
                    report.error = Some(e.to_string());
                    break;
                }
            }
        }
        report.pending = missing.len() - report.embedded;

        report.log();
        report
    }

    /// The synchronous half of [`reconcile`](Self::reconcile): rebuild on a
    /// provenance mismatch and drop orphan vectors. Embeds nothing.
    pub fn prepare(&mut self, records: &[Record], embedder: &dyn Embedder) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        if embedder.name() != self.provider {
            report.rebuilt = Some(IndexInconsistency::ProviderMismatch {
                expected: embedder.name().to_string(),
                found: self.provider.clone(),
            });
        } else if embedder.dimensions() != self.dimensions {
            report.rebuilt = Some(IndexInconsistency::DimensionMismatch {
                expected: embedder.dimensions(),
                found: self.dimensions,
            });
        }
        if let Some(reason) = &report.rebuilt {
            warn!(%reason, "Rebuilding vector index");
            report.removed = self.entries.len();
            *self = Self::new(embedder.dimensions(), embedder.name());
            self.dirty = true;
        }

        let live: HashSet<RecordId> = records.iter().map(|r| r.id).collect();
        let orphans: Vec<RecordId> = self
            .entries
            .keys()
            .filter(|id| !live.contains(id))
            .copied()
            .collect();
        for id in &orphans {
            self.remove(id);
        }
        report.removed += orphans.len();
        report
    }

    /// Records without a vector, oldest first.
    pub fn missing<'r>(&self, records: &'r [Record]) -> Vec<&'r Record> {
        let mut missing: Vec<&Record> = records.iter().filter(|r| !self.contains(&r.id)).collect();
        missing.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        missing
    }

    /// Add the vectors embedded for `batch`, in order. Returns how many were
    /// accepted; records left without a usable vector stay missing.
    pub fn add_batch(&mut self, batch: &[&Record], vectors: Vec<Vec<f32>>) -> usize {
        if vectors.len() != batch.len() {
            warn!(
                expected = batch.len(),
                returned = vectors.len(),
                "Embedder returned the wrong number of vectors"
            );
        }

        let mut added = 0;
        for (record, vector) in batch.iter().zip(vectors) {
            match self.add(record.id, vector) {
                Ok(()) => added += 1,
                Err(e) => {
                    warn!(id = %record.id, error = %e, "Embedder returned an unusable vector");
                }
            }
        }
        added
    }

    /// Persist the index to `dir`, merging with whatever is on disk.
    ///
    /// Holds the store lock for the read-merge-write so concurrent processes
    /// never drop each other's vectors. The file is replaced atomically via
    /// rename.
    pub fn persist(&mut self, dir: &Path, lock_timeout: Duration) -> Result<()> {
        let _lock = StoreLock::acquire(dir, lock_timeout)?;
        let path = Self::file_path(dir);

        if let Ok(disk) = read_index_file(&path)
            && disk.provider == self.provider
            && disk.dimensions == self.dimensions
        {
            let mut merged = 0usize;
            for entry in disk.entries {
                if self.entries.contains_key(&entry.record_id)
                    || self.removed.contains(&entry.record_id)
                {
                    continue;
                }
                if self.insert_vector(entry.record_id, entry.vector).is_ok() {
                    merged += 1;
                }
            }
            if merged > 0 {
                debug!(merged, "Merged vectors written by another process");
            }
        }

        let mut entries: Vec<IndexEntry> = self
            .entries
            .iter()
            .map(|(id, vector)| IndexEntry {
                record_id: *id,
                vector: vector.clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.record_id.cmp(&b.record_id));
        let file = IndexFile {
            version: INDEX_VERSION,
            provider: self.provider.clone(),
            dimensions: self.dimensions,
            entries,
        };

        let bytes = serde_json::to_vec(&file)?;
        let tmp = path.with_extension("json.tmp");
        let write_tmp = || -> std::io::Result<()> {
            let mut f = std::fs::File::create(&tmp)?;
            f.write_all(&bytes)?;
            f.sync_all()
        };
        write_tmp().map_err(MemoryError::storage(&tmp))?;
        std::fs::rename(&tmp, &path).map_err(MemoryError::storage(&path))?;

        self.removed.clear();
        self.dirty = false;
        debug!(vectors = self.len(), path = %path.display(), "Persisted vector index");
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RecordKind, content_hash};
    use cairn_embed::{MockEmbedder, UnavailableEmbedder};
    use chrono::Utc;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    const TIMEOUT: Duration = Duration::from_secs(2);

    fn record(text: &str) -> Record {
        Record {
            id: RecordId::new(),
            content_hash: content_hash(text),
            text: text.to_string(),
            kind: RecordKind::Learning,
            topics: BTreeSet::new(),
            session_id: "s".to_string(),
            turn: 0,
            quality: 0.5,
            created_at: Utc::now(),
            confidence: None,
            agent_role: None,
        }
    }

    #[test]
    fn test_search_orders_by_similarity() {
        let mut index = VectorIndex::new(3, "test");
        let a = RecordId::new();
        let b = RecordId::new();
        let c = RecordId::new();
        index.add(a, vec![1.0, 0.0, 0.0]).unwrap();
        index.add(b, vec![0.7, 0.7, 0.0]).unwrap();
        index.add(c, vec![0.0, 0.0, 1.0]).unwrap();

        let results = index.search(&[1.0, 0.0, 0.0], 2, None);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].record_id, a);
        assert_eq!(results[1].record_id, b);
        assert!((results[0].similarity - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_search_filter_applies_before_ranking() {
        let mut index = VectorIndex::new(2, "test");
        let best = RecordId::new();
        let other = RecordId::new();
        index.add(best, vec![1.0, 0.0]).unwrap();
        index.add(other, vec![0.0, 1.0]).unwrap();

        let only_other: &dyn Fn(&RecordId) -> bool = &|id| *id == other;
        let results = index.search(&[1.0, 0.0], 1, Some(only_other));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].record_id, other);
    }

    #[test]
    fn test_add_rejects_bad_vectors() {
        let mut index = VectorIndex::new(3, "test");
        assert!(index.add(RecordId::new(), vec![1.0, 2.0]).is_err());
        assert!(index.add(RecordId::new(), vec![f32::NAN, 0.0, 0.0]).is_err());
        assert!(index.is_empty());
    }

    #[test]
    fn test_search_wrong_query_dimensions() {
        let mut index = VectorIndex::new(3, "test");
        index.add(RecordId::new(), vec![1.0, 0.0, 0.0]).unwrap();
        assert!(index.search(&[1.0, 0.0], 5, None).is_empty());
        assert!(index.search(&[1.0, 0.0, 0.0], 0, None).is_empty());
    }

    #[test]
    fn test_persist_and_load() {
        let dir = TempDir::new().unwrap();
        let mut index = VectorIndex::new(2, "mock");
        let id = RecordId::new();
        index.add(id, vec![3.0, 4.0]).unwrap();
        index.persist(dir.path(), TIMEOUT).unwrap();
        assert!(!index.is_dirty());

        let (loaded, problem) = VectorIndex::load(dir.path(), 2, "mock");
        assert!(problem.is_none());
        assert!(loaded.contains(&id));
        // Stored normalized
        let results = loaded.search(&[0.6, 0.8], 1, None);
        assert!((results[0].similarity - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_load_reports_inconsistencies() {
        let dir = TempDir::new().unwrap();
        let (_, problem) = VectorIndex::load(dir.path(), 2, "mock");
        assert_eq!(problem, Some(IndexInconsistency::Missing));

        let mut index = VectorIndex::new(2, "mock");
        index.add(RecordId::new(), vec![1.0, 0.0]).unwrap();
        index.persist(dir.path(), TIMEOUT).unwrap();

        let (loaded, problem) = VectorIndex::load(dir.path(), 3, "mock");
        assert!(matches!(
            problem,
            Some(IndexInconsistency::DimensionMismatch { expected: 3, found: 2 })
        ));
        assert!(loaded.is_empty());

        let (_, problem) = VectorIndex::load(dir.path(), 2, "openai");
        assert!(matches!(
            problem,
            Some(IndexInconsistency::ProviderMismatch { .. })
        ));

        std::fs::write(VectorIndex::file_path(dir.path()), "{ truncated").unwrap();
        let (_, problem) = VectorIndex::load(dir.path(), 2, "mock");
        assert!(matches!(problem, Some(IndexInconsistency::Corrupt(_))));
    }

    #[test]
    fn test_persist_merges_concurrent_writers() {
        let dir = TempDir::new().unwrap();
        let a_id = RecordId::new();
        let b_id = RecordId::new();

        // Two processes load the same (empty) index, each adds one vector
        let mut a = VectorIndex::new(2, "mock");
        let mut b = VectorIndex::new(2, "mock");
        a.add(a_id, vec![1.0, 0.0]).unwrap();
        b.add(b_id, vec![0.0, 1.0]).unwrap();
        a.persist(dir.path(), TIMEOUT).unwrap();
        b.persist(dir.path(), TIMEOUT).unwrap();

        let (loaded, _) = VectorIndex::load(dir.path(), 2, "mock");
        assert!(loaded.contains(&a_id));
        assert!(loaded.contains(&b_id));
    }

    #[test]
    fn test_removed_vectors_are_not_resurrected_by_merge() {
        let dir = TempDir::new().unwrap();
        let id = RecordId::new();
        let mut index = VectorIndex::new(2, "mock");
        index.add(id, vec![1.0, 0.0]).unwrap();
        index.persist(dir.path(), TIMEOUT).unwrap();

        index.remove(&id);
        index.persist(dir.path(), TIMEOUT).unwrap();

        let (loaded, _) = VectorIndex::load(dir.path(), 2, "mock");
        assert!(!loaded.contains(&id));
    }

    #[tokio::test]
    async fn test_reconcile_embeds_missing_and_drops_orphans() {
        let embedder = MockEmbedder::new(8);
        let records: Vec<Record> = (0..40).map(|i| record(&format!("note {i}"))).collect();

        let mut index = VectorIndex::new(8, "mock");
        let orphan = RecordId::new();
        index.add(orphan, vec![1.0; 8]).unwrap();

        let report = index.reconcile(&records, &embedder).await;
        assert_eq!(report.embedded, 40);
        assert_eq!(report.removed, 1);
        assert_eq!(report.pending, 0);
        assert_eq!(report.repairs(), 41);
        assert!(!index.contains(&orphan));
        assert_eq!(index.len(), 40);

        // Second pass is a no-op
        let again = index.reconcile(&records, &embedder).await;
        assert_eq!(again.repairs(), 0);
    }

    #[tokio::test]
    async fn test_check_reports_divergence() {
        let records = vec![record("alpha"), record("beta")];
        let mut index = VectorIndex::new(8, "mock");
        index.add(records[0].id, vec![1.0; 8]).unwrap();
        index.add(RecordId::new(), vec![1.0; 8]).unwrap();

        assert_eq!(
            index.check(&records),
            Some(IndexInconsistency::Diverged {
                missing: 1,
                orphaned: 1
            })
        );

        index.reconcile(&records, &MockEmbedder::new(8)).await;
        assert_eq!(index.check(&records), None);
    }

    #[tokio::test]
    async fn test_reconcile_rebuilds_on_provider_change() {
        let records = vec![record("alpha"), record("beta")];
        let mut index = VectorIndex::new(4, "other");
        index.add(records[0].id, vec![1.0, 0.0, 0.0, 0.0]).unwrap();

        let embedder = MockEmbedder::new(8);
        let report = index.reconcile(&records, &embedder).await;
        assert!(report.rebuilt.is_some());
        assert_eq!(report.embedded, 2);
        assert_eq!(index.provider(), "mock");
        assert_eq!(index.dimensions(), 8);
    }

    #[tokio::test]
    async fn test_reconcile_with_unavailable_embedder() {
        let records = vec![record("alpha"), record("beta")];
        let embedder = UnavailableEmbedder::new(8);
        let mut index = VectorIndex::new(8, embedder.name());

        let report = index.reconcile(&records, &embedder).await;
        assert_eq!(report.embedded, 0);
        assert_eq!(report.pending, 2);
        assert!(report.error.is_some());
        assert!(index.is_empty());
    }

    /// Answers every batch with one vector too few.
    struct ShortEmbedder;

    #[async_trait::async_trait]
    impl Embedder for ShortEmbedder {
        async fn embed(&self, _text: &str) -> cairn_embed::Result<Vec<f32>> {
            Ok(vec![1.0; 8])
        }

        async fn embed_batch(&self, texts: &[&str]) -> cairn_embed::Result<Vec<Vec<f32>>> {
            Ok(vec![vec![1.0; 8]; texts.len().saturating_sub(1)])
        }

        fn dimensions(&self) -> usize {
            8
        }

        fn name(&self) -> &str {
            "short"
        }
    }

    #[tokio::test]
    async fn test_short_batch_counts_as_pending() {
        let records = vec![record("alpha"), record("beta"), record("gamma")];
        let mut index = VectorIndex::new(8, "short");

        let report = index.reconcile(&records, &ShortEmbedder).await;
        assert_eq!(report.embedded, 2);
        assert_eq!(report.pending, 1);
        assert_eq!(index.len(), 2);
        assert_eq!(
            index.check(&records),
            Some(IndexInconsistency::Diverged {
                missing: 1,
                orphaned: 0
            })
        );
    }
}
