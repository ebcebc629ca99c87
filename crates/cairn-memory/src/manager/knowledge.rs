//! Knowledge records: decisions, conventions, learnings and artifacts.

use crate::error::Result;
use crate::store::RecordFilter;
use crate::types::{Record, RecordId, RecordKind};

use super::{
    ArtifactInput, ConventionInput, DecisionInput, LearningInput, Origin, RecordInput, Recorder,
};

/// Adds, lists and revises knowledge records.
pub struct KnowledgeManager<'a> {
    recorder: &'a Recorder,
}

impl<'a> KnowledgeManager<'a> {
    pub fn new(recorder: &'a Recorder) -> Self {
        Self { recorder }
    }

    pub async fn add_decision(&self, decision: DecisionInput, origin: &Origin) -> Result<Record> {
        self.recorder.record(RecordInput::Decision(decision), origin).await
    }

    pub async fn add_convention(
        &self,
        convention: ConventionInput,
        origin: &Origin,
    ) -> Result<Record> {
        self.recorder.record(RecordInput::Convention(convention), origin).await
    }

    pub async fn add_learning(&self, learning: LearningInput, origin: &Origin) -> Result<Record> {
        self.recorder.record(RecordInput::Learning(learning), origin).await
    }

    pub async fn add_artifact(&self, artifact: ArtifactInput, origin: &Origin) -> Result<Record> {
        self.recorder.record(RecordInput::Artifact(artifact), origin).await
    }

    /// All knowledge records of one kind, in insertion order.
    pub fn list(&self, kind: RecordKind) -> Result<Vec<Record>> {
        self.recorder
            .store()
            .list(&RecordFilter::new().with_kinds([kind]))
    }

    /// Revise the confidence of a knowledge record. Quality is unaffected.
    pub fn revise_confidence(&self, id: &RecordId, confidence: f32) -> Result<Record> {
        self.recorder.store().revise_confidence(id, confidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DEFAULT_LOCK_TIMEOUT, RecordStore};
    use crate::vector::VectorIndex;
    use cairn_embed::{Embedder, MockEmbedder};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn recorder(dir: &TempDir) -> Recorder {
        let store = RecordStore::open(dir.path(), DEFAULT_LOCK_TIMEOUT).unwrap();
        let embedder = Arc::new(MockEmbedder::new(16));
        let index = VectorIndex::new(embedder.dimensions(), embedder.name());
        Recorder::new(store, index, embedder, 0)
    }

    #[tokio::test]
    async fn test_duplicate_convention_counts_once() {
        let dir = TempDir::new().unwrap();
        let recorder = recorder(&dir);
        let manager = KnowledgeManager::new(&recorder);
        let origin = Origin::new("sess-1", 1);

        let first = manager
            .add_convention(ConventionInput::new("Use  anyhow in binaries"), &origin)
            .await
            .unwrap();
        let second = manager
            .add_convention(
                ConventionInput::new("Use anyhow in binaries"),
                &Origin::new("sess-2", 9),
            )
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(manager.list(RecordKind::Convention).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_same_text_different_kinds() {
        let dir = TempDir::new().unwrap();
        let recorder = recorder(&dir);
        let manager = KnowledgeManager::new(&recorder);
        let origin = Origin::new("sess-1", 1);

        let learning = manager
            .add_learning(LearningInput::new("tokio"), &origin)
            .await
            .unwrap();
        let artifact = manager
            .add_artifact(ArtifactInput::new("Cargo.toml", "tokio"), &origin)
            .await
            .unwrap();
        assert_ne!(learning.id, artifact.id);
    }

    #[tokio::test]
    async fn test_decision_with_topics_and_role() {
        let dir = TempDir::new().unwrap();
        let recorder = recorder(&dir);
        let manager = KnowledgeManager::new(&recorder);

        let plain = manager
            .add_decision(
                DecisionInput::new("Queue?", "Use an mpsc channel", "Bounded backpressure"),
                &Origin::new("sess-1", 1),
            )
            .await
            .unwrap();
        let tagged = manager
            .add_decision(
                DecisionInput::new("Cache?", "Use an LRU cache", "Bounded memory")
                    .with_confidence(0.9),
                &Origin::new("sess-1", 1)
                    .with_topics(["performance", "memory"])
                    .with_agent_role("architect"),
            )
            .await
            .unwrap();

        assert!(tagged.quality > plain.quality);
        assert_eq!(tagged.confidence, Some(0.9));
        assert_eq!(tagged.agent_role.as_deref(), Some("architect"));
        assert!(tagged.text.starts_with("Decision: Use an LRU cache"));
    }

    #[tokio::test]
    async fn test_revise_confidence_keeps_quality() {
        let dir = TempDir::new().unwrap();
        let recorder = recorder(&dir);
        let manager = KnowledgeManager::new(&recorder);

        let convention = manager
            .add_convention(
                ConventionInput::new("Tests live next to code"),
                &Origin::new("sess-1", 1),
            )
            .await
            .unwrap();
        let revised = manager.revise_confidence(&convention.id, 0.95).unwrap();
        assert_eq!(revised.confidence, Some(0.95));
        assert_eq!(revised.quality, convention.quality);
    }
}
