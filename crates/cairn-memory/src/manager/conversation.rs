//! Conversation records: user turns, assistant turns and tool uses.

use crate::error::Result;
use crate::store::RecordFilter;
use crate::types::{Record, RecordKind};

use super::{MessageInput, Origin, RecordInput, Recorder, ToolUseInput};

/// Kinds stored in the conversation section.
const CONVERSATION_KINDS: [RecordKind; 3] = [
    RecordKind::UserMessage,
    RecordKind::AssistantMessage,
    RecordKind::ToolUse,
];

/// Adds and reads conversation records.
pub struct ConversationManager<'a> {
    recorder: &'a Recorder,
}

impl<'a> ConversationManager<'a> {
    pub fn new(recorder: &'a Recorder) -> Self {
        Self { recorder }
    }

    /// Record a prompt typed by the user.
    pub async fn add_user_message(&self, text: impl Into<String>, origin: &Origin) -> Result<Record> {
        let input = RecordInput::UserMessage(MessageInput { text: text.into() });
        self.recorder.record(input, origin).await
    }

    /// Record an assistant response.
    pub async fn add_assistant_message(
        &self,
        text: impl Into<String>,
        origin: &Origin,
    ) -> Result<Record> {
        let input = RecordInput::AssistantMessage(MessageInput { text: text.into() });
        self.recorder.record(input, origin).await
    }

    /// Record a tool invocation and its outcome.
    pub async fn add_tool_use(&self, tool_use: ToolUseInput, origin: &Origin) -> Result<Record> {
        self.recorder.record(RecordInput::ToolUse(tool_use), origin).await
    }

    /// Conversation records of one session, in insertion order.
    pub fn history(&self, session_id: &str) -> Result<Vec<Record>> {
        self.recorder.store().list(
            &RecordFilter::new()
                .with_kinds(CONVERSATION_KINDS)
                .with_session(session_id),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DEFAULT_LOCK_TIMEOUT, RecordStore};
    use crate::vector::VectorIndex;
    use cairn_embed::{MockEmbedder, SharedEmbedder, UnavailableEmbedder};
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn recorder(dir: &TempDir, embedder: SharedEmbedder) -> Recorder {
        let store = RecordStore::open(dir.path(), DEFAULT_LOCK_TIMEOUT).unwrap();
        let index = VectorIndex::new(embedder.dimensions(), embedder.name());
        Recorder::new(store, index, embedder, 1)
    }

    #[tokio::test]
    async fn test_messages_and_history() {
        let dir = TempDir::new().unwrap();
        let recorder = recorder(&dir, Arc::new(MockEmbedder::new(16)));
        let manager = ConversationManager::new(&recorder);
        let origin = Origin::new("sess-1", 1);

        let user = manager
            .add_user_message("How do I run tests?", &origin)
            .await
            .unwrap();
        let reply = manager
            .add_assistant_message("Use cargo test.", &Origin::new("sess-1", 2))
            .await
            .unwrap();
        manager
            .add_user_message("unrelated", &Origin::new("sess-2", 1))
            .await
            .unwrap();

        assert_eq!(user.kind, RecordKind::UserMessage);
        assert_eq!(user.confidence, None);
        assert_eq!(reply.turn, 2);

        let history = manager.history("sess-1").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, user.id);

        assert!(recorder.index().lock().contains(&user.id));
        // Flushed after every insert
        assert!(dir.path().join("vectors.json").exists());
    }

    #[tokio::test]
    async fn test_tool_use_failure_scores_higher() {
        let dir = TempDir::new().unwrap();
        let recorder = recorder(&dir, Arc::new(MockEmbedder::new(16)));
        let manager = ConversationManager::new(&recorder);
        let origin = Origin::new("sess-1", 4);

        let ok = manager
            .add_tool_use(ToolUseInput::new("Bash", json!({"command": "make"})), &origin)
            .await
            .unwrap();
        let failed = manager
            .add_tool_use(
                ToolUseInput::new("Bash", json!({"command": "make"})).failed("exit 2"),
                &origin,
            )
            .await
            .unwrap();
        assert!(failed.quality > ok.quality);
    }

    #[tokio::test]
    async fn test_invalid_turn_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let recorder = recorder(&dir, Arc::new(MockEmbedder::new(16)));
        let manager = ConversationManager::new(&recorder);

        let err = manager
            .add_user_message("hello", &Origin::new("sess-1", -1))
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::MemoryError::Validation(_)));
        assert!(!dir.path().join("conversation.jsonl").exists());
    }

    #[tokio::test]
    async fn test_store_succeeds_without_embedder() {
        let dir = TempDir::new().unwrap();
        let recorder = recorder(&dir, Arc::new(UnavailableEmbedder::new(16)));
        let manager = ConversationManager::new(&recorder);

        let record = manager
            .add_user_message("still saved", &Origin::new("sess-1", 0))
            .await
            .unwrap();
        assert_eq!(recorder.store().get(&record.id).unwrap().text, "still saved");
        assert!(recorder.index().lock().is_empty());
    }
}
