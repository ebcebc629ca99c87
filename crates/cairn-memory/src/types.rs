//! Record types.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// Record ID
// ─────────────────────────────────────────────────────────────────────────────

/// Unique identifier for a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub Uuid);

impl RecordId {
    /// Generate a new random ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> std::result::Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Record Kind
// ─────────────────────────────────────────────────────────────────────────────

/// The closed set of record kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// A prompt typed by the user.
    UserMessage,
    /// A response produced by the assistant.
    AssistantMessage,
    /// A tool invocation and its outcome.
    ToolUse,
    /// An architectural or implementation decision.
    Decision,
    /// A coding convention observed in the project.
    Convention,
    /// Something learned while working (a gotcha, a fix, a fact).
    Learning,
    /// A file or other artifact produced during the session.
    Artifact,
}

impl RecordKind {
    /// Every kind, in declaration order.
    pub const ALL: [RecordKind; 7] = [
        Self::UserMessage,
        Self::AssistantMessage,
        Self::ToolUse,
        Self::Decision,
        Self::Convention,
        Self::Learning,
        Self::Artifact,
    ];

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserMessage => "user_message",
            Self::AssistantMessage => "assistant_message",
            Self::ToolUse => "tool_use",
            Self::Decision => "decision",
            Self::Convention => "convention",
            Self::Learning => "learning",
            Self::Artifact => "artifact",
        }
    }

    /// Which store section holds records of this kind.
    pub fn section(&self) -> Section {
        match self {
            Self::UserMessage | Self::AssistantMessage | Self::ToolUse => Section::Conversation,
            Self::Decision | Self::Convention | Self::Learning | Self::Artifact => {
                Section::Knowledge
            }
        }
    }

    /// Knowledge kinds carry a revisable confidence.
    pub fn is_knowledge(&self) -> bool {
        self.section() == Section::Knowledge
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown kind name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown record kind '{0}'")]
pub struct UnknownKind(pub String);

impl FromStr for RecordKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| UnknownKind(s.to_string()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Section
// ─────────────────────────────────────────────────────────────────────────────

/// A logical section of the store, persisted as its own append-only file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    /// User turns, assistant turns and tool uses.
    Conversation,
    /// Decisions, conventions, learnings and artifacts.
    Knowledge,
}

impl Section {
    /// Both sections.
    pub const ALL: [Section; 2] = [Self::Conversation, Self::Knowledge];

    /// File name of this section within the store directory.
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Conversation => "conversation.jsonl",
            Self::Knowledge => "knowledge.jsonl",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Record
// ─────────────────────────────────────────────────────────────────────────────

/// One immutable, content-addressed unit of session memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Unique identifier.
    pub id: RecordId,
    /// SHA-256 of the normalized text; the dedup key within a kind.
    pub content_hash: String,
    /// Full text payload.
    pub text: String,
    /// Record kind.
    pub kind: RecordKind,
    /// Topic tags.
    #[serde(default)]
    pub topics: BTreeSet<String>,
    /// Session this record belongs to.
    pub session_id: String,
    /// Turn within the session.
    pub turn: u32,
    /// Usefulness score, fixed at creation.
    pub quality: f32,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// Epistemic certainty (knowledge kinds only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    /// Agent role the record is attributed to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_role: Option<String>,
}

impl Record {
    /// Estimated token cost of replaying this record.
    pub fn token_cost(&self) -> usize {
        crate::packer::estimate_tokens(&self.text)
    }

    /// Whether the record carries at least one of `topics`.
    ///
    /// An empty filter matches everything.
    pub fn has_any_topic(&self, topics: &[String]) -> bool {
        topics.is_empty() || topics.iter().any(|t| self.topics.contains(t.trim()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Content Addressing
// ─────────────────────────────────────────────────────────────────────────────

/// Normalize text for hashing: trim and collapse whitespace runs.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Content hash of a text, computed over its normalized form.
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(normalize_text(text).as_bytes()))
}

/// Normalize a topic list into a set: trimmed, empties dropped.
pub fn topic_set<I, S>(topics: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    topics
        .into_iter()
        .map(|t| t.as_ref().trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip_names() {
        for kind in RecordKind::ALL {
            assert_eq!(kind.as_str().parse::<RecordKind>().unwrap(), kind);
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
        assert!("summary".parse::<RecordKind>().is_err());
    }

    #[test]
    fn test_kind_sections() {
        assert_eq!(RecordKind::ToolUse.section(), Section::Conversation);
        assert_eq!(RecordKind::Artifact.section(), Section::Knowledge);
        assert!(RecordKind::Convention.is_knowledge());
        assert!(!RecordKind::AssistantMessage.is_knowledge());
    }

    #[test]
    fn test_normalize_collapses_whitespace() {
        assert_eq!(normalize_text("  use   tokio\n\tfor  async "), "use tokio for async");
    }

    #[test]
    fn test_hash_ignores_whitespace_variants() {
        assert_eq!(content_hash("a  b\nc"), content_hash(" a b c "));
        assert_ne!(content_hash("a b c"), content_hash("a b d"));
        assert_eq!(content_hash("x").len(), 64);
    }

    #[test]
    fn test_hash_is_case_sensitive() {
        assert_ne!(content_hash("Use Rust"), content_hash("use rust"));
    }

    #[test]
    fn test_topic_set_dedups_and_trims() {
        let set = topic_set(["security", " security ", "", "perf"]);
        assert_eq!(set.len(), 2);
        assert!(set.contains("security"));
        assert!(set.contains("perf"));
    }

    #[test]
    fn test_record_id_parse() {
        let id = RecordId::new();
        assert_eq!(RecordId::parse(&id.to_string()).unwrap(), id);
        assert!(RecordId::parse("not-a-uuid").is_err());
    }
}
