//! Typed record constructors.
//!
//! Every kind has its own input struct; [`RecordInput`] is the closed union
//! over all seven. A [`Recorder`] runs the shared pipeline:
//!
//! ```text
//! validate ─▶ render text ─▶ score ─▶ store insert ─▶ embed ─▶ index add
//!                                         (durable)     (best effort)
//! ```
//!
//! [`ConversationManager`] and [`KnowledgeManager`] are the per-section
//! front doors.

mod conversation;
mod knowledge;

pub use conversation::ConversationManager;
pub use knowledge::KnowledgeManager;

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use cairn_embed::SharedEmbedder;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::quality::{self, TOOL_FAILED_MARKER};
use crate::store::{NewRecord, RecordStore};
use crate::types::{Record, RecordKind, topic_set};
use crate::validation::{
    ValidationError, validate_optional, validate_required, validate_session_id, validate_topic,
    validate_turn, validate_unit_score,
};
use crate::vector::VectorIndex;

/// Confidence assigned to knowledge records that don't state one.
pub const DEFAULT_CONFIDENCE: f32 = 0.7;

/// Longest tool input or output kept in a rendered tool-use record.
pub const MAX_TOOL_FIELD_CHARS: usize = 2000;

// ─────────────────────────────────────────────────────────────────────────────
// Origin
// ─────────────────────────────────────────────────────────────────────────────

/// Where a record came from: session, turn, tags and attribution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Origin {
    pub session_id: String,
    /// Signed so that out-of-range values from callers are rejected, not wrapped.
    #[serde(default)]
    pub turn: i64,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub agent_role: Option<String>,
}

impl Origin {
    pub fn new(session_id: impl Into<String>, turn: i64) -> Self {
        Self {
            session_id: session_id.into(),
            turn,
            topics: Vec::new(),
            agent_role: None,
        }
    }

    pub fn with_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics = topics.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_agent_role(mut self, role: impl Into<String>) -> Self {
        self.agent_role = Some(role.into());
        self
    }

    /// Validate and return the narrowed turn.
    fn validate(&self) -> std::result::Result<u32, ValidationError> {
        validate_session_id(&self.session_id)?;
        let turn = validate_turn(self.turn)?;
        for topic in &self.topics {
            validate_topic(topic)?;
        }
        validate_optional("agent_role", self.agent_role.as_deref())?;
        Ok(turn)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Typed Inputs
// ─────────────────────────────────────────────────────────────────────────────

/// A user or assistant turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageInput {
    pub text: String,
}

/// One tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolUseInput {
    pub tool_name: String,
    #[serde(default)]
    pub input: serde_json::Value,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

fn default_true() -> bool {
    true
}

impl ToolUseInput {
    pub fn new(tool_name: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            input,
            output: None,
            success: true,
            error: None,
        }
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    /// Mark the invocation failed with an error message.
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }

    fn is_failure(&self) -> bool {
        !self.success || self.error.is_some()
    }
}

/// An architectural or implementation decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionInput {
    pub question: String,
    pub decision: String,
    pub rationale: String,
    #[serde(default)]
    pub alternatives: Vec<String>,
    #[serde(default)]
    pub confidence: Option<f32>,
}

impl DecisionInput {
    pub fn new(
        question: impl Into<String>,
        decision: impl Into<String>,
        rationale: impl Into<String>,
    ) -> Self {
        Self {
            question: question.into(),
            decision: decision.into(),
            rationale: rationale.into(),
            alternatives: Vec::new(),
            confidence: None,
        }
    }

    pub fn with_alternatives<I, S>(mut self, alternatives: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.alternatives = alternatives.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// A coding convention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConventionInput {
    pub rule: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub examples: Vec<String>,
    #[serde(default)]
    pub confidence: Option<f32>,
}

impl ConventionInput {
    pub fn new(rule: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            description: None,
            examples: Vec::new(),
            confidence: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_examples<I, S>(mut self, examples: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.examples = examples.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// Something learned during the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningInput {
    pub insight: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub confidence: Option<f32>,
}

impl LearningInput {
    pub fn new(insight: impl Into<String>) -> Self {
        Self {
            insight: insight.into(),
            context: None,
            confidence: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// A file or other artifact produced during the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactInput {
    pub path: String,
    pub description: String,
    #[serde(default)]
    pub artifact_type: Option<String>,
}

impl ArtifactInput {
    pub fn new(path: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            description: description.into(),
            artifact_type: None,
        }
    }

    pub fn with_type(mut self, artifact_type: impl Into<String>) -> Self {
        self.artifact_type = Some(artifact_type.into());
        self
    }
}

/// Payload for any record kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordInput {
    UserMessage(MessageInput),
    AssistantMessage(MessageInput),
    ToolUse(ToolUseInput),
    Decision(DecisionInput),
    Convention(ConventionInput),
    Learning(LearningInput),
    Artifact(ArtifactInput),
}

impl RecordInput {
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::UserMessage(_) => RecordKind::UserMessage,
            Self::AssistantMessage(_) => RecordKind::AssistantMessage,
            Self::ToolUse(_) => RecordKind::ToolUse,
            Self::Decision(_) => RecordKind::Decision,
            Self::Convention(_) => RecordKind::Convention,
            Self::Learning(_) => RecordKind::Learning,
            Self::Artifact(_) => RecordKind::Artifact,
        }
    }

    /// Reject empty required fields and out-of-range scores.
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        match self {
            Self::UserMessage(m) | Self::AssistantMessage(m) => validate_required("text", &m.text),
            Self::ToolUse(t) => {
                validate_required("tool_name", &t.tool_name)?;
                validate_optional("output", t.output.as_deref())?;
                validate_optional("error", t.error.as_deref())
            }
            Self::Decision(d) => {
                validate_required("question", &d.question)?;
                validate_required("decision", &d.decision)?;
                validate_required("rationale", &d.rationale)?;
                for alt in &d.alternatives {
                    validate_required("alternatives", alt)?;
                }
                validate_confidence_opt(d.confidence)
            }
            Self::Convention(c) => {
                validate_required("rule", &c.rule)?;
                validate_optional("description", c.description.as_deref())?;
                for example in &c.examples {
                    validate_required("examples", example)?;
                }
                validate_confidence_opt(c.confidence)
            }
            Self::Learning(l) => {
                validate_required("insight", &l.insight)?;
                validate_optional("context", l.context.as_deref())?;
                validate_confidence_opt(l.confidence)
            }
            Self::Artifact(a) => {
                validate_required("path", &a.path)?;
                validate_required("description", &a.description)?;
                validate_optional("artifact_type", a.artifact_type.as_deref())
            }
        }
    }

    /// Confidence stored on the record: knowledge kinds always carry one.
    pub fn confidence(&self) -> Option<f32> {
        match self {
            Self::Decision(d) => Some(d.confidence.unwrap_or(DEFAULT_CONFIDENCE)),
            Self::Convention(c) => Some(c.confidence.unwrap_or(DEFAULT_CONFIDENCE)),
            Self::Learning(l) => Some(l.confidence.unwrap_or(DEFAULT_CONFIDENCE)),
            Self::Artifact(_) => Some(DEFAULT_CONFIDENCE),
            Self::UserMessage(_) | Self::AssistantMessage(_) | Self::ToolUse(_) => None,
        }
    }

    /// Render the canonical stored text.
    ///
    /// Each structured field gets a labelled line, so a search hit reads on
    /// its own without the original input.
    pub fn render(&self) -> String {
        match self {
            Self::UserMessage(m) | Self::AssistantMessage(m) => m.text.trim().to_string(),
            Self::ToolUse(t) => render_tool_use(t),
            Self::Decision(d) => {
                let mut lines = vec![
                    format!("Decision: {}", d.decision.trim()),
                    format!("Question: {}", d.question.trim()),
                    format!("Rationale: {}", d.rationale.trim()),
                ];
                if !d.alternatives.is_empty() {
                    let alts: Vec<&str> = d.alternatives.iter().map(|a| a.trim()).collect();
                    lines.push(format!("Alternatives considered: {}", alts.join("; ")));
                }
                lines.join("\n")
            }
            Self::Convention(c) => {
                let mut lines = vec![format!("Convention: {}", c.rule.trim())];
                if let Some(desc) = &c.description {
                    lines.push(desc.trim().to_string());
                }
                if !c.examples.is_empty() {
                    lines.push("Examples:".to_string());
                    lines.extend(c.examples.iter().map(|e| format!("- {}", e.trim())));
                }
                lines.join("\n")
            }
            Self::Learning(l) => match &l.context {
                Some(ctx) => format!("Learning: {}\nContext: {}", l.insight.trim(), ctx.trim()),
                None => format!("Learning: {}", l.insight.trim()),
            },
            Self::Artifact(a) => {
                let header = match &a.artifact_type {
                    Some(t) => format!("Artifact: {} ({})", a.path.trim(), t.trim()),
                    None => format!("Artifact: {}", a.path.trim()),
                };
                format!("{header}\n{}", a.description.trim())
            }
        }
    }
}

fn validate_confidence_opt(confidence: Option<f32>) -> std::result::Result<(), ValidationError> {
    match confidence {
        Some(c) => validate_unit_score("confidence", c),
        None => Ok(()),
    }
}

fn render_tool_use(t: &ToolUseInput) -> String {
    let status = if t.is_failure() {
        TOOL_FAILED_MARKER.to_string()
    } else {
        "Status: ok".to_string()
    };
    let mut lines = vec![format!("Tool: {}", t.tool_name.trim()), status];
    if !t.input.is_null() {
        lines.push(format!("Input: {}", cap(&t.input.to_string())));
    }
    if let Some(output) = &t.output {
        lines.push(format!("Output: {}", cap(output.trim())));
    }
    if let Some(error) = &t.error {
        lines.push(format!("Error: {}", cap(error.trim())));
    }
    lines.join("\n")
}

/// Cap a tool field at [`MAX_TOOL_FIELD_CHARS`], noting how much was cut.
fn cap(text: &str) -> String {
    let total = text.chars().count();
    if total <= MAX_TOOL_FIELD_CHARS {
        return text.to_string();
    }
    let kept: String = text.chars().take(MAX_TOOL_FIELD_CHARS).collect();
    format!("{kept} [... {} more chars]", total - MAX_TOOL_FIELD_CHARS)
}

// ─────────────────────────────────────────────────────────────────────────────
// Recorder
// ─────────────────────────────────────────────────────────────────────────────

/// Shared write path behind both managers.
pub struct Recorder {
    store: RecordStore,
    index: Mutex<VectorIndex>,
    embedder: SharedEmbedder,
    flush_every: usize,
    unflushed: AtomicUsize,
}

impl Recorder {
    /// Persist the index after every `flush_every` new vectors (0 = only on
    /// explicit flush).
    pub fn new(
        store: RecordStore,
        index: VectorIndex,
        embedder: SharedEmbedder,
        flush_every: usize,
    ) -> Self {
        Self {
            store,
            index: Mutex::new(index),
            embedder,
            flush_every,
            unflushed: AtomicUsize::new(0),
        }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn index(&self) -> &Mutex<VectorIndex> {
        &self.index
    }

    pub fn embedder(&self) -> &SharedEmbedder {
        &self.embedder
    }

    fn dir(&self) -> &Path {
        self.store.dir()
    }

    fn lock_timeout(&self) -> Duration {
        self.store.lock_timeout()
    }

    /// Validate, render, store and index one record.
    ///
    /// Only the store write can fail the call. Indexing problems are logged
    /// and left for the next reconcile.
    pub async fn record(&self, input: RecordInput, origin: &Origin) -> Result<Record> {
        input.validate()?;
        let turn = origin.validate()?;

        let kind = input.kind();
        let text = input.render();
        let topics = topic_set(&origin.topics);
        let quality = quality::score(&text, kind, &topics, origin.agent_role.as_deref());

        let new = NewRecord {
            text,
            kind,
            topics,
            session_id: origin.session_id.clone(),
            turn,
            quality,
            confidence: input.confidence(),
            agent_role: origin.agent_role.clone(),
        };
        let (record, created) = self.store.insert_or_get(new)?;
        if !created {
            debug!(id = %record.id, kind = %kind, "Record already stored");
        }

        self.index_record(&record).await;
        Ok(record)
    }

    async fn index_record(&self, record: &Record) {
        if self.index.lock().contains(&record.id) {
            return;
        }

        let vector = match self.embedder.embed(&record.text).await {
            Ok(v) => v,
            Err(e) => {
                warn!(
                    id = %record.id,
                    error = %e,
                    "Embedding unavailable, record will be indexed on next reconcile"
                );
                return;
            }
        };

        let mut index = self.index.lock();
        if let Err(e) = index.add(record.id, vector) {
            warn!(id = %record.id, error = %e, "Embedder returned an unusable vector");
            return;
        }

        let pending = self.unflushed.fetch_add(1, Ordering::Relaxed) + 1;
        if self.flush_every > 0 && pending >= self.flush_every {
            match index.persist(self.dir(), self.lock_timeout()) {
                Ok(()) => self.unflushed.store(0, Ordering::Relaxed),
                Err(e) => warn!(error = %e, "Deferred vector index persist"),
            }
        }
    }

    /// Persist the vector index if it has unsaved changes.
    pub fn flush(&self) -> Result<()> {
        let mut index = self.index.lock();
        if index.is_dirty() {
            index.persist(self.dir(), self.lock_timeout())?;
        }
        self.unflushed.store(0, Ordering::Relaxed);
        Ok(())
    }
}
