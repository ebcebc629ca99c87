//! Hook command - record one assistant event.
//!
//! Reads a single JSON object from stdin, stores it through the matching
//! manager method and always answers `{"continue": true, ...}` on stdout
//! with exit status 0. Failures are reported in `message`, never as a
//! non-zero exit, so a broken store can not block the assistant. Whatever
//! is left of the deadline after recording goes to catching up the index.

use anyhow::{Context as _, Result, anyhow};
use cairn_memory::{
    ArtifactInput, ConventionInput, DecisionInput, LearningInput, MemoryContext, MessageInput,
    Origin, RecordInput, RecordKind, ToolUseInput,
};
use clap::Args;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::AsyncReadExt;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::Context;

/// Arguments for the hook command.
#[derive(Args, Debug)]
pub struct HookArgs {
    /// Event name: UserPromptSubmit, Stop, PostToolUse, decision,
    /// convention, learning or artifact
    pub event: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Protocol
// ─────────────────────────────────────────────────────────────────────────────

/// The hook's answer on stdout.
#[derive(Debug, Clone, Serialize)]
pub struct HookResponse {
    #[serde(rename = "continue")]
    pub proceed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HookResponse {
    fn proceed(message: impl Into<String>) -> Self {
        Self {
            proceed: true,
            message: Some(message.into()),
        }
    }

    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"continue":true}"#.to_string())
    }
}

/// Events the hook understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HookEvent {
    UserPrompt,
    AssistantStop,
    PostToolUse,
    Knowledge(RecordKind),
}

impl HookEvent {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "UserPromptSubmit" | "user_prompt_submit" | "user_message" => Some(Self::UserPrompt),
            "Stop" | "stop" | "assistant_message" => Some(Self::AssistantStop),
            "PostToolUse" | "post_tool_use" | "tool_use" => Some(Self::PostToolUse),
            other => match other.to_ascii_lowercase().parse::<RecordKind>() {
                Ok(kind) if kind.is_knowledge() => Some(Self::Knowledge(kind)),
                _ => None,
            },
        }
    }

    /// Whether the event opens a new turn.
    fn starts_turn(self) -> bool {
        matches!(self, Self::UserPrompt)
    }

    /// Map the event-specific fields of a payload to a typed input.
    fn input(self, fields: &Map<String, Value>) -> Result<RecordInput> {
        let input = match self {
            Self::UserPrompt => RecordInput::UserMessage(MessageInput {
                text: first_str(fields, &["prompt", "text"])?,
            }),
            Self::AssistantStop => RecordInput::AssistantMessage(MessageInput {
                text: first_str(fields, &["last_assistant_message", "message", "text"])?,
            }),
            Self::PostToolUse => RecordInput::ToolUse(tool_use(fields)?),
            Self::Knowledge(kind) => {
                let object = Value::Object(fields.clone());
                match kind {
                    RecordKind::Decision => {
                        RecordInput::Decision(serde_json::from_value::<DecisionInput>(object)?)
                    }
                    RecordKind::Convention => {
                        RecordInput::Convention(serde_json::from_value::<ConventionInput>(object)?)
                    }
                    RecordKind::Learning => {
                        RecordInput::Learning(serde_json::from_value::<LearningInput>(object)?)
                    }
                    RecordKind::Artifact => {
                        RecordInput::Artifact(serde_json::from_value::<ArtifactInput>(object)?)
                    }
                    other => return Err(anyhow!("{other} is not a knowledge kind")),
                }
            }
        };
        Ok(input)
    }
}

/// Fields shared by every hook payload. The rest is event specific.
#[derive(Debug, Deserialize)]
struct HookPayload {
    session_id: String,
    #[serde(default)]
    turn: Option<i64>,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    agent_role: Option<String>,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

fn first_str(fields: &Map<String, Value>, keys: &[&str]) -> Result<String> {
    keys.iter()
        .find_map(|key| fields.get(*key).and_then(Value::as_str))
        .map(str::to_string)
        .ok_or_else(|| anyhow!("payload has no string field '{}'", keys[0]))
}

fn tool_use(fields: &Map<String, Value>) -> Result<ToolUseInput> {
    let name = first_str(fields, &["tool_name"])?;
    let input = fields.get("tool_input").cloned().unwrap_or(Value::Null);
    let mut tool_use = ToolUseInput::new(name, input);

    match fields.get("tool_response") {
        None | Some(Value::Null) => {}
        Some(Value::String(output)) => tool_use = tool_use.with_output(output.clone()),
        Some(response) => {
            let failed = response.get("is_error").and_then(Value::as_bool) == Some(true)
                || response.get("success").and_then(Value::as_bool) == Some(false);
            tool_use = tool_use.with_output(response.to_string());
            if failed {
                let error = response
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("tool reported failure");
                tool_use = tool_use.failed(error);
            }
        }
    }
    Ok(tool_use)
}

// ─────────────────────────────────────────────────────────────────────────────
// Handler
// ─────────────────────────────────────────────────────────────────────────────

/// Run the hook command.
pub async fn run(args: HookArgs, ctx: &Context) -> Result<()> {
    let deadline = ctx.config.hook().deadline();
    let deadline_at = Instant::now() + deadline;

    // `handle` bounds its own index catch-up by `deadline_at`; this outer
    // timeout only fires if recording itself overruns.
    let response = match tokio::time::timeout_at(deadline_at, handle(&args.event, ctx, deadline_at))
        .await
    {
        Ok(Ok(message)) => {
            debug!(event = %args.event, %message, "hook handled");
            HookResponse::proceed(message)
        }
        Ok(Err(e)) => {
            warn!(event = %args.event, error = %format!("{e:#}"), "hook failed");
            HookResponse::proceed(format!("cairn: {e:#}"))
        }
        Err(_) => {
            warn!(
                event = %args.event,
                deadline_ms = deadline.as_millis() as u64,
                "hook deadline exceeded"
            );
            HookResponse::proceed(format!(
                "cairn: deadline of {} ms exceeded",
                deadline.as_millis()
            ))
        }
    };

    println!("{}", response.to_json());
    Ok(())
}

/// Record the event, then spend what is left of the deadline catching up
/// the vector index. Only the first part can fail the hook.
async fn handle(event_name: &str, ctx: &Context, deadline_at: Instant) -> Result<String> {
    let event =
        HookEvent::parse(event_name).ok_or_else(|| anyhow!("unknown hook event '{event_name}'"))?;

    let mut raw = String::new();
    tokio::io::stdin()
        .read_to_string(&mut raw)
        .await
        .context("failed to read hook payload")?;
    let payload: HookPayload =
        serde_json::from_str(&raw).context("hook payload must be a JSON object with a session_id")?;
    let input = event.input(&payload.fields)?;

    let options = ctx.options().with_lock_deadline(deadline_at.into_std());
    let mut memory = MemoryContext::open_without_reconcile(options, ctx.embedder()?)?;
    let turn = match payload.turn {
        Some(turn) => turn,
        None => derive_turn(&memory, &payload.session_id, event.starts_turn())?,
    };

    let mut origin = Origin::new(payload.session_id, turn).with_topics(payload.topics);
    if let Some(role) = payload.agent_role {
        origin = origin.with_agent_role(role);
    }

    let record = memory.record(input, &origin).await?;
    // The record line is durable at this point; a missing vector is
    // rebuilt by the next reconcile.
    if let Err(e) = memory.flush() {
        warn!(id = %record.id, error = %e, "failed to persist vector index");
    }
    let message = format!("recorded {} {}", record.kind, record.id);

    let limit = ctx.config.hook().reconcile_limit;
    if limit > 0 {
        match tokio::time::timeout_at(deadline_at, memory.reconcile_limited(limit)).await {
            Ok(Ok(report)) if report.pending > 0 => {
                debug!(pending = report.pending, "index catch-up left records pending")
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(error = %e, "index catch-up failed"),
            Err(_) => debug!("index catch-up stopped at deadline"),
        }
    }

    Ok(message)
}

/// Turn number when the payload carries none: the count of user prompts
/// already stored for the session, minus one for events inside that turn.
fn derive_turn(memory: &MemoryContext, session_id: &str, starts_turn: bool) -> Result<i64> {
    let prompts = memory
        .conversation()
        .history(session_id)?
        .iter()
        .filter(|r| r.kind == RecordKind::UserMessage)
        .count() as i64;
    Ok(if starts_turn {
        prompts
    } else {
        (prompts - 1).max(0)
    })
}
