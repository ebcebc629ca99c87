//! Quality scoring.
//!
//! A record's quality is a fixed heuristic computed once at insert time. It is
//! the numerator of the packer's value density, so it decides which records
//! survive a tight token budget.
//!
//! ```text
//! score = base(kind) + topic_bonus(n) + length_bonus(chars) + role_bonus
//!         clamped to [0, 1]
//! ```

use std::collections::BTreeSet;

use crate::types::RecordKind;

/// Marker the tool-use renderer writes for a failed invocation.
pub const TOOL_FAILED_MARKER: &str = "Status: failed";

/// Maximum total contribution of topic tags.
const TOPIC_BONUS_MAX: f32 = 0.2;

/// Maximum total contribution of text length.
const LENGTH_BONUS_MAX: f32 = 0.15;

/// Length (in chars) beyond which text earns no further bonus.
const LENGTH_CAP_CHARS: usize = 600;

/// Bonus for records attributed to an agent role.
const ROLE_BONUS: f32 = 0.05;

/// Base weight for a record kind.
///
/// Failed tool uses are weighted like decisions: the failure is what a later
/// turn needs to know about.
fn base_weight(kind: RecordKind, text: &str) -> f32 {
    match kind {
        RecordKind::Decision => 0.55,
        RecordKind::Convention | RecordKind::Learning => 0.5,
        RecordKind::Artifact => 0.4,
        RecordKind::ToolUse if text.contains(TOOL_FAILED_MARKER) => 0.55,
        RecordKind::ToolUse => 0.3,
        RecordKind::UserMessage => 0.35,
        RecordKind::AssistantMessage => 0.3,
    }
}

/// Diminishing-returns bonus: each additional topic adds half of the last.
fn topic_bonus(count: usize) -> f32 {
    let n = count.min(32) as i32;
    TOPIC_BONUS_MAX * (1.0 - 0.5f32.powi(n))
}

fn length_bonus(text: &str) -> f32 {
    let chars = text.chars().count().min(LENGTH_CAP_CHARS);
    LENGTH_BONUS_MAX * chars as f32 / LENGTH_CAP_CHARS as f32
}

/// Score a record's usefulness in `[0, 1]`.
///
/// Pure: the same inputs always produce the same score.
pub fn score(
    text: &str,
    kind: RecordKind,
    topics: &BTreeSet<String>,
    agent_role: Option<&str>,
) -> f32 {
    let role = match agent_role {
        Some(r) if !r.trim().is_empty() => ROLE_BONUS,
        _ => 0.0,
    };

    let raw = base_weight(kind, text) + topic_bonus(topics.len()) + length_bonus(text) + role;
    raw.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::topic_set;
    use proptest::prelude::*;

    fn topics(n: usize) -> BTreeSet<String> {
        topic_set((0..n).map(|i| format!("t{i}")))
    }

    #[test]
    fn test_decision_outranks_acknowledgement() {
        let none = BTreeSet::new();
        let decision = score("Use Postgres", RecordKind::Decision, &none, None);
        let ack = score("ok", RecordKind::AssistantMessage, &none, None);
        assert!(decision > ack);
    }

    #[test]
    fn test_failed_tool_use_outranks_success() {
        let none = BTreeSet::new();
        let ok = score("Tool: Bash\nStatus: ok", RecordKind::ToolUse, &none, None);
        let failed = score("Tool: Bash\nStatus: failed", RecordKind::ToolUse, &none, None);
        assert!(failed > ok);
    }

    #[test]
    fn test_role_bonus() {
        let none = BTreeSet::new();
        let plain = score("x", RecordKind::Learning, &none, None);
        let attributed = score("x", RecordKind::Learning, &none, Some("reviewer"));
        let blank = score("x", RecordKind::Learning, &none, Some("  "));
        assert!(attributed > plain);
        assert_eq!(blank, plain);
    }

    #[test]
    fn test_length_bonus_caps() {
        let none = BTreeSet::new();
        let at_cap = score(&"a".repeat(LENGTH_CAP_CHARS), RecordKind::Learning, &none, None);
        let past_cap = score(&"a".repeat(LENGTH_CAP_CHARS * 3), RecordKind::Learning, &none, None);
        assert_eq!(at_cap, past_cap);
    }

    #[test]
    fn test_topic_bonus_diminishes() {
        let first = topic_bonus(1) - topic_bonus(0);
        let second = topic_bonus(2) - topic_bonus(1);
        assert!(second < first);
        assert!(topic_bonus(1000) <= TOPIC_BONUS_MAX);
    }

    proptest! {
        #[test]
        fn score_is_bounded(
            text in ".{0,2000}",
            kind_idx in 0usize..7,
            n in 0usize..50,
            role in proptest::option::of("[a-z]{0,8}"),
        ) {
            let s = score(&text, RecordKind::ALL[kind_idx], &topics(n), role.as_deref());
            prop_assert!((0.0..=1.0).contains(&s));
        }

        #[test]
        fn score_monotonic_in_topics(kind_idx in 0usize..7, n in 0usize..20) {
            let kind = RecordKind::ALL[kind_idx];
            let fewer = score("some text", kind, &topics(n), None);
            let more = score("some text", kind, &topics(n + 1), None);
            prop_assert!(more >= fewer);
        }

        #[test]
        fn score_monotonic_in_length(kind_idx in 0usize..7, len in 0usize..800) {
            let kind = RecordKind::ALL[kind_idx];
            let shorter = score(&"w".repeat(len), kind, &BTreeSet::new(), None);
            let longer = score(&"w".repeat(len + 1), kind, &BTreeSet::new(), None);
            prop_assert!(longer >= shorter);
        }
    }
}
