//! Token-budgeted context selection.
//!
//! Greedy knapsack over value density (`quality / token_cost`). Records are
//! taken whole or not at all; text is never truncated.

use std::cmp::Ordering;
use std::fmt::Write as _;

use crate::types::Record;

/// Estimate the token cost of a text: `ceil(chars / 4)`, at least 1.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4).max(1)
}

/// Total estimated token cost of a set of records.
pub fn total_tokens(records: &[Record]) -> usize {
    records.iter().map(Record::token_cost).sum()
}

fn density(record: &Record) -> f32 {
    record.quality / record.token_cost() as f32
}

/// Packing order: density descending, then newer first, then id.
fn by_density(a: &Record, b: &Record) -> Ordering {
    density(b)
        .total_cmp(&density(a))
        .then_with(|| b.created_at.cmp(&a.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Select records whose total token cost fits within `max_tokens`.
///
/// Records below `min_quality` are dropped first. The rest are considered in
/// order of value density; each one that still fits is taken, so a large
/// record that doesn't fit never blocks smaller ones behind it. The result is
/// in selection order.
pub fn assemble(
    candidates: Vec<Record>,
    max_tokens: usize,
    min_quality: Option<f32>,
) -> Vec<Record> {
    if max_tokens == 0 {
        return Vec::new();
    }

    let mut pool: Vec<Record> = candidates
        .into_iter()
        .filter(|r| min_quality.is_none_or(|min| r.quality >= min))
        .collect();
    pool.sort_by(by_density);

    let mut used = 0usize;
    let mut selected = Vec::new();
    for record in pool {
        let cost = record.token_cost();
        if used + cost <= max_tokens {
            used += cost;
            selected.push(record);
        }
    }
    selected
}

/// Render a packed bundle as markdown for replay to a model.
pub fn render_bundle(records: &[Record]) -> String {
    let mut out = String::from("# Session memory\n");
    for record in records {
        let _ = write!(
            out,
            "\n## {} (session {}, turn {})\n",
            record.kind, record.session_id, record.turn
        );
        if !record.topics.is_empty() {
            let topics: Vec<&str> = record.topics.iter().map(String::as_str).collect();
            let _ = writeln!(out, "Topics: {}", topics.join(", "));
        }
        if let Some(confidence) = record.confidence {
            let _ = writeln!(out, "Confidence: {confidence:.2}");
        }
        out.push('\n');
        out.push_str(record.text.trim_end());
        out.push('\n');
    }
    out
}
