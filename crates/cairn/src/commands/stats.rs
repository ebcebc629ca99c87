//! Stats command - record counts and index health.

use anyhow::Result;
use cairn_memory::RecordKind;
use clap::Args;
use console::{Style, style};
use serde_json::json;

use super::Context;

/// Arguments for the stats command.
#[derive(Args, Debug)]
pub struct StatsArgs {}

/// Run the stats command.
pub async fn run(_args: StatsArgs, ctx: &Context) -> Result<()> {
    let memory = ctx.open_without_reconcile()?;
    let stats = memory.get_stats()?;
    let embedding = ctx.config.embedding();

    if ctx.json_output {
        let out = json!({
            "store": memory.store_dir(),
            "provider": embedding.provider.as_str(),
            "dimensions": embedding.effective_dimensions(),
            "stats": stats,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    println!("{}", style("Memory Statistics").bold());
    println!("{}", dim.apply_to("─".repeat(50)));
    println!();
    for kind in RecordKind::ALL {
        let entry = stats.by_kind.get(&kind).cloned().unwrap_or_default();
        println!(
            "  {:<18} {:>6}  {}",
            kind.as_str(),
            style(entry.count).cyan(),
            dim.apply_to(format!("~{} tokens", entry.tokens))
        );
    }
    println!();
    println!("  Records:   {}", style(stats.total_records).cyan());
    println!("  Tokens:    {}", style(stats.total_tokens).cyan());
    if stats.skipped_lines > 0 {
        println!(
            "  Skipped:   {}",
            style(format!("{} unreadable lines", stats.skipped_lines)).yellow()
        );
    }
    println!();

    println!("{}", style("Vector Index").bold());
    println!("{}", dim.apply_to("─".repeat(50)));
    println!();
    println!(
        "  Provider:  {} ({} dims)",
        embedding.provider.as_str(),
        embedding.effective_dimensions()
    );
    println!("  Embedded:  {}", style(stats.embedded).cyan());
    println!("  Pending:   {}", style(stats.pending).cyan());
    if let Err(e) = memory.check_index() {
        println!("  Status:    {}", style(e).yellow());
        println!(
            "  {}",
            dim.apply_to("Run `cairn reconcile` to repair the index.")
        );
    }
    println!();
    println!("  Store:     {}", dim.apply_to(memory.store_dir().display()));

    Ok(())
}
