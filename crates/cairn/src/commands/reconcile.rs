//! Reconcile command - heal the vector index.

use anyhow::Result;
use clap::Args;
use console::{Style, style};
use serde_json::json;

use super::Context;

/// Arguments for the reconcile command.
#[derive(Args, Debug)]
pub struct ReconcileArgs {
    /// Only report whether the index disagrees with the records
    #[arg(long)]
    pub check: bool,
}

/// Run the reconcile command.
pub async fn run(args: ReconcileArgs, ctx: &Context) -> Result<()> {
    let mut memory = ctx.open_without_reconcile()?;
    let problem = memory.check_index().err().map(|e| e.to_string());

    if args.check {
        if ctx.json_output {
            let out = json!({
                "store": memory.store_dir(),
                "consistent": problem.is_none(),
                "problem": problem,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        } else {
            match &problem {
                None => println!("{} index is consistent", style("✓").green()),
                Some(p) => println!("{} {}", style("✗").red(), p),
            }
        }
        return Ok(());
    }

    let report = memory.reconcile().await?;

    if ctx.json_output {
        let out = json!({
            "store": memory.store_dir(),
            "embedded": report.embedded,
            "removed": report.removed,
            "pending": report.pending,
            "repairs": report.repairs(),
            "rebuilt": report.rebuilt.as_ref().map(|r| r.to_string()),
            "error": report.error,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    println!("{}", style("Reconcile").bold());
    println!("{}", dim.apply_to("─".repeat(50)));
    println!();
    println!("  Store:     {}", memory.store_dir().display());
    if let Some(reason) = &report.rebuilt {
        println!("  Rebuilt:   {}", style(reason).yellow());
    }
    println!("  Embedded:  {}", style(report.embedded).cyan());
    println!("  Removed:   {}", style(report.removed).cyan());
    println!("  Pending:   {}", style(report.pending).cyan());
    println!();

    match &report.error {
        Some(error) => {
            let red = Style::new().red();
            println!("{} {}", red.apply_to("Embedder error:"), error);
            println!(
                "{}",
                dim.apply_to("Pending records will be embedded on the next run.")
            );
        }
        None if report.repairs() == 0 => {
            println!("{} index was already consistent", style("✓").green())
        }
        None => println!(
            "{} {} repairs applied",
            style("✓").green(),
            report.repairs()
        ),
    }

    Ok(())
}
