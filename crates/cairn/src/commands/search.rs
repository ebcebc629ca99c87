//! Search command - semantic search over stored records.

use anyhow::Result;
use cairn_memory::{RecordKind, SearchQuery};
use clap::Args;
use console::{Style, style};

use super::{Context, truncate};

/// Arguments for the search command.
#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Search query
    pub query: String,

    /// Maximum results to return
    #[arg(short, long, default_value = "10")]
    pub limit: usize,

    /// Restrict to a record kind (repeatable)
    #[arg(short, long = "kind")]
    pub kinds: Vec<RecordKind>,

    /// Restrict to one session
    #[arg(short, long)]
    pub session: Option<String>,

    /// Drop results below this cosine similarity
    #[arg(long)]
    pub min_similarity: Option<f32>,
}

/// Run the search command.
pub async fn run(args: SearchArgs, ctx: &Context) -> Result<()> {
    let memory = ctx.open().await?;
    let dim = Style::new().dim();

    let mut query = SearchQuery::new(&args.query).with_limit(args.limit);
    for kind in &args.kinds {
        query = query.with_kind(*kind);
    }
    if let Some(session) = &args.session {
        query = query.with_session(session);
    }
    if let Some(min) = args.min_similarity {
        query = query.with_min_similarity(min);
    }

    if ctx.verbose {
        eprintln!(
            "{}",
            dim.apply_to(format!(
                "Searching: \"{}\" (limit: {})",
                args.query, args.limit
            ))
        );
    }

    let results = memory.search(&query).await?;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else if results.is_empty() {
        println!("{}", dim.apply_to("No results found"));
    } else {
        println!("{}", style("Memory Search Results").bold());
        println!("{}", dim.apply_to("─".repeat(50)));
        println!();

        for (i, result) in results.iter().enumerate() {
            println!("{}. {}", style(i + 1).cyan(), truncate(&result.text, 70));
            println!(
                "   {}",
                dim.apply_to(format!(
                    "{} · session {} · turn {} · similarity {:.3}",
                    result.kind,
                    result.metadata.session_id,
                    result.metadata.turn,
                    result.similarity
                ))
            );
            println!();
        }
    }

    Ok(())
}
