//! Context command - assemble a token-budgeted bundle.

use anyhow::Result;
use cairn_memory::{ContextRequest, RecordKind, render_bundle};
use clap::Args;

use super::Context;

/// Arguments for the context command.
#[derive(Args, Debug)]
pub struct ContextArgs {
    /// Token budget (default: from config)
    #[arg(short, long)]
    pub max_tokens: Option<usize>,

    /// Keep records tagged with any of these topics (repeatable)
    #[arg(short, long = "topic")]
    pub topics: Vec<String>,

    /// Restrict to a record kind (repeatable)
    #[arg(short, long = "kind")]
    pub kinds: Vec<RecordKind>,

    /// Restrict to one session
    #[arg(short, long)]
    pub session: Option<String>,

    /// Drop records below this quality
    #[arg(long)]
    pub min_quality: Option<f32>,
}

/// Run the context command.
pub async fn run(args: ContextArgs, ctx: &Context) -> Result<()> {
    let memory = ctx.open_without_reconcile()?;

    let mut request = ContextRequest::new().with_topics(args.topics);
    if let Some(max_tokens) = args.max_tokens {
        request = request.with_max_tokens(max_tokens);
    }
    for kind in args.kinds {
        request = request.with_kind(kind);
    }
    if let Some(session) = args.session {
        request = request.with_session(session);
    }
    if let Some(min_quality) = args.min_quality {
        request = request.with_min_quality(min_quality);
    }

    let records = memory.assemble(&request)?;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        print!("{}", render_bundle(&records));
    }

    Ok(())
}
