//! CLI command handlers.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use cairn_config::CairnConfig;
use cairn_embed::{EmbedderSpec, SharedEmbedder, build_embedder};
use cairn_memory::{ContextOptions, MemoryContext};
use tracing::warn;

pub mod context;
pub mod hook;
pub mod reconcile;
pub mod search;
pub mod stats;

/// Timeout for a single request to a network embedder.
const EMBED_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
    /// Store directory given on the command line.
    pub store_override: Option<PathBuf>,
    /// Merged configuration.
    pub config: CairnConfig,
}

impl Context {
    /// Discover and merge configuration.
    ///
    /// A config that fails to load falls back to defaults with a warning;
    /// the hook must keep working on a broken config file.
    pub fn load(json_output: bool, verbose: bool, store_override: Option<PathBuf>) -> Self {
        let config = match cairn_config::load_config(None) {
            Ok(loaded) => {
                for warning in &loaded.warnings {
                    warn!(warning = %warning, "config warning");
                }
                loaded.config
            }
            Err(e) => {
                warn!(error = %e, "failed to load config, using defaults");
                CairnConfig::new()
            }
        };

        Self {
            json_output,
            verbose,
            store_override,
            config,
        }
    }

    /// The effective store directory.
    pub fn store_dir(&self) -> PathBuf {
        self.store_override
            .clone()
            .unwrap_or_else(|| self.config.store().effective_path())
    }

    /// Memory options derived from `[store]` and `[context]`.
    pub fn options(&self) -> ContextOptions {
        let store = self.config.store();
        let context = self.config.context();

        let mut options = ContextOptions::new(self.store_dir())
            .with_lock_timeout(store.lock_timeout())
            .with_index_flush_every(store.index_flush_every)
            .with_default_max_tokens(context.default_max_tokens);
        if let Some(min_quality) = context.min_quality {
            options = options.with_min_quality(min_quality);
        }
        options
    }

    /// Build the embedder described by `[embedding]`.
    pub fn embedder(&self) -> Result<SharedEmbedder> {
        let embedding = self.config.embedding();
        let openai = embedding.openai.clone().unwrap_or_default();

        let spec = EmbedderSpec {
            provider: embedding.provider.as_str().to_string(),
            dimensions: Some(embedding.effective_dimensions()),
            openai_api_key: embedding.resolve_openai_api_key(),
            openai_model: Some(openai.model),
            openai_base_url: openai.base_url,
            timeout: Some(EMBED_REQUEST_TIMEOUT),
        };
        Ok(build_embedder(&spec)?)
    }

    /// Open the memory context and reconcile the vector index.
    pub async fn open(&self) -> Result<MemoryContext> {
        Ok(MemoryContext::open(self.options(), self.embedder()?).await?)
    }

    /// Open the memory context without touching the embedder.
    pub fn open_without_reconcile(&self) -> Result<MemoryContext> {
        Ok(MemoryContext::open_without_reconcile(
            self.options(),
            self.embedder()?,
        )?)
    }
}

/// Truncate to `max` characters on a char boundary, flattening newlines.
pub fn truncate(s: &str, max: usize) -> String {
    let flat: String = s
        .chars()
        .map(|c| if c == '\n' { ' ' } else { c })
        .collect();
    if flat.chars().count() <= max {
        flat
    } else {
        let cut: String = flat.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("line one\nline two", 40), "line one line two");
        assert_eq!(truncate("abcdefghij", 6), "abc...");
        assert_eq!(truncate("héllo wörld", 8), "héllo...");
    }
}
