//! Configuration types mapping to the TOML schema.
//!
//! Top-level config:
//! ```toml
//! [store]        # where records live, locking and index persistence
//! [embedding]    # embedding provider
//! [context]      # context bundle defaults
//! [hook]         # hook deadline and index catch-up cap
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

/// Environment variable that overrides `[store] path`.
pub const STORE_PATH_ENV: &str = "CAIRN_STORE_PATH";

/// Environment variable consulted for the OpenAI API key.
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g., project-local
/// overrides) can be loaded and merged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CairnConfig {
    /// Record store configuration.
    pub store: Option<StoreConfig>,

    /// Embedding provider configuration.
    pub embedding: Option<EmbeddingConfig>,

    /// Context bundle defaults.
    pub context: Option<ContextConfig>,

    /// Hook process configuration.
    pub hook: Option<HookConfig>,
}

impl CairnConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: CairnConfig = toml::from_str(toml_str)?;
        config.check_ranges()?;
        Ok(config)
    }

    /// Merge another config on top of this one (other takes priority).
    pub fn merge(&mut self, other: CairnConfig) {
        if other.store.is_some() {
            self.store = other.store;
        }
        if other.embedding.is_some() {
            self.embedding = other.embedding;
        }
        if other.context.is_some() {
            self.context = other.context;
        }
        if other.hook.is_some() {
            self.hook = other.hook;
        }
    }

    /// Effective store settings (defaults when the section is absent).
    pub fn store(&self) -> StoreConfig {
        self.store.clone().unwrap_or_default()
    }

    /// Effective embedding settings.
    pub fn embedding(&self) -> EmbeddingConfig {
        self.embedding.clone().unwrap_or_default()
    }

    /// Effective context settings.
    pub fn context(&self) -> ContextConfig {
        self.context.clone().unwrap_or_default()
    }

    /// Effective hook settings.
    pub fn hook(&self) -> HookConfig {
        self.hook.clone().unwrap_or_default()
    }

    /// Check every rule on the effective settings, including rules that
    /// span sections.
    pub fn validate(&self) -> Result<()> {
        self.check_ranges()?;

        // The lock wait must end before the hook is killed, or a contended
        // store turns into a missed deadline instead of a clean error.
        let hook = self.hook();
        let store = self.store();
        if hook.deadline_ms <= store.lock_timeout_ms {
            return Err(ConfigError::InvalidValue {
                field: "hook.deadline_ms".to_string(),
                reason: format!(
                    "{} ms must exceed store.lock_timeout_ms ({} ms)",
                    hook.deadline_ms, store.lock_timeout_ms
                ),
            });
        }

        Ok(())
    }

    /// Check value ranges that serde cannot express.
    fn check_ranges(&self) -> Result<()> {
        if let Some(ref store) = self.store
            && store.index_flush_every == 0
        {
            return Err(ConfigError::InvalidValue {
                field: "store.index_flush_every".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        if let Some(ref context) = self.context
            && let Some(q) = context.min_quality
            && !(0.0..=1.0).contains(&q)
        {
            return Err(ConfigError::InvalidValue {
                field: "context.min_quality".to_string(),
                reason: format!("{q} is out of range [0.0, 1.0]"),
            });
        }

        if let Some(ref embedding) = self.embedding
            && embedding.dimensions == Some(0)
        {
            return Err(ConfigError::InvalidValue {
                field: "embedding.dimensions".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Store Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Record store settings.
///
/// ```toml
/// [store]
/// path = "~/.local/share/cairn/store"
/// lock_timeout_ms = 2000
/// index_flush_every = 1
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Store directory. Overridden by `CAIRN_STORE_PATH`.
    pub path: Option<PathBuf>,

    /// How long a writer waits for the append lock before giving up.
    /// Default: 2000 ms
    pub lock_timeout_ms: u64,

    /// Persist the vector index after this many inserts in one process.
    /// Default: 1 (every insert)
    pub index_flush_every: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            lock_timeout_ms: 2000,
            index_flush_every: 1,
        }
    }
}

impl StoreConfig {
    /// Get the effective store directory, checking the environment first.
    ///
    /// Resolution order:
    /// 1. `CAIRN_STORE_PATH` environment variable
    /// 2. Configured `path` value
    /// 3. Platform data dir (`~/.local/share/cairn/store` on Linux)
    pub fn effective_path(&self) -> PathBuf {
        if let Ok(env_path) = std::env::var(STORE_PATH_ENV)
            && !env_path.is_empty()
        {
            return PathBuf::from(env_path);
        }

        self.path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .map(|d| d.join("cairn").join("store"))
                .unwrap_or_else(|| PathBuf::from(".cairn"))
        })
    }

    /// Lock timeout as a duration.
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Embedding Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Embedding provider configuration.
///
/// Default is the offline feature-hashing embedder.
///
/// ```toml
/// [embedding]
/// provider = "hash"        # "hash", "openai", or "mock"
/// dimensions = 256
///
/// [embedding.openai]
/// model = "text-embedding-3-small"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Provider: "hash", "openai", or "mock".
    pub provider: EmbeddingProvider,
    /// Output embedding dimensions. Default depends on provider.
    pub dimensions: Option<usize>,
    /// OpenAI-specific embedding settings.
    pub openai: Option<EmbeddingOpenAiConfig>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Hash,
            dimensions: None,
            openai: None,
        }
    }
}

impl EmbeddingConfig {
    /// Effective dimensions for the configured provider.
    pub fn effective_dimensions(&self) -> usize {
        if let Some(d) = self.dimensions {
            return d;
        }
        match self.provider {
            EmbeddingProvider::Hash => 256,
            EmbeddingProvider::OpenAi => 1536,
            EmbeddingProvider::Mock => 64,
        }
    }

    /// Resolve the OpenAI API key: config file first, then environment.
    pub fn resolve_openai_api_key(&self) -> Option<String> {
        self.openai
            .as_ref()
            .and_then(|c| c.api_key.clone())
            .or_else(|| std::env::var(OPENAI_API_KEY_ENV).ok())
            .filter(|k| !k.is_empty())
    }

    /// Whether the config file itself carries an API key.
    pub fn has_plaintext_api_key(&self) -> bool {
        self.openai.as_ref().is_some_and(|c| c.api_key.is_some())
    }
}

/// Supported embedding providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Feature-hashing bag-of-words (default, offline).
    Hash,
    /// OpenAI-compatible embeddings API.
    OpenAi,
    /// Mock embedder for testing.
    Mock,
}

impl EmbeddingProvider {
    /// Provider name as understood by the embedder factory.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hash => "hash",
            Self::OpenAi => "openai",
            Self::Mock => "mock",
        }
    }
}

/// OpenAI embedding provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingOpenAiConfig {
    /// Model name. Default: "text-embedding-3-small".
    pub model: String,
    /// Custom base URL (for proxies and compatible servers).
    pub base_url: Option<String>,
    /// API key (prefer the environment variable).
    pub api_key: Option<String>,
}

impl Default for EmbeddingOpenAiConfig {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            base_url: None,
            api_key: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Context Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Context bundle defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Token budget used when a caller does not specify one.
    /// Default: 4000
    pub default_max_tokens: usize,

    /// Quality floor applied before packing.
    pub min_quality: Option<f32>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            default_max_tokens: 4000,
            min_quality: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Hook Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Hook process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HookConfig {
    /// Hard deadline for one hook invocation.
    /// Default: 3000 ms
    pub deadline_ms: u64,
    /// Most records one hook embeds while catching up the vector index,
    /// after its own event is recorded. 0 disables catch-up in hooks.
    /// Default: 64
    pub reconcile_limit: usize,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            deadline_ms: 3000,
            reconcile_limit: 64,
        }
    }
}

impl HookConfig {
    /// Deadline as a duration.
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults() {
        let config = CairnConfig::new();
        let store = config.store();
        assert!(store.path.is_none());
        assert_eq!(store.lock_timeout_ms, 2000);
        assert_eq!(store.index_flush_every, 1);
        assert_eq!(config.embedding().provider, EmbeddingProvider::Hash);
        assert_eq!(config.embedding().effective_dimensions(), 256);
        assert_eq!(config.context().default_max_tokens, 4000);
        assert_eq!(config.hook().deadline(), Duration::from_secs(3));
    }

    #[test]
    fn test_parse_full_config() {
        let config = CairnConfig::from_toml(
            r#"
[store]
path = "/tmp/cairn-store"
lock_timeout_ms = 500
index_flush_every = 10

[embedding]
provider = "openai"
dimensions = 512

[embedding.openai]
model = "text-embedding-3-large"
base_url = "http://localhost:8000/v1"

[context]
default_max_tokens = 8000
min_quality = 0.3

[hook]
deadline_ms = 1500
"#,
        )
        .unwrap();

        let store = config.store();
        assert_eq!(store.path, Some(PathBuf::from("/tmp/cairn-store")));
        assert_eq!(store.lock_timeout(), Duration::from_millis(500));
        assert_eq!(store.index_flush_every, 10);

        let embedding = config.embedding();
        assert_eq!(embedding.provider, EmbeddingProvider::OpenAi);
        assert_eq!(embedding.effective_dimensions(), 512);
        assert_eq!(
            embedding.openai.as_ref().unwrap().model,
            "text-embedding-3-large"
        );

        assert_eq!(config.context().min_quality, Some(0.3));
        assert_eq!(config.hook().deadline_ms, 1500);
    }

    #[test]
    fn test_partial_section_uses_field_defaults() {
        let config = CairnConfig::from_toml("[store]\nlock_timeout_ms = 100\n").unwrap();
        let store = config.store();
        assert_eq!(store.lock_timeout_ms, 100);
        assert_eq!(store.index_flush_every, 1);
    }

    #[test]
    fn test_rejects_zero_flush_interval() {
        let err = CairnConfig::from_toml("[store]\nindex_flush_every = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_rejects_out_of_range_quality() {
        let err = CairnConfig::from_toml("[context]\nmin_quality = 1.5\n").unwrap_err();
        assert!(err.to_string().contains("context.min_quality"));
    }

    #[test]
    fn test_defaults_are_valid() {
        CairnConfig::new().validate().unwrap();
        assert_eq!(CairnConfig::new().hook().reconcile_limit, 64);
    }

    #[test]
    fn test_rejects_deadline_within_lock_timeout() {
        let config = CairnConfig::from_toml(
            "[store]\nlock_timeout_ms = 2000\n\n[hook]\ndeadline_ms = 2000\n",
        )
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "hook.deadline_ms")
        );

        let config = CairnConfig::from_toml("[hook]\ndeadline_ms = 1500\n").unwrap();
        assert!(config.validate().is_err(), "default lock timeout is 2000 ms");

        let config = CairnConfig::from_toml(
            "[store]\nlock_timeout_ms = 500\n\n[hook]\ndeadline_ms = 1500\n",
        )
        .unwrap();
        config.validate().unwrap();
    }

    #[test]
    fn test_merge_overrides_sections() {
        let mut base = CairnConfig::from_toml("[hook]\ndeadline_ms = 100\n").unwrap();
        let overlay = CairnConfig::from_toml("[context]\ndefault_max_tokens = 10\n").unwrap();
        base.merge(overlay);
        assert_eq!(base.hook().deadline_ms, 100);
        assert_eq!(base.context().default_max_tokens, 10);
    }

    #[test]
    #[serial]
    fn test_store_path_env_override() {
        let store = StoreConfig {
            path: Some(PathBuf::from("/configured")),
            ..Default::default()
        };

        unsafe { std::env::set_var(STORE_PATH_ENV, "/from-env") };
        assert_eq!(store.effective_path(), PathBuf::from("/from-env"));
        unsafe { std::env::remove_var(STORE_PATH_ENV) };

        assert_eq!(store.effective_path(), PathBuf::from("/configured"));
    }

    #[test]
    #[serial]
    fn test_openai_key_resolution_prefers_config() {
        unsafe { std::env::set_var(OPENAI_API_KEY_ENV, "env-key") };

        let from_env = EmbeddingConfig::default();
        assert_eq!(from_env.resolve_openai_api_key().as_deref(), Some("env-key"));

        let from_file = EmbeddingConfig {
            openai: Some(EmbeddingOpenAiConfig {
                api_key: Some("file-key".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(
            from_file.resolve_openai_api_key().as_deref(),
            Some("file-key")
        );
        assert!(from_file.has_plaintext_api_key());

        unsafe { std::env::remove_var(OPENAI_API_KEY_ENV) };
    }
}
