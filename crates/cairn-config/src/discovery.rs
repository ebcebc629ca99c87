//! Config discovery: the user file, then `./cairn.toml` on top of it.
//!
//! The user file is `$CAIRN_CONFIG_DIR/config.toml` when that variable is
//! set, else `config.toml` under the platform config dir.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{CairnConfig, ConfigError, Result};

const PROJECT_FILE: &str = "cairn.toml";
const USER_FILE: &str = "config.toml";
const CONFIG_DIR_ENV: &str = "CAIRN_CONFIG_DIR";

/// A merged config and what went into it.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: CairnConfig,
    /// Files that were merged, lowest precedence first.
    pub loaded: Vec<PathBuf>,
    /// Problems that did not stop the load.
    pub warnings: Vec<String>,
}

/// Discover and merge config for the current directory.
///
/// A malformed layer never fails the load: hooks must keep working with
/// defaults, so the problem is reported through `warnings` instead. Layers
/// that parse but combine into an invalid config are an error.
pub fn load_config(project_dir: Option<&Path>) -> Result<LoadedConfig> {
    load_config_with_options(project_dir, None)
}

/// Like [`load_config`], with `config_dir` replacing the user config dir.
pub fn load_config_with_options(
    project_dir: Option<&Path>,
    config_dir: Option<&Path>,
) -> Result<LoadedConfig> {
    let user_file = config_dir
        .map(Path::to_path_buf)
        .or_else(xdg_config_dir)
        .map(|dir| dir.join(USER_FILE));
    let project_file = project_dir.unwrap_or(Path::new(".")).join(PROJECT_FILE);

    let mut loaded = LoadedConfig {
        config: CairnConfig::new(),
        loaded: Vec::new(),
        warnings: Vec::new(),
    };
    for path in user_file.into_iter().chain([project_file]) {
        if !path.is_file() {
            continue;
        }
        match read_layer(&path) {
            Ok(layer) => {
                debug!(path = %path.display(), "Merged config layer");
                loaded.config.merge(layer);
                loaded.loaded.push(path);
            }
            Err(e) => loaded
                .warnings
                .push(format!("Failed to load {}: {}", path.display(), e)),
        }
    }

    if loaded
        .config
        .embedding
        .as_ref()
        .is_some_and(|e| e.has_plaintext_api_key())
    {
        loaded.warnings.push(
            "[embedding.openai] contains a plaintext API key. \
             Consider the OPENAI_API_KEY environment variable instead."
                .to_string(),
        );
    }

    // Each layer is range-checked on parse; rules spanning sections only
    // make sense once the layers are merged.
    loaded.config.validate()?;
    Ok(loaded)
}

/// The user config directory.
pub fn xdg_config_dir() -> Option<PathBuf> {
    match std::env::var(CONFIG_DIR_ENV) {
        Ok(dir) if !dir.is_empty() => Some(PathBuf::from(dir)),
        _ => dirs::config_dir().map(|d| d.join("cairn")),
    }
}

fn read_layer(path: &Path) -> Result<CairnConfig> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.display().to_string(),
        source,
    })?;
    CairnConfig::from_toml(&contents)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_read_layer() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[hook]\ndeadline_ms = 750\n").unwrap();

        let config = read_layer(&path).unwrap();
        assert_eq!(config.hook().deadline_ms, 750);
    }

    #[test]
    fn test_read_layer_not_found() {
        let err = read_layer(Path::new("/nonexistent/config.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "this is not valid toml {{{{").unwrap();

        let err = read_layer(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_config_no_files() {
        let dir = TempDir::new().unwrap();
        let empty_config_dir = TempDir::new().unwrap();
        let loaded =
            load_config_with_options(Some(dir.path()), Some(empty_config_dir.path())).unwrap();
        assert!(loaded.config.store.is_none());
        assert!(loaded.loaded.is_empty());
    }

    #[test]
    fn test_load_config_layered_merge() {
        let user_dir = TempDir::new().unwrap();
        let project_dir = TempDir::new().unwrap();

        fs::write(
            user_dir.path().join("config.toml"),
            r#"
[hook]
deadline_ms = 4000

[context]
default_max_tokens = 2000
"#,
        )
        .unwrap();
        fs::write(
            project_dir.path().join("cairn.toml"),
            r#"
[context]
default_max_tokens = 9000
"#,
        )
        .unwrap();

        let loaded =
            load_config_with_options(Some(project_dir.path()), Some(user_dir.path())).unwrap();

        // Project-local overrides user config, untouched sections survive
        assert_eq!(loaded.config.context().default_max_tokens, 9000);
        assert_eq!(loaded.config.hook().deadline_ms, 4000);
        assert_eq!(loaded.loaded.len(), 2);
    }

    #[test]
    fn test_malformed_config_warns_but_continues() {
        let dir = TempDir::new().unwrap();
        let empty_config_dir = TempDir::new().unwrap();
        fs::write(dir.path().join("cairn.toml"), "not valid toml {{{{").unwrap();

        let loaded =
            load_config_with_options(Some(dir.path()), Some(empty_config_dir.path())).unwrap();
        assert!(!loaded.warnings.is_empty());
        assert!(loaded.warnings[0].contains("Failed to load"));
        assert!(loaded.loaded.is_empty());
    }

    #[test]
    fn test_plaintext_key_warning() {
        let dir = TempDir::new().unwrap();
        let empty_config_dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("cairn.toml"),
            r#"
[embedding]
provider = "openai"

[embedding.openai]
api_key = "sk-secret"
"#,
        )
        .unwrap();

        let loaded =
            load_config_with_options(Some(dir.path()), Some(empty_config_dir.path())).unwrap();
        assert_eq!(loaded.warnings.len(), 1);
        assert!(loaded.warnings[0].contains("plaintext"));
    }

    #[test]
    fn test_layers_combining_into_short_deadline_are_rejected() {
        let user_dir = TempDir::new().unwrap();
        let project_dir = TempDir::new().unwrap();
        fs::write(
            user_dir.path().join("config.toml"),
            "[store]\nlock_timeout_ms = 5000\n",
        )
        .unwrap();
        fs::write(
            project_dir.path().join("cairn.toml"),
            "[hook]\ndeadline_ms = 3000\n",
        )
        .unwrap();

        let err = load_config_with_options(Some(project_dir.path()), Some(user_dir.path()))
            .unwrap_err();
        assert!(err.to_string().contains("hook.deadline_ms"));
    }
}
