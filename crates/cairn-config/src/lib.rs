//! Configuration system for Cairn.
//!
//! Provides TOML-based configuration with:
//! - Store location, lock timeout and index persistence cadence (`[store]`)
//! - Embedding provider selection (`[embedding]`)
//! - Context bundle defaults (`[context]`)
//! - Hook deadline and reconcile cap (`[hook]`)
//! - Config file layering (XDG user config + project-local overrides)

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{LoadedConfig, load_config, load_config_with_options, xdg_config_dir};
pub use error::{ConfigError, Result};
pub use types::*;
