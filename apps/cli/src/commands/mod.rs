//! Command implementations for the Pagesmith CLI.

pub mod check;
pub mod event_renderer;
pub mod generate;

use std::path::Path;

use anyhow::Context;
use pagesmith_orchestrator::PagesmithConfig;

/// Load configuration from `path` (or defaults) and apply `PAGESMITH_*` overrides.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<PagesmithConfig> {
    let config = match path {
        Some(path) => PagesmithConfig::load_from_toml(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PagesmithConfig::default(),
    };
    config
        .apply_env(|key| std::env::var(key).ok())
        .context("Invalid PAGESMITH_* environment override")
}
