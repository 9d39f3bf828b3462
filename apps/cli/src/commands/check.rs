//! Offline response check.
//!
//! Extracts the file blocks of a saved model response, validates them the way
//! a run would, and prints the verdict.

use std::path::PathBuf;

use anyhow::Context;
use pagesmith_orchestrator::{validate_response, ModeFlags};

use super::load_config;

/// Options for the check command.
#[derive(Debug, Clone, Default)]
pub struct CheckOptions {
    /// Saved response text
    pub response: PathBuf,
    /// Require the scaffold files
    pub scaffold: bool,
    /// Treat the project as already having files
    pub existing: bool,
    /// Files are optional (informational turn)
    pub optional: bool,
    /// Config file for validation limits and scaffold paths
    pub config: Option<PathBuf>,
}

impl CheckOptions {
    fn flags(&self) -> ModeFlags {
        let require_files = !self.optional;
        ModeFlags {
            informational: self.optional,
            require_files,
            require_scaffold: require_files && self.scaffold,
            has_existing_files: self.existing,
        }
    }
}

/// Execute the check command. Returns whether the response passed.
pub fn execute(options: &CheckOptions) -> anyhow::Result<bool> {
    let config = load_config(options.config.as_deref())?;
    let text = std::fs::read_to_string(&options.response)
        .with_context(|| format!("Failed to read response file {}", options.response.display()))?;

    let flags = options.flags();
    let verdict = validate_response(&text, &flags, &config.engine);
    tracing::debug!(
        ok = verdict.ok,
        files = verdict.files.len(),
        rejected = verdict.rejected.len(),
        "Checked response"
    );

    let json = serde_json::to_string_pretty(&verdict).context("Failed to serialize verdict")?;
    println!("{json}");
    Ok(verdict.ok)
}
