//! Generation command.
//!
//! Runs the engine against a directory-backed project, rendering progress
//! while the run streams. Ctrl-C cancels the run.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use pagesmith_models::GenerationClient;
use pagesmith_orchestrator::{Conversation, DirectoryProjectStore, GenerationEngine, PagesmithConfig};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::event_renderer::{spawn_event_renderer, RenderMode};
use super::load_config;

/// Options for the generate command.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// The user's request
    pub request: String,
    /// Project directory
    pub project: PathBuf,
    /// Config file
    pub config: Option<PathBuf>,
    /// Model override
    pub model: Option<String>,
    /// Base URL override
    pub base_url: Option<String>,
    /// Deadline override in seconds
    pub deadline_secs: Option<u64>,
    /// Prior turns as JSON
    pub history: Option<PathBuf>,
    /// Print events as JSON lines
    pub json: bool,
}

impl GenerateOptions {
    /// Layer the command-line overrides on top of the loaded config.
    fn resolve_config(&self) -> anyhow::Result<PagesmithConfig> {
        let mut config = load_config(self.config.as_deref())?;
        if let Some(model) = &self.model {
            config.model.model.clone_from(model);
        }
        if let Some(url) = &self.base_url {
            config.model.base_url.clone_from(url);
        }
        if let Some(secs) = self.deadline_secs {
            config.engine.deadline_secs = secs;
        }
        if config.model.temperature.is_some() {
            config.engine.temperature = config.model.temperature;
        }
        config.engine.validate().context("Invalid engine settings")?;
        Ok(config)
    }

    fn load_history(&self) -> anyhow::Result<Conversation> {
        let Some(path) = &self.history else {
            let project_id = self
                .project
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            return Ok(Conversation::new(project_id));
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read history file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse history file {}", path.display()))
    }
}

/// Execute the generate command. Returns whether the run completed.
pub async fn execute(options: GenerateOptions) -> anyhow::Result<bool> {
    if options.request.trim().is_empty() {
        anyhow::bail!("Request must not be empty");
    }

    let config = options.resolve_config()?;
    let history = options.load_history()?;

    let client = GenerationClient::ollama(config.model.model.clone(), config.model.base_url.clone())
        .context("Failed to create generation client")?;
    let store = DirectoryProjectStore::new(&options.project);
    let engine = GenerationEngine::new(Arc::new(client), Arc::new(store), config.engine.clone())
        .with_max_tokens(config.model.max_tokens);

    info!(
        project = %options.project.display(),
        model = %config.model.model,
        base_url = %config.model.base_url,
        "Starting generation"
    );

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling run");
            interrupt.cancel();
        }
    });

    let mode = if options.json { RenderMode::JsonLines } else { RenderMode::Human };
    let (tx, rx) = mpsc::unbounded_channel();
    let renderer = spawn_event_renderer(rx, mode);

    let outcome = engine.run(&options.request, &history, &tx, cancel).await;

    drop(tx);
    ctrl_c.abort();
    if let Err(e) = renderer.await {
        warn!(error = %e, "Progress renderer stopped unexpectedly");
    }

    info!(run_id = %outcome.run_id, state = %outcome.state, attempts = outcome.attempts, "Run finished");
    Ok(outcome.is_complete())
}
