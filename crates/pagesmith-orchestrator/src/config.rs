// Engine configuration
//
// Manages configuration for the generation engine and the model backend,
// loaded from TOML with environment overrides.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{OrchestrationError, Result};

/// Heuristic limits applied to every candidate file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationLimits {
    /// Allowed difference between `{` and `}` counts
    pub brace_tolerance: usize,
    /// Allowed difference between `[` and `]` counts
    pub bracket_tolerance: usize,
    /// Allowed difference between `(` and `)` counts
    pub paren_tolerance: usize,
    /// Minimum trimmed content length in characters
    pub min_content_chars: usize,
    /// File name prefixes that may start with a dot
    pub internal_prefixes: Vec<String>,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            brace_tolerance: 3,
            bracket_tolerance: 3,
            paren_tolerance: 5,
            min_content_chars: 10,
            internal_prefixes: vec![".pagesmith".to_string()],
        }
    }
}

/// Required files of a brand-new project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaffoldConfig {
    /// Entry markup file
    pub entry: String,
    /// Global stylesheet
    pub stylesheet: String,
    /// App-coordination script that imports components
    pub app_script: String,
    /// Directory segment marking component files
    pub components_dir: String,
}

impl Default for ScaffoldConfig {
    fn default() -> Self {
        Self {
            entry: "index.html".to_string(),
            stylesheet: "src/styles.css".to_string(),
            app_script: "src/app.js".to_string(),
            components_dir: "components".to_string(),
        }
    }
}

impl ScaffoldConfig {
    /// Scaffold paths in reporting order: entry, stylesheet, app script.
    pub fn required_files(&self) -> Vec<String> {
        vec![self.entry.clone(), self.stylesheet.clone(), self.app_script.clone()]
    }
}

/// Configuration for the generation engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum generate→validate attempts per run
    pub max_attempts: u32,
    /// Wall-clock budget for a whole run, in seconds
    pub deadline_secs: u64,
    /// Interval between heartbeat events while generating, in milliseconds
    pub heartbeat_interval_ms: u64,
    /// Emit a `generating` event every time this many more characters arrive
    pub generating_report_chars: usize,
    /// Upper bound on files the model may ask to see in full
    pub max_context_files: usize,
    /// Ask the model which existing files it needs
    pub enable_context_selection: bool,
    /// Ask the model for a short plan before generating
    pub enable_planning: bool,
    /// Fewest plan steps accepted from the model
    pub plan_min_steps: usize,
    /// Most plan steps accepted from the model
    pub plan_max_steps: usize,
    /// Sampling temperature for file generation
    pub temperature: Option<f32>,
    /// Per-file heuristics
    pub validation: ValidationLimits,
    /// Scaffold layout
    pub scaffold: ScaffoldConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            deadline_secs: 180,
            heartbeat_interval_ms: 5_000,
            generating_report_chars: 2_048,
            max_context_files: 5,
            enable_context_selection: true,
            enable_planning: true,
            plan_min_steps: 3,
            plan_max_steps: 6,
            temperature: Some(0.4),
            validation: ValidationLimits::default(),
            scaffold: ScaffoldConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Run deadline as a duration.
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    /// Heartbeat period as a duration (never zero).
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }

    /// Check internal consistency.
    ///
    /// # Errors
    /// Returns `OrchestrationError::Config` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(OrchestrationError::Config("max_attempts must be at least 1".to_string()));
        }
        if self.deadline_secs == 0 {
            return Err(OrchestrationError::Config("deadline_secs must be at least 1".to_string()));
        }
        if self.plan_min_steps == 0 || self.plan_min_steps > self.plan_max_steps {
            return Err(OrchestrationError::Config(format!(
                "plan step bounds are invalid ({}..={})",
                self.plan_min_steps, self.plan_max_steps
            )));
        }
        Ok(())
    }
}

/// Model backend settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Base URL of the Ollama-compatible server
    pub base_url: String,
    /// Model ID
    pub model: String,
    /// Sampling temperature; overrides the engine default when set
    pub temperature: Option<f32>,
    /// Maximum tokens per generation
    pub max_tokens: Option<u32>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.1".to_string(),
            temperature: None,
            max_tokens: None,
        }
    }
}

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PagesmithConfig {
    /// Model backend
    pub model: ModelSettings,
    /// Engine behaviour
    pub engine: EngineConfig,
}

impl PagesmithConfig {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load_from_toml(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            OrchestrationError::Config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Load configuration from TOML string with `[model]` and `[engine]` sections
    ///
    /// # Errors
    /// Returns error if TOML cannot be parsed or the values are inconsistent
    pub fn from_toml_str(toml_content: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_content)?;
        config.engine.validate()?;
        Ok(config)
    }

    /// Apply `PAGESMITH_*` overrides using the given variable lookup.
    ///
    /// # Errors
    /// Returns error if an override has an invalid value
    pub fn apply_env<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("PAGESMITH_BASE_URL") {
            self.model.base_url = url;
        }
        if let Some(model) = lookup("PAGESMITH_MODEL") {
            self.model.model = model;
        }
        if let Some(secs) = lookup("PAGESMITH_DEADLINE_SECS") {
            self.engine.deadline_secs = secs.trim().parse().map_err(|e| {
                OrchestrationError::Config(format!("PAGESMITH_DEADLINE_SECS is not a number: {e}"))
            })?;
        }
        self.engine.validate()?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_product_constants() {
        let config = EngineConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.max_context_files, 5);
        assert_eq!(config.validation.brace_tolerance, 3);
        assert_eq!(config.validation.bracket_tolerance, 3);
        assert_eq!(config.validation.paren_tolerance, 5);
        assert_eq!(
            config.scaffold.required_files(),
            vec!["index.html", "src/styles.css", "src/app.js"]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_str_partial_sections() {
        let toml = r#"
[model]
model = "qwen2.5-coder:7b"

[engine]
max_attempts = 2
deadline_secs = 60

[engine.validation]
paren_tolerance = 8
"#;
        let config = PagesmithConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.model.model, "qwen2.5-coder:7b");
        assert_eq!(config.model.base_url, "http://localhost:11434");
        assert_eq!(config.engine.max_attempts, 2);
        assert_eq!(config.engine.deadline(), Duration::from_secs(60));
        assert_eq!(config.engine.validation.paren_tolerance, 8);
        assert_eq!(config.engine.validation.brace_tolerance, 3);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = PagesmithConfig::from_toml_str("[engine]\nmax_attempts = 0\n").unwrap_err();
        assert!(matches!(err, OrchestrationError::Config(_)));
        assert!(PagesmithConfig::from_toml_str("[engine\n").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let config = PagesmithConfig::default()
            .apply_env(|key| match key {
                "PAGESMITH_MODEL" => Some("mistral".to_string()),
                "PAGESMITH_DEADLINE_SECS" => Some("42".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.model.model, "mistral");
        assert_eq!(config.engine.deadline_secs, 42);

        let err = PagesmithConfig::default()
            .apply_env(|key| (key == "PAGESMITH_DEADLINE_SECS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::Config(_)));
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pagesmith.toml");
        std::fs::write(&path, "[engine]\nenable_planning = false\n").unwrap();
        let config = PagesmithConfig::load_from_toml(&path).unwrap();
        assert!(!config.engine.enable_planning);
        assert!(PagesmithConfig::load_from_toml(dir.path().join("missing.toml")).is_err());
    }
}
