//! Planner for breaking a request into a short ordered checklist
//!
//! The plan is advisory: it is shown to the model in the system prompt and
//! its steps are ticked off as matching files are emitted, so the progress
//! sink can show how far a run has got.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ScaffoldConfig;
use crate::files::{file_name, file_stem};

/// One step of a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    /// Stable identifier (`step-1`, `step-2`, ...)
    pub id: String,
    /// Human-readable description
    pub label: String,
    /// Whether the step is complete
    pub done: bool,
}

impl PlanStep {
    fn new(index: usize, label: impl Into<String>) -> Self {
        Self { id: format!("step-{}", index + 1), label: label.into(), done: false }
    }

    fn mentions(&self, path: &str) -> bool {
        let label = self.label.to_lowercase();
        let name = file_name(path).to_lowercase();
        let stem = file_stem(path).to_lowercase();
        (!name.is_empty() && label.contains(&name)) || (stem.chars().count() >= 3 && label.contains(&stem))
    }
}

/// Ordered plan for one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Steps in execution order
    pub steps: Vec<PlanStep>,
}

impl Plan {
    /// Build a plan from labels.
    pub fn from_labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { steps: labels.into_iter().enumerate().map(|(i, label)| PlanStep::new(i, label)).collect() }
    }

    /// Mark steps that mention `path` as done, returning the ones that just completed.
    pub fn mark_for_file(&mut self, path: &str) -> Vec<PlanStep> {
        let mut completed = Vec::new();
        for step in self.steps.iter_mut().filter(|s| !s.done) {
            if step.mentions(path) {
                step.done = true;
                completed.push(step.clone());
            }
        }
        completed
    }

    /// Mark every remaining step as done, returning them.
    pub fn complete_all(&mut self) -> Vec<PlanStep> {
        let mut completed = Vec::new();
        for step in self.steps.iter_mut().filter(|s| !s.done) {
            step.done = true;
            completed.push(step.clone());
        }
        completed
    }

    /// Whether every step is done.
    pub fn is_complete(&self) -> bool {
        self.steps.iter().all(|s| s.done)
    }
}

/// Plan used when the model's plan is unusable.
pub fn default_plan(require_scaffold: bool, scaffold: &ScaffoldConfig) -> Plan {
    if require_scaffold {
        Plan::from_labels([
            format!("Lay out the page structure in {}", file_name(&scaffold.entry)),
            format!("Style the page in {}", file_name(&scaffold.stylesheet)),
            format!("Wire up behaviour in {}", file_name(&scaffold.app_script)),
            "Check that the pieces work together".to_string(),
        ])
    } else {
        Plan::from_labels([
            "Review the relevant existing files",
            "Apply the requested changes",
            "Check that the result is consistent",
        ])
    }
}

/// Internal structure for parsing the model's plan reply
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PlanResponse {
    Wrapped { steps: Vec<StepResponse> },
    Bare(Vec<StepResponse>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StepResponse {
    Label(String),
    Object {
        #[serde(alias = "title", alias = "description", alias = "step")]
        label: String,
    },
}

impl StepResponse {
    fn into_label(self) -> String {
        match self {
            Self::Label(label) | Self::Object { label } => label.trim().to_string(),
        }
    }
}

/// Slice out the outermost JSON object or array from a reply that may carry prose or fences.
fn json_slice(reply: &str) -> Option<&str> {
    let start = reply.find(['{', '['])?;
    let close = if reply[start..].starts_with('{') { '}' } else { ']' };
    let end = reply.rfind(close)?;
    (end > start).then(|| &reply[start..=end])
}

/// Parse a plan reply, accepting it only if it has `min..=max` non-empty steps.
pub fn parse_plan(reply: &str, min: usize, max: usize) -> Option<Plan> {
    let json = json_slice(reply)?;
    let parsed: PlanResponse = match serde_json::from_str(json) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!(error = %e, "Plan reply is not valid JSON");
            return None;
        }
    };

    let steps = match parsed {
        PlanResponse::Wrapped { steps } | PlanResponse::Bare(steps) => steps,
    };
    let labels: Vec<String> =
        steps.into_iter().map(StepResponse::into_label).filter(|l| !l.is_empty()).collect();

    if labels.len() < min || labels.len() > max {
        debug!(count = labels.len(), min, max, "Plan step count out of range");
        return None;
    }
    Some(Plan::from_labels(labels))
}
