//! State of one generation run.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

use crate::error::{OrchestrationError, Result};
use crate::files::CandidateFile;
use crate::output::ValidationVerdict;
use crate::planner::Plan;

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Created, nothing done yet
    Idle,
    /// Classifying, loading context and planning
    Planning,
    /// Streaming an attempt
    Generating,
    /// Validating a finished attempt
    Validating,
    /// Preparing the next attempt
    Retrying,
    /// Passed and persisted
    Complete,
    /// Attempt budget exhausted
    Failed,
    /// Deadline elapsed
    TimedOut,
    /// Cancelled by the caller
    Cancelled,
}

impl RunState {
    /// Whether the run has ended.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::TimedOut | Self::Cancelled)
    }

    /// Whether `next` may follow `self`.
    pub fn can_transition_to(self, next: Self) -> bool {
        use RunState::{Cancelled, Complete, Failed, Generating, Idle, Planning, Retrying, TimedOut, Validating};

        if self.is_terminal() {
            return false;
        }
        if matches!(next, Cancelled | TimedOut | Failed) {
            return true;
        }
        matches!(
            (self, next),
            (Idle, Planning)
                | (Planning, Generating)
                | (Generating, Validating | Retrying)
                | (Validating, Complete | Retrying)
                | (Retrying, Generating)
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Planning => "planning",
            Self::Generating => "generating",
            Self::Validating => "validating",
            Self::Retrying => "retrying",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Mutable state of one request, owned by the engine for the duration of a run.
#[derive(Debug)]
pub struct OrchestrationRun {
    /// Run ID
    pub run_id: String,
    /// Current state
    pub state: RunState,
    /// Current attempt (0 before the first attempt)
    pub attempt: u32,
    /// Attempt budget
    pub max_attempts: u32,
    /// Start time
    pub started_at: Instant,
    /// Wall-clock deadline
    pub deadline: Instant,
    /// Verdict of the last validated attempt
    pub last_verdict: Option<ValidationVerdict>,
    /// Last protocol error
    pub last_error: Option<String>,
    /// Text of the current (or last) attempt
    pub last_text: String,
    /// Paths already reported as complete during this run
    pub emitted_file_paths: HashSet<String>,
    /// Plan for this run
    pub plan: Plan,
    /// Prompt tokens across attempts
    pub prompt_tokens: u32,
    /// Completion tokens across attempts
    pub completion_tokens: u32,
    /// Whether the caller cancelled the run
    pub cancelled: bool,
}

impl OrchestrationRun {
    /// Create a run starting now.
    pub fn new(max_attempts: u32, budget: Duration) -> Self {
        let started_at = Instant::now();
        Self {
            run_id: Uuid::new_v4().to_string(),
            state: RunState::Idle,
            attempt: 0,
            max_attempts,
            started_at,
            deadline: started_at + budget,
            last_verdict: None,
            last_error: None,
            last_text: String::new(),
            emitted_file_paths: HashSet::new(),
            plan: Plan::default(),
            prompt_tokens: 0,
            completion_tokens: 0,
            cancelled: false,
        }
    }

    /// Move to `next`, refusing transitions the lifecycle does not allow.
    ///
    /// # Errors
    /// Returns `OrchestrationError::Other` for an illegal transition
    pub fn transition(&mut self, next: RunState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(OrchestrationError::Other(format!(
                "illegal run transition {} -> {}",
                self.state, next
            )));
        }
        debug!(run_id = %self.run_id, from = %self.state, to = %next, "Run state transition");
        self.state = next;
        Ok(())
    }

    /// Start the next attempt, clearing the previous attempt's text and error.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempt += 1;
        self.last_text.clear();
        self.last_error = None;
        self.attempt
    }

    /// Whether attempts remain after the current one.
    pub fn has_attempts_left(&self) -> bool {
        self.attempt < self.max_attempts
    }

    /// Whether the deadline has passed.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Time since the run started.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Record a file as reported; false if it was reported before.
    pub fn mark_emitted(&mut self, path: &str) -> bool {
        self.emitted_file_paths.insert(path.to_string())
    }
}

/// Final result of a run, mirroring its terminal event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    /// Run ID
    pub run_id: String,
    /// Terminal state
    pub state: RunState,
    /// Attempts started
    pub attempts: u32,
    /// Persisted files (empty unless complete)
    pub files: Vec<CandidateFile>,
    /// Text of the last attempt
    pub text: String,
    /// Verdict of the last validated attempt
    pub verdict: Option<ValidationVerdict>,
    /// Last error
    pub error: Option<String>,
}

impl RunOutcome {
    /// Whether the run completed.
    pub fn is_complete(&self) -> bool {
        self.state == RunState::Complete
    }
}
