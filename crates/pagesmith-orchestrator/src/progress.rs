//! Progress reporting for generation runs.
//!
//! This module defines the phase events a run emits and the sinks that can
//! receive them. Every run emits exactly one terminal event (`timeout`,
//! `complete`, `failed` or `cancelled`) and nothing after it.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::trace;

use crate::mode::ModeFlags;
use crate::output::ValidationVerdict;
use crate::planner::PlanStep;

/// Phase events emitted during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// The run has started.
    Start {
        /// Run ID.
        run_id: String,
        /// Model generating the answer.
        model: String,
        /// Attempt budget.
        max_attempts: u32,
        /// Wall-clock budget in seconds.
        deadline_secs: u64,
    },
    /// The request has been classified.
    Analyzing {
        /// Derived requirements.
        flags: ModeFlags,
    },
    /// Existing files are being loaded into context.
    LoadingFiles {
        /// Paths loaded in full.
        paths: Vec<String>,
    },
    /// The plan for this run.
    Plan {
        /// Steps in order.
        steps: Vec<PlanStep>,
    },
    /// The first attempt is starting.
    Generate {
        /// Attempt number (1-based).
        attempt: u32,
        /// Attempt budget.
        max_attempts: u32,
    },
    /// A later attempt is starting after a failure.
    Retry {
        /// Attempt number (1-based).
        attempt: u32,
        /// Attempt budget.
        max_attempts: u32,
        /// Feedback sent to the model.
        feedback: String,
    },
    /// Text is arriving.
    Generating {
        /// Attempt number.
        attempt: u32,
        /// Characters received so far in this attempt.
        chars: usize,
    },
    /// A file block closed during streaming.
    FileComplete {
        /// Attempt number.
        attempt: u32,
        /// File path.
        path: String,
        /// Language tag.
        language: String,
    },
    /// A plan step was satisfied.
    StepComplete {
        /// The completed step.
        step: PlanStep,
    },
    /// Periodic liveness signal while generating.
    Heartbeat {
        /// Attempt number.
        attempt: u32,
        /// Milliseconds since the run started.
        elapsed_ms: u64,
        /// Characters received so far in this attempt.
        chars: usize,
    },
    /// An attempt has been validated.
    Validate {
        /// Attempt number.
        attempt: u32,
        /// Verdict for the attempt.
        verdict: ValidationVerdict,
    },
    /// The deadline elapsed.
    Timeout {
        /// Seconds since the run started.
        elapsed_secs: f64,
        /// Attempt in progress.
        attempt: u32,
        /// Verdict of the last validated attempt.
        verdict: Option<ValidationVerdict>,
        /// Text received so far in the current attempt.
        text: String,
    },
    /// The run passed and its files were persisted.
    Complete {
        /// Attempts used.
        attempts: u32,
        /// Persisted file paths.
        files: Vec<String>,
        /// Full answer text of the passing attempt.
        text: String,
        /// Prompt tokens across attempts.
        prompt_tokens: u32,
        /// Completion tokens across attempts.
        completion_tokens: u32,
    },
    /// The attempt budget is exhausted.
    Failed {
        /// Attempts used.
        attempts: u32,
        /// Verdict of the last validated attempt.
        verdict: Option<ValidationVerdict>,
        /// Last protocol error.
        error: Option<String>,
        /// Text of the last attempt.
        text: String,
    },
    /// The caller cancelled the run.
    Cancelled {
        /// Attempt in progress.
        attempt: u32,
    },
}

impl ProgressEvent {
    /// Serialized phase name.
    pub fn phase(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Analyzing { .. } => "analyzing",
            Self::LoadingFiles { .. } => "loading_files",
            Self::Plan { .. } => "plan",
            Self::Generate { .. } => "generate",
            Self::Retry { .. } => "retry",
            Self::Generating { .. } => "generating",
            Self::FileComplete { .. } => "file_complete",
            Self::StepComplete { .. } => "step_complete",
            Self::Heartbeat { .. } => "heartbeat",
            Self::Validate { .. } => "validate",
            Self::Timeout { .. } => "timeout",
            Self::Complete { .. } => "complete",
            Self::Failed { .. } => "failed",
            Self::Cancelled { .. } => "cancelled",
        }
    }

    /// Whether this event ends the run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Complete { .. } | Self::Failed { .. } | Self::Cancelled { .. }
        )
    }
}

/// Receiver of progress events.
///
/// Emission never blocks and never fails the run; a sink whose consumer went
/// away silently drops events.
pub trait ProgressSink: Send + Sync {
    /// Deliver one event.
    fn emit(&self, event: ProgressEvent);
}

impl ProgressSink for mpsc::UnboundedSender<ProgressEvent> {
    fn emit(&self, event: ProgressEvent) {
        let _ = self.send(event);
    }
}

impl ProgressSink for broadcast::Sender<ProgressEvent> {
    fn emit(&self, event: ProgressEvent) {
        // Err only means there are no subscribers right now.
        let _ = self.send(event);
    }
}

/// Sink that keeps every event, for tests and offline inspection.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    /// Creates an empty recording sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the events received so far.
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }

    /// Phase names of the events received so far.
    pub fn phases(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .map(ProgressEvent::phase)
            .collect()
    }
}

impl ProgressSink for RecordingSink {
    fn emit(&self, event: ProgressEvent) {
        trace!(phase = event.phase(), "Recorded progress event");
        self.events.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialized_phase_tag() {
        let event = ProgressEvent::FileComplete {
            attempt: 1,
            path: "index.html".to_string(),
            language: "html".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["phase"], "file_complete");
        assert_eq!(json["path"], "index.html");
        assert_eq!(event.phase(), "file_complete");

        let parsed: ProgressEvent = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_terminal_events() {
        assert!(ProgressEvent::Cancelled { attempt: 1 }.is_terminal());
        assert!(!ProgressEvent::Generate { attempt: 1, max_attempts: 3 }.is_terminal());
    }

    #[tokio::test]
    async fn test_channel_sinks() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.emit(ProgressEvent::Cancelled { attempt: 2 });
        assert_eq!(rx.recv().await, Some(ProgressEvent::Cancelled { attempt: 2 }));

        let (btx, mut brx) = broadcast::channel(8);
        btx.emit(ProgressEvent::Generating { attempt: 1, chars: 10 });
        assert_eq!(brx.recv().await.unwrap().phase(), "generating");

        drop(brx);
        btx.emit(ProgressEvent::Cancelled { attempt: 1 });
    }

    #[test]
    fn test_recording_sink() {
        let sink = RecordingSink::new();
        sink.emit(ProgressEvent::Generate { attempt: 1, max_attempts: 3 });
        sink.emit(ProgressEvent::Cancelled { attempt: 1 });
        assert_eq!(sink.phases(), vec!["generate", "cancelled"]);
        assert_eq!(sink.events().len(), 2);
    }
}
