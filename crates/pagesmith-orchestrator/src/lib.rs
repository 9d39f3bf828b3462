//! Generation orchestrator for Pagesmith.
//!
//! Turns a natural-language request into a validated set of website files:
//! the model's streamed answer is parsed into file blocks, each block is
//! checked, the whole answer is judged against the turn's requirements, and
//! failed attempts are retried with feedback until the answer passes, the
//! attempt budget runs out or the deadline elapses.

pub mod config;
pub mod context;
pub mod context_loader;
pub mod engine;
pub mod error;
pub mod extraction;
pub mod files;
pub mod mode;
pub mod output;
pub mod planner;
pub mod progress;
pub mod prompts;
pub mod run;
pub mod store;
pub mod validation;

pub use config::{EngineConfig, ModelSettings, PagesmithConfig, ScaffoldConfig, ValidationLimits};
pub use context::{Conversation, Message};
pub use engine::GenerationEngine;
pub use error::{OrchestrationError, Result};
pub use extraction::{extract_closed, extract_files, render_file_blocks, ExtractionReport};
pub use files::{CandidateFile, RejectedFile};
pub use mode::{classify, is_informational, ModeFlags};
pub use output::{validate_output, validate_response, ValidationVerdict};
pub use planner::{default_plan, parse_plan, Plan, PlanStep};
pub use progress::{ProgressEvent, ProgressSink, RecordingSink};
pub use run::{OrchestrationRun, RunOutcome, RunState};
pub use store::{DirectoryProjectStore, FileMeta, InMemoryProjectStore, ProjectFile, ProjectStore};
pub use validation::{validate_candidate, validate_candidates};
