// Generation engine
//
// Drives one request through classify -> context -> plan -> (generate ->
// validate -> retry)* under a wall-clock deadline, reporting every phase to a
// progress sink and persisting the files of the passing attempt.

use std::sync::Arc;

use futures::StreamExt;
use pagesmith_abstraction::{ChatMessage, Generator, ModelError, ModelParameters};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::context::Conversation;
use crate::context_loader::{fallback_selection, load_selected, parse_selection};
use crate::error::{OrchestrationError, Result};
use crate::extraction::extract_closed;
use crate::mode::{classify, ModeFlags};
use crate::output::{validate_response, ValidationVerdict};
use crate::planner::{default_plan, parse_plan};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::prompts::{context_selection_prompt, plan_prompt, retry_feedback, system_prompt, PromptContext};
use crate::run::{OrchestrationRun, RunOutcome, RunState};
use crate::store::{FileMeta, ProjectFile, ProjectStore};

/// Prior turns replayed to the model.
const HISTORY_TURNS: usize = 10;

/// How the attempt loop ended.
#[derive(Debug)]
enum DriveEnd {
    Passed(ValidationVerdict),
    Exhausted,
    Expired,
}

/// What stopped the run.
enum Interrupt {
    Cancelled,
    Deadline,
    Finished(Result<DriveEnd>),
}

/// Everything one attempt needs besides the run itself.
struct Turn<'a> {
    request: &'a str,
    history: &'a Conversation,
    flags: ModeFlags,
    files: Vec<FileMeta>,
    selected: Vec<ProjectFile>,
}

/// Engine coordinating a generator, a project store and validation.
///
/// The engine holds no per-run state; share it via `Arc` and call
/// [`GenerationEngine::run`] concurrently for independent requests.
pub struct GenerationEngine {
    /// Model producing the answers
    generator: Arc<dyn Generator>,
    /// Project files
    store: Arc<dyn ProjectStore>,
    /// Engine configuration
    config: EngineConfig,
    /// Token cap per generation
    max_tokens: Option<u32>,
}

impl GenerationEngine {
    /// Create a new engine
    pub fn new(generator: Arc<dyn Generator>, store: Arc<dyn ProjectStore>, config: EngineConfig) -> Self {
        Self { generator, store, config, max_tokens: None }
    }

    /// Create engine with default configuration
    pub fn with_defaults(generator: Arc<dyn Generator>, store: Arc<dyn ProjectStore>) -> Self {
        Self::new(generator, store, EngineConfig::default())
    }

    /// Cap the tokens of each generation.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one request to a terminal state.
    ///
    /// Exactly one terminal event (`complete`, `failed`, `timeout` or
    /// `cancelled`) is emitted, and the returned outcome mirrors it.
    pub async fn run(
        &self,
        request: &str,
        history: &Conversation,
        sink: &dyn ProgressSink,
        cancel: CancellationToken,
    ) -> RunOutcome {
        let mut run = OrchestrationRun::new(self.config.max_attempts, self.config.deadline());
        let work = cancel.child_token();
        info!(run_id = %run.run_id, model = %self.generator.model_id(), "Starting generation run");

        sink.emit(ProgressEvent::Start {
            run_id: run.run_id.clone(),
            model: self.generator.model_id().to_string(),
            max_attempts: run.max_attempts,
            deadline_secs: self.config.deadline_secs,
        });

        let deadline = run.deadline;
        let interrupt = {
            let drive = self.drive(&mut run, request, history, sink, &work);
            tokio::select! {
                biased;
                () = cancel.cancelled() => Interrupt::Cancelled,
                () = tokio::time::sleep_until(deadline) => Interrupt::Deadline,
                end = drive => Interrupt::Finished(end),
            }
        };
        work.cancel();

        match interrupt {
            Interrupt::Cancelled | Interrupt::Finished(Err(OrchestrationError::Cancelled)) => {
                self.finish_cancelled(run, sink)
            }
            Interrupt::Deadline | Interrupt::Finished(Ok(DriveEnd::Expired)) => self.finish_timed_out(run, sink),
            Interrupt::Finished(Ok(DriveEnd::Passed(verdict))) => self.finish_passed(run, verdict, sink).await,
            Interrupt::Finished(Ok(DriveEnd::Exhausted)) => self.finish_failed(run, sink),
            Interrupt::Finished(Err(e)) => {
                error!(run_id = %run.run_id, error = %e, "Generation run aborted");
                run.last_error = Some(e.to_string());
                self.finish_failed(run, sink)
            }
        }
    }

    fn finish_cancelled(&self, mut run: OrchestrationRun, sink: &dyn ProgressSink) -> RunOutcome {
        info!(run_id = %run.run_id, attempt = run.attempt, "Generation run cancelled");
        run.cancelled = true;
        force_state(&mut run, RunState::Cancelled);
        sink.emit(ProgressEvent::Cancelled { attempt: run.attempt });
        outcome(run, Vec::new())
    }

    fn finish_timed_out(&self, mut run: OrchestrationRun, sink: &dyn ProgressSink) -> RunOutcome {
        let elapsed = run.elapsed().as_secs_f64();
        warn!(run_id = %run.run_id, attempt = run.attempt, elapsed_secs = elapsed, "Generation run timed out");
        force_state(&mut run, RunState::TimedOut);
        sink.emit(ProgressEvent::Timeout {
            elapsed_secs: elapsed,
            attempt: run.attempt,
            verdict: run.last_verdict.clone(),
            text: run.last_text.clone(),
        });
        outcome(run, Vec::new())
    }

    /// Persist a passing attempt; runs outside the deadline race.
    async fn finish_passed(
        &self,
        mut run: OrchestrationRun,
        verdict: ValidationVerdict,
        sink: &dyn ProgressSink,
    ) -> RunOutcome {
        if let Err(e) = self.persist(&run, &verdict).await {
            error!(run_id = %run.run_id, error = %e, "Failed to persist generated files");
            run.last_error = Some(e.to_string());
            return self.finish_failed(run, sink);
        }
        for step in run.plan.complete_all() {
            sink.emit(ProgressEvent::StepComplete { step });
        }
        force_state(&mut run, RunState::Complete);
        self.finish_complete(run, verdict, sink)
    }

    fn finish_complete(&self, run: OrchestrationRun, verdict: ValidationVerdict, sink: &dyn ProgressSink) -> RunOutcome {
        info!(
            run_id = %run.run_id,
            attempts = run.attempt,
            files = verdict.files.len(),
            "Generation run complete"
        );
        sink.emit(ProgressEvent::Complete {
            attempts: run.attempt,
            files: verdict.file_paths(),
            text: run.last_text.clone(),
            prompt_tokens: run.prompt_tokens,
            completion_tokens: run.completion_tokens,
        });
        outcome(run, verdict.files)
    }

    fn finish_failed(&self, mut run: OrchestrationRun, sink: &dyn ProgressSink) -> RunOutcome {
        warn!(run_id = %run.run_id, attempts = run.attempt, "Generation run failed");
        force_state(&mut run, RunState::Failed);
        sink.emit(ProgressEvent::Failed {
            attempts: run.attempt,
            verdict: run.last_verdict.clone(),
            error: run.last_error.clone(),
            text: run.last_text.clone(),
        });
        outcome(run, Vec::new())
    }

    /// Everything between `start` and the terminal event.
    async fn drive(
        &self,
        run: &mut OrchestrationRun,
        request: &str,
        history: &Conversation,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<DriveEnd> {
        run.transition(RunState::Planning)?;

        let files = self.store.list_files().await?;
        let flags = classify(history, request, &files, &self.config);
        debug!(run_id = %run.run_id, flags = ?flags, file_count = files.len(), "Classified request");
        sink.emit(ProgressEvent::Analyzing { flags });

        let selected = if files.is_empty() {
            Vec::new()
        } else {
            let paths = self.select_context_files(request, &files, cancel).await;
            sink.emit(ProgressEvent::LoadingFiles { paths: paths.clone() });
            load_selected(self.store.as_ref(), &paths).await
        };

        if self.config.enable_planning && !flags.informational {
            run.plan = self.request_plan(request, &flags, cancel).await;
            sink.emit(ProgressEvent::Plan { steps: run.plan.steps.clone() });
        }

        let turn = Turn { request, history, flags, files, selected };
        self.attempt_loop(run, &turn, sink, cancel).await
    }

    async fn attempt_loop(
        &self,
        run: &mut OrchestrationRun,
        turn: &Turn<'_>,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<DriveEnd> {
        let mut feedback: Option<String> = None;

        while run.has_attempts_left() {
            if run.is_expired() {
                return Ok(DriveEnd::Expired);
            }

            let previous_text = std::mem::take(&mut run.last_text);
            let attempt = run.begin_attempt();
            run.transition(RunState::Generating)?;
            match &feedback {
                None => sink.emit(ProgressEvent::Generate { attempt, max_attempts: run.max_attempts }),
                Some(text) => {
                    info!(run_id = %run.run_id, attempt, "Retrying generation");
                    sink.emit(ProgressEvent::Retry {
                        attempt,
                        max_attempts: run.max_attempts,
                        feedback: text.clone(),
                    });
                }
            }

            let messages = self.attempt_messages(run, turn, feedback.as_deref(), &previous_text);
            if let Err(e) = self.stream_attempt(run, &messages, sink, cancel).await {
                if e == ModelError::Cancelled {
                    return Err(OrchestrationError::Cancelled);
                }
                error!(run_id = %run.run_id, attempt, error = %e, "Generation attempt failed");
                run.last_error = Some(e.to_string());
                feedback = Some(retry_feedback(None, Some(&e.to_string())));
                if run.has_attempts_left() {
                    run.transition(RunState::Retrying)?;
                }
                continue;
            }

            run.transition(RunState::Validating)?;
            let verdict = validate_response(&run.last_text, &turn.flags, &self.config);
            debug!(
                run_id = %run.run_id,
                attempt,
                ok = verdict.ok,
                accepted = verdict.files.len(),
                rejected = verdict.rejected.len(),
                "Validated attempt"
            );
            sink.emit(ProgressEvent::Validate { attempt, verdict: verdict.clone() });
            run.last_verdict = Some(verdict.clone());

            if verdict.ok {
                return Ok(DriveEnd::Passed(verdict));
            }

            feedback = Some(retry_feedback(Some(&verdict), None));
            if run.has_attempts_left() {
                run.transition(RunState::Retrying)?;
            }
        }

        Ok(DriveEnd::Exhausted)
    }

    fn attempt_messages(
        &self,
        run: &OrchestrationRun,
        turn: &Turn<'_>,
        feedback: Option<&str>,
        previous_text: &str,
    ) -> Vec<ChatMessage> {
        let system = system_prompt(&PromptContext {
            flags: &turn.flags,
            scaffold: &self.config.scaffold,
            files: &turn.files,
            selected: &turn.selected,
            plan: Some(&run.plan),
        });

        let mut messages = vec![ChatMessage::system(system)];
        messages.extend(turn.history.to_chat_messages(HISTORY_TURNS));
        messages.push(ChatMessage::user(turn.request));
        if let Some(feedback) = feedback {
            if !previous_text.trim().is_empty() {
                messages.push(ChatMessage::assistant(previous_text));
            }
            messages.push(ChatMessage::user(feedback));
        }
        messages
    }

    fn parameters(&self) -> ModelParameters {
        ModelParameters { temperature: self.config.temperature, max_tokens: self.max_tokens }
    }

    /// Stream one attempt into `run.last_text`, reporting progress as it arrives.
    async fn stream_attempt(
        &self,
        run: &mut OrchestrationRun,
        messages: &[ChatMessage],
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), ModelError> {
        let mut stream = self.generator.generate(messages, Some(self.parameters()), cancel.clone()).await?;

        let period = self.config.heartbeat_interval();
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let report_every = self.config.generating_report_chars.max(1);
        let mut chars = 0usize;
        let mut next_report = 1usize;

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    sink.emit(ProgressEvent::Heartbeat {
                        attempt: run.attempt,
                        elapsed_ms: u64::try_from(run.elapsed().as_millis()).unwrap_or(u64::MAX),
                        chars,
                    });
                }
                record = stream.next() => {
                    let Some(record) = record else { break };
                    let record = record?;

                    if let Some(tokens) = record.prompt_tokens {
                        run.prompt_tokens = run.prompt_tokens.saturating_add(tokens);
                    }
                    if let Some(tokens) = record.completion_tokens {
                        run.completion_tokens = run.completion_tokens.saturating_add(tokens);
                    }
                    if record.delta.is_empty() {
                        continue;
                    }

                    chars += record.delta.chars().count();
                    run.last_text.push_str(&record.delta);
                    if chars >= next_report {
                        sink.emit(ProgressEvent::Generating { attempt: run.attempt, chars });
                        next_report = chars + report_every;
                    }
                    if record.delta.contains('\n') {
                        report_closed_files(run, sink);
                    }
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(ModelError::Cancelled);
        }
        Ok(())
    }

    async fn persist(&self, run: &OrchestrationRun, verdict: &ValidationVerdict) -> Result<()> {
        for file in &verdict.files {
            self.store.put_file(&file.path, &file.content, &file.language).await?;
        }
        info!(run_id = %run.run_id, count = verdict.files.len(), "Persisted generated files");
        Ok(())
    }

    /// Send one auxiliary prompt and collect the whole reply.
    async fn ask(&self, prompt: String, cancel: &CancellationToken) -> std::result::Result<String, ModelError> {
        let parameters = ModelParameters { temperature: Some(0.0), max_tokens: Some(512) };
        let mut stream = self.generator.generate(&[ChatMessage::user(prompt)], Some(parameters), cancel.clone()).await?;
        let mut reply = String::new();
        while let Some(record) = stream.next().await {
            reply.push_str(&record?.delta);
        }
        Ok(reply)
    }

    async fn select_context_files(&self, request: &str, files: &[FileMeta], cancel: &CancellationToken) -> Vec<String> {
        let max = self.config.max_context_files;
        let fallback = || fallback_selection(files, &self.config.scaffold, max);
        if !self.config.enable_context_selection {
            return fallback();
        }

        match self.ask(context_selection_prompt(request, files, max), cancel).await {
            Ok(reply) => parse_selection(&reply, files, max).unwrap_or_else(|| {
                debug!("Unusable context selection reply, using scaffold files");
                fallback()
            }),
            Err(e) => {
                warn!(error = %e, "Context selection failed, using scaffold files");
                fallback()
            }
        }
    }

    async fn request_plan(&self, request: &str, flags: &ModeFlags, cancel: &CancellationToken) -> crate::planner::Plan {
        let (min, max) = (self.config.plan_min_steps, self.config.plan_max_steps);
        let fallback = || default_plan(flags.require_scaffold, &self.config.scaffold);

        match self.ask(plan_prompt(request, flags, min, max), cancel).await {
            Ok(reply) => parse_plan(&reply, min, max).unwrap_or_else(fallback),
            Err(e) => {
                warn!(error = %e, "Planning failed, using default plan");
                fallback()
            }
        }
    }
}

/// Report files whose fence closed since the last check, once per path per run.
fn report_closed_files(run: &mut OrchestrationRun, sink: &dyn ProgressSink) {
    for file in extract_closed(&run.last_text).files {
        if file.path.is_empty() || !run.mark_emitted(&file.path) {
            continue;
        }
        sink.emit(ProgressEvent::FileComplete {
            attempt: run.attempt,
            path: file.path.clone(),
            language: file.language.clone(),
        });
        for step in run.plan.mark_for_file(&file.path) {
            sink.emit(ProgressEvent::StepComplete { step });
        }
    }
}

/// Move to a terminal state; terminal states are reachable from any live state.
fn force_state(run: &mut OrchestrationRun, state: RunState) {
    if let Err(e) = run.transition(state) {
        debug!(run_id = %run.run_id, error = %e, "Run already terminal");
    }
}

fn outcome(run: OrchestrationRun, files: Vec<crate::files::CandidateFile>) -> RunOutcome {
    RunOutcome {
        run_id: run.run_id,
        state: run.state,
        attempts: run.attempt,
        files,
        text: run.last_text,
        verdict: run.last_verdict,
        error: run.last_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::RecordingSink;
    use crate::store::InMemoryProjectStore;
    use pagesmith_models::MockGenerator;

    const SITE: &str = "Here is your site.\n\nFile: index.html\n```html\n<!DOCTYPE html>\n<html><body><script type=\"module\" src=\"src/app.js\"></script></body></html>\n```\n\nFile: src/styles.css\n```css\nbody { margin: 0; }\n```\n\nFile: src/app.js\n```javascript\ndocument.title = 'Bakery';\n```\n";

    fn quiet_config() -> EngineConfig {
        EngineConfig { enable_planning: false, enable_context_selection: false, ..EngineConfig::default() }
    }

    #[tokio::test]
    async fn test_single_attempt_pass() {
        let generator = Arc::new(MockGenerator::new("mock").with_text([SITE]));
        let store = Arc::new(InMemoryProjectStore::new());
        let engine = GenerationEngine::new(generator.clone(), store.clone(), quiet_config());
        let sink = RecordingSink::new();

        let outcome = engine.run("Build a bakery site", &Conversation::default(), &sink, CancellationToken::new()).await;

        assert!(outcome.is_complete(), "{outcome:?}");
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.files.len(), 3);
        assert_eq!(store.list_files().await.unwrap().len(), 3);
        assert_eq!(
            sink.phases(),
            vec![
                "start",
                "analyzing",
                "generate",
                "generating",
                "file_complete",
                "file_complete",
                "file_complete",
                "validate",
                "complete"
            ]
        );
    }

    #[tokio::test]
    async fn test_protocol_error_counts_as_attempt() {
        let generator = Arc::new(
            MockGenerator::new("mock")
                .with_reply(pagesmith_models::ScriptedReply::StartError(ModelError::Api {
                    status: 500,
                    message: "overloaded".to_string(),
                }))
                .with_text([SITE]),
        );
        let engine = GenerationEngine::new(generator.clone(), Arc::new(InMemoryProjectStore::new()), quiet_config());
        let sink = RecordingSink::new();

        let outcome = engine.run("Build a bakery site", &Conversation::default(), &sink, CancellationToken::new()).await;

        assert!(outcome.is_complete());
        assert_eq!(outcome.attempts, 2);
        let retry = sink.events().into_iter().find_map(|e| match e {
            ProgressEvent::Retry { feedback, .. } => Some(feedback),
            _ => None,
        });
        assert!(retry.unwrap().starts_with("The previous attempt failed:"));
        let second_call = &generator.calls()[1];
        assert_eq!(second_call.last().unwrap().role, "user");
    }

    #[tokio::test]
    async fn test_informational_turn_on_existing_project() {
        let generator = Arc::new(MockGenerator::new("mock").with_text(["The header lives in index.html."]));
        let store = Arc::new(InMemoryProjectStore::with_files([("index.html", "<!DOCTYPE html><html></html>")]));
        let engine = GenerationEngine::new(generator.clone(), store, quiet_config());
        let sink = RecordingSink::new();

        let outcome = engine.run("Where is the header?", &Conversation::default(), &sink, CancellationToken::new()).await;

        assert!(outcome.is_complete());
        assert!(outcome.files.is_empty());
        assert_eq!(outcome.text, "The header lives in index.html.");
        assert!(sink.phases().contains(&"loading_files"));
        assert!(!sink.phases().contains(&"plan"));
    }
}
