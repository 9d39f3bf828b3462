//! Prompt text for the generation and auxiliary exchanges.

use std::fmt::Write;

use crate::config::ScaffoldConfig;
use crate::files::language_for_path;
use crate::mode::ModeFlags;
use crate::output::ValidationVerdict;
use crate::planner::Plan;
use crate::store::{FileMeta, ProjectFile};

const FORMAT_RULES: &str = "\
Output format:
- Write every file as a marker line `File: <path>` followed by a fenced code block with a language tag.
- Paths are relative to the project root, use forward slashes, and never start with `/` or contain `..`.
- Always write complete files. Never use placeholders such as `...`, `TBD` or `TODO: implement`.
- Close every code block. Write each file once.";

/// Everything the system prompt is built from.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    /// Requirements of this turn
    pub flags: &'a ModeFlags,
    /// Scaffold layout
    pub scaffold: &'a ScaffoldConfig,
    /// All project files
    pub files: &'a [FileMeta],
    /// Files loaded in full
    pub selected: &'a [ProjectFile],
    /// Plan for this run
    pub plan: Option<&'a Plan>,
}

fn mode_instructions(flags: &ModeFlags, scaffold: &ScaffoldConfig) -> String {
    if flags.informational {
        return "The user is asking a question. Answer it in prose. Only include files if the user \
                explicitly asked for a change."
            .to_string();
    }
    if flags.require_scaffold {
        return format!(
            "This is a new project. Produce at least these files: {}. Put reusable pieces under \
             `{}/` next to {} and import every component from {}.",
            scaffold.required_files().join(", "),
            scaffold.components_dir,
            scaffold.app_script,
            scaffold.app_script,
        );
    }
    format!(
        "This project already exists. Output only the files you change, each in full. If you add a \
         component under `{}/`, also output {} with the import added.",
        scaffold.components_dir, scaffold.app_script
    )
}

/// System prompt for a generation attempt.
pub fn system_prompt(ctx: &PromptContext<'_>) -> String {
    let mut prompt = String::from(
        "You are Pagesmith, a careful web developer who builds small static websites with HTML, CSS \
         and plain JavaScript modules.\n\n",
    );
    let _ = writeln!(prompt, "{}\n", mode_instructions(ctx.flags, ctx.scaffold));
    let _ = writeln!(prompt, "{FORMAT_RULES}");

    if !ctx.files.is_empty() {
        prompt.push_str("\nProject files:\n");
        for file in ctx.files {
            let _ = writeln!(prompt, "- {} ({} bytes)", file.path, file.size);
        }
    }

    for file in ctx.selected {
        let _ = write!(prompt, "\nCurrent content of {}:\n```{}\n{}\n```\n", file.path, file.language, file.content);
    }

    if let Some(plan) = ctx.plan.filter(|p| !p.steps.is_empty()) {
        prompt.push_str("\nPlan:\n");
        for (i, step) in plan.steps.iter().enumerate() {
            let _ = writeln!(prompt, "{}. {}", i + 1, step.label);
        }
    }

    prompt
}

/// Feedback for the next attempt, describing what was wrong with the previous one.
pub fn retry_feedback(verdict: Option<&ValidationVerdict>, error: Option<&str>) -> String {
    let mut feedback = String::new();

    if let Some(error) = error {
        let _ = writeln!(feedback, "The previous attempt failed: {error}");
    }

    if let Some(verdict) = verdict.filter(|v| !v.ok) {
        let _ = writeln!(
            feedback,
            "The previous answer was rejected: {}",
            verdict.reason.as_deref().unwrap_or("it did not meet the requirements")
        );
        if !verdict.missing.is_empty() {
            let _ = writeln!(feedback, "Missing files: {}", verdict.missing.join(", "));
        }
        for rejected in &verdict.rejected {
            let _ = writeln!(feedback, "- {}: {}", display_path(&rejected.path), rejected.reason);
        }
    }

    feedback.push_str("Answer again with every required file, complete, in the required format.");
    feedback
}

fn display_path(path: &str) -> &str {
    if path.is_empty() { "(unnamed block)" } else { path }
}

/// Prompt asking which existing files must be read in full.
pub fn context_selection_prompt(request: &str, files: &[FileMeta], max_files: usize) -> String {
    let mut prompt = format!(
        "A user wants to change their website. Request:\n{request}\n\nProject files:\n"
    );
    for file in files {
        let _ = writeln!(prompt, "- {} ({})", file.path, language_for_path(&file.path));
    }
    let _ = write!(
        prompt,
        "\nWhich files do you need to read in full to do this? Reply with a JSON array of at most \
         {max_files} paths from the list, for example [\"index.html\"]. Reply with the array only."
    );
    prompt
}

/// Prompt asking for a short ordered plan.
pub fn plan_prompt(request: &str, flags: &ModeFlags, min_steps: usize, max_steps: usize) -> String {
    let kind = if flags.require_scaffold { "a new website" } else { "a change to an existing website" };
    format!(
        "Plan {kind} for this request:\n{request}\n\nReply with JSON only, in the form \
         {{\"steps\": [\"...\", \"...\"]}}, with {min_steps} to {max_steps} short steps in order. \
         Mention the file each step touches."
    )
}
