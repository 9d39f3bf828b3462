//! Progress renderer for generation runs.
//!
//! Drains the run's event channel and prints each event either as a human
//! line or as one JSON object per line. Rendering stops after the terminal
//! event or when the channel closes.

use colored::Colorize;
use pagesmith_orchestrator::ProgressEvent;
use tokio::sync::mpsc;

/// Output style for progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// Colored lines for a terminal
    Human,
    /// One JSON object per event
    JsonLines,
}

/// Render events until the terminal event arrives or the sender is dropped.
pub async fn render_event_stream(mut rx: mpsc::UnboundedReceiver<ProgressEvent>, mode: RenderMode) {
    while let Some(event) = rx.recv().await {
        let terminal = event.is_terminal();
        match mode {
            RenderMode::JsonLines => match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(error = %e, phase = event.phase(), "Failed to serialize event"),
            },
            RenderMode::Human => {
                if let Some(line) = human_line(&event) {
                    println!("{line}");
                }
            }
        }
        if terminal {
            break;
        }
    }
}

/// Spawn a background task rendering events.
pub fn spawn_event_renderer(
    rx: mpsc::UnboundedReceiver<ProgressEvent>,
    mode: RenderMode,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(render_event_stream(rx, mode))
}

/// Human-readable line for an event; `None` for events too chatty to print.
fn human_line(event: &ProgressEvent) -> Option<String> {
    let line = match event {
        ProgressEvent::Start { model, max_attempts, deadline_secs, .. } => format!(
            "{} {} (up to {} attempts, {}s)",
            "pagesmith".bold().cyan(),
            model.cyan(),
            max_attempts,
            deadline_secs
        ),
        ProgressEvent::Analyzing { flags } => {
            let mode = if flags.informational {
                "question"
            } else if flags.has_existing_files {
                "edit existing project"
            } else {
                "new project"
            };
            format!("  {} Request looks like: {}", "→".dimmed(), mode)
        }
        ProgressEvent::LoadingFiles { paths } => {
            format!("  {} Loading {}", "→".dimmed(), paths.join(", ").dimmed())
        }
        ProgressEvent::Plan { steps } => {
            let mut out = format!("  {} Plan:", "→".dimmed());
            for (i, step) in steps.iter().enumerate() {
                out.push_str(&format!("\n     {}. {}", i + 1, step.label));
            }
            out
        }
        ProgressEvent::Generate { attempt, max_attempts } => {
            format!("  {} Generating (attempt {}/{})", "⏳".yellow(), attempt, max_attempts)
        }
        ProgressEvent::Retry { attempt, max_attempts, feedback } => format!(
            "  {} Retrying (attempt {}/{})\n     {}",
            "↻".yellow(),
            attempt,
            max_attempts,
            feedback.lines().next().unwrap_or_default().dimmed()
        ),
        ProgressEvent::Generating { .. } | ProgressEvent::Heartbeat { .. } => return None,
        ProgressEvent::FileComplete { path, language, .. } => {
            format!("  {} {} {}", "✓".green(), path.cyan(), format!("({language})").dimmed())
        }
        ProgressEvent::StepComplete { step } => {
            format!("  {} {}", "✓".green(), step.label.dimmed())
        }
        ProgressEvent::Validate { attempt, verdict } => {
            if verdict.ok {
                format!("  {} Attempt {} passed validation", "✓".green(), attempt)
            } else {
                format!(
                    "  {} Attempt {} rejected: {}",
                    "✗".red(),
                    attempt,
                    verdict.reason.as_deref().unwrap_or("unknown reason")
                )
            }
        }
        ProgressEvent::Timeout { elapsed_secs, attempt, .. } => format!(
            "\n{} after {:.1}s (attempt {})",
            "⚠ Timed out".yellow().bold(),
            elapsed_secs,
            attempt
        ),
        ProgressEvent::Complete { attempts, files, .. } => format!(
            "\n{} {} file(s) written in {} attempt(s): {}",
            "✓ Completed".green().bold(),
            files.len(),
            attempts,
            files.join(", ")
        ),
        ProgressEvent::Failed { attempts, verdict, error, .. } => {
            let detail = error
                .clone()
                .or_else(|| verdict.as_ref().and_then(|v| v.reason.clone()))
                .unwrap_or_default();
            format!("\n{} after {} attempt(s): {}", "✗ Failed".red().bold(), attempts, detail)
        }
        ProgressEvent::Cancelled { attempt } => {
            format!("\n{} during attempt {}", "✗ Cancelled".red().bold(), attempt)
        }
    };
    Some(line)
}
