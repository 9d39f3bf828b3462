//! Request mode classification.
//!
//! Decides, without any I/O, whether a turn must produce files and whether
//! the scaffold is required.

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::context::Conversation;
use crate::files::file_name;
use crate::store::FileMeta;

const QUESTION_WORDS: &[&str] = &[
    "what", "why", "how", "when", "where", "which", "who", "is", "are", "does", "do", "can",
    "could", "should", "would", "explain", "describe",
];

const ACTION_VERBS: &[&str] = &[
    "create", "build", "add", "make", "change", "update", "fix", "implement", "remove",
    "delete", "rename", "replace", "refactor", "style", "generate", "write",
];

/// Requirements derived for one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeFlags {
    /// The turn asks a question rather than requesting a change
    pub informational: bool,
    /// The turn must produce at least one file
    pub require_files: bool,
    /// The scaffold files must all be produced
    pub require_scaffold: bool,
    /// The project already contains user files
    pub has_existing_files: bool,
}

impl ModeFlags {
    /// Derive the requirement flags from the classification.
    pub fn new(informational: bool, has_existing_files: bool) -> Self {
        let require_files = !informational;
        Self {
            informational,
            require_files,
            require_scaffold: require_files && !has_existing_files,
            has_existing_files,
        }
    }
}

fn words(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_alphanumeric() && c != '\'').filter(|w| !w.is_empty())
}

/// Whether the request contains an action verb.
pub fn has_action_verb(request: &str) -> bool {
    let lowered = request.to_lowercase();
    words(&lowered).any(|w| ACTION_VERBS.contains(&w))
}

/// Whether the request reads as a question.
pub fn is_question(request: &str) -> bool {
    let lowered = request.trim().to_lowercase();
    if lowered.ends_with('?') || lowered.starts_with("tell me") {
        return true;
    }
    words(&lowered).next().is_some_and(|first| QUESTION_WORDS.contains(&first))
}

/// A question-shaped request with no action verb.
pub fn is_informational(request: &str) -> bool {
    is_question(request) && !has_action_verb(request)
}

/// Whether any listed file belongs to the user rather than tool metadata.
pub fn has_user_files(files: &[FileMeta], internal_prefixes: &[String]) -> bool {
    files.iter().any(|f| {
        let name = file_name(&f.path);
        !internal_prefixes.iter().any(|p| name.starts_with(p.as_str()) || f.path.starts_with(p.as_str()))
    })
}

/// Classify a turn from the history, the new request and the project files.
pub fn classify(history: &Conversation, request: &str, files: &[FileMeta], config: &EngineConfig) -> ModeFlags {
    let answers_clarification = !has_action_verb(request)
        && history.trailing_assistant_turn().is_some_and(|turn| turn.content.trim_end().ends_with('?'));

    let informational = is_informational(request) && !answers_clarification;
    ModeFlags::new(informational, has_user_files(files, &config.validation.internal_prefixes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Message;

    fn meta(path: &str) -> FileMeta {
        FileMeta { path: path.to_string(), language: "text".to_string(), size: 1 }
    }

    #[test]
    fn test_informational_requests() {
        assert!(is_informational("What does app.js do?"));
        assert!(is_informational("explain the layout"));
        assert!(is_informational("Tell me about the colour palette"));
        assert!(!is_informational("Can you add a footer?"));
        assert!(!is_informational("Build a landing page for a bakery"));
        assert!(!is_informational("a blue header please"));
    }

    #[test]
    fn test_user_files_ignore_internal_metadata() {
        let prefixes = vec![".pagesmith".to_string()];
        assert!(!has_user_files(&[], &prefixes));
        assert!(!has_user_files(&[meta(".pagesmith-plan.md")], &prefixes));
        assert!(has_user_files(&[meta(".pagesmith-plan.md"), meta("index.html")], &prefixes));
    }

    #[test]
    fn test_classify_new_and_existing_projects() {
        let config = EngineConfig::default();
        let empty = Conversation::default();

        let fresh = classify(&empty, "Build a portfolio site", &[], &config);
        assert!(fresh.require_files && fresh.require_scaffold && !fresh.has_existing_files);

        let edit = classify(&empty, "Change the header colour", &[meta("index.html")], &config);
        assert!(edit.require_files && !edit.require_scaffold);

        let question = classify(&empty, "How is the nav built?", &[meta("index.html")], &config);
        assert!(question.informational && !question.require_files && !question.require_scaffold);
    }

    #[test]
    fn test_answer_to_clarifying_question_is_an_action() {
        let config = EngineConfig::default();
        let history = Conversation::new("p")
            .with_turn(Message::user("I want a site for my cafe"))
            .with_turn(Message::assistant("Sure! Which colours should it use?"));

        let flags = classify(&history, "what about warm browns?", &[], &config);
        assert!(!flags.informational);
        assert!(flags.require_scaffold);

        let settled = Conversation::new("p").with_turn(Message::assistant("Done."));
        assert!(classify(&settled, "what about warm browns?", &[], &config).informational);
    }
}
