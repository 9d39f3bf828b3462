//! Per-file path and content checks.
//!
//! Each candidate is judged on its own. A file that passes comes back with a
//! normalised path; a file that fails becomes a [`RejectedFile`] whose reason
//! is fed back to the model on retry.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};
use tree_sitter::{Node, Parser};

use crate::config::ValidationLimits;
use crate::files::{file_name, is_markup, is_script, normalize_path, CandidateFile, RejectedFile};

const FORBIDDEN_PATH_CHARS: [char; 6] = ['<', '>', '"', '|', '?', '*'];

static MODULE_SYNTAX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^\s*(?:import(?:\s+[\w{*'"`]|\s*[{*'"`])|import\(|export\s)"#)
        .expect("module pattern is valid")
});

static DRIVE_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z]:").expect("drive pattern is valid"));

/// Check a path, returning its normalised form or the rejection reason.
pub fn check_path(raw: &str, limits: &ValidationLimits) -> Result<String, String> {
    let path = normalize_path(raw);
    if path.is_empty() {
        return Err("missing file path".to_string());
    }
    if path.starts_with('/') || DRIVE_PREFIX.is_match(&path) {
        return Err("absolute path not allowed".to_string());
    }
    if path.split('/').any(|segment| segment == "..") {
        return Err("path traversal ('..') not allowed".to_string());
    }

    let name = file_name(&path);
    if name.starts_with('.') && !limits.internal_prefixes.iter().any(|p| name.starts_with(p.as_str())) {
        return Err(format!("hidden file '{name}' not allowed"));
    }
    if path.chars().any(|c| FORBIDDEN_PATH_CHARS.contains(&c) || c.is_control()) {
        return Err("invalid character in path".to_string());
    }

    Ok(path)
}

fn placeholder_reason(content: &str) -> Option<&'static str> {
    for line in content.lines() {
        let line = line.trim();
        if line == "..." || line == "…" || line.eq_ignore_ascii_case("placeholder") || line.eq_ignore_ascii_case("tbd") {
            return Some("placeholder content");
        }
    }

    let lowered = content.to_lowercase();
    if lowered.contains("todo: implement") || lowered.contains("fixme: implement") {
        return Some("unfinished implementation marker");
    }
    None
}

fn imbalance(content: &str, open: char, close: char, tolerance: usize) -> Option<String> {
    let opened = content.chars().filter(|&c| c == open).count();
    let closed = content.chars().filter(|&c| c == close).count();
    (opened.abs_diff(closed) > tolerance)
        .then(|| format!("unbalanced '{open}{close}' ({opened} open, {closed} close)"))
}

fn first_error(node: Node<'_>) -> Option<Node<'_>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    for i in 0..node.child_count() {
        if let Some(child) = node.child(i) {
            if child.has_error() {
                return first_error(child).or(Some(child));
            }
        }
    }
    None
}

/// Best-effort syntax check of a classic (non-module) script.
///
/// Returns the line of the first parse error, 1-based.
pub fn script_error_line(source: &str) -> Option<usize> {
    let mut parser = Parser::new();
    if let Err(e) = parser.set_language(tree_sitter_typescript::language_typescript()) {
        warn!(error = ?e, "Script grammar unavailable, skipping syntax check");
        return None;
    }
    let tree = parser.parse(source, None)?;
    let root = tree.root_node();
    if !root.has_error() {
        return None;
    }
    let node = first_error(root).unwrap_or(root);
    Some(node.start_position().row + 1)
}

fn check_content(path: &str, file: &CandidateFile, limits: &ValidationLimits) -> Result<(), String> {
    let content = file.content.as_str();

    if let Some(reason) = placeholder_reason(content) {
        return Err(reason.to_string());
    }
    let length = content.trim().chars().count();
    if length < limits.min_content_chars {
        return Err(format!("content too short ({length} chars)"));
    }

    for (open, close, tolerance) in [
        ('{', '}', limits.brace_tolerance),
        ('[', ']', limits.bracket_tolerance),
        ('(', ')', limits.paren_tolerance),
    ] {
        if let Some(reason) = imbalance(content, open, close, tolerance) {
            return Err(reason);
        }
    }

    if is_markup(path, &file.language) {
        let lowered = content.to_ascii_lowercase();
        if !lowered.contains("<!doctype") && !lowered.contains("<html") {
            return Err("missing doctype or <html> root".to_string());
        }
    } else if is_script(path, &file.language) && !MODULE_SYNTAX.is_match(content) {
        if let Some(line) = script_error_line(content) {
            return Err(format!("javascript syntax error near line {line}"));
        }
    }

    Ok(())
}

/// Validate one candidate.
pub fn validate_candidate(file: &CandidateFile, limits: &ValidationLimits) -> Result<CandidateFile, RejectedFile> {
    let path = check_path(&file.path, limits).map_err(|reason| RejectedFile::new(file.path.clone(), reason))?;
    check_content(&path, file, limits).map_err(|reason| RejectedFile::new(path.clone(), reason))?;
    Ok(CandidateFile::new(path, file.content.clone(), file.language.clone()))
}

/// Split candidates into accepted and rejected, preserving order.
pub fn validate_candidates(
    files: &[CandidateFile],
    limits: &ValidationLimits,
) -> (Vec<CandidateFile>, Vec<RejectedFile>) {
    let mut accepted = Vec::new();
    let mut rejected = Vec::new();

    for file in files {
        match validate_candidate(file, limits) {
            Ok(file) => accepted.push(file),
            Err(rejection) => {
                debug!(path = %rejection.path, reason = %rejection.reason, "Rejected candidate file");
                rejected.push(rejection);
            }
        }
    }

    (accepted, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;

    const APP: &str = "function greet(name) {\n  return `Hello ${name}`;\n}\n\ndocument.addEventListener('DOMContentLoaded', () => greet('you'));";

    fn reason(path: &str, content: &str, language: &str) -> Option<String> {
        validate_candidate(&CandidateFile::new(path, content, language), &ValidationLimits::default())
            .err()
            .map(|r| r.reason)
    }

    #[test]
    fn test_path_rules() {
        let limits = ValidationLimits::default();
        assert_eq!(check_path(" ./src\\app.js", &limits), Ok("src/app.js".to_string()));
        assert_eq!(check_path("   ", &limits), Err("missing file path".to_string()));
        assert_eq!(check_path("/etc/passwd", &limits), Err("absolute path not allowed".to_string()));
        assert_eq!(check_path("C:\\site\\index.html", &limits), Err("absolute path not allowed".to_string()));
        assert!(check_path("../../etc/passwd", &limits).unwrap_err().contains("traversal"));
        assert!(check_path("src/../../x.js", &limits).unwrap_err().contains("traversal"));
        assert!(check_path(".env", &limits).unwrap_err().contains("hidden file"));
        assert!(check_path("src/.secret.js", &limits).unwrap_err().contains("hidden file"));
        assert!(check_path(".pagesmith-plan.md", &limits).is_ok());
        assert_eq!(check_path("a|b.js", &limits), Err("invalid character in path".to_string()));
        assert_eq!(check_path("a\u{7}.js", &limits), Err("invalid character in path".to_string()));
    }

    #[test]
    fn test_placeholder_checked_before_length() {
        assert_eq!(reason("notes.md", "...", "markdown").as_deref(), Some("placeholder content"));
        assert_eq!(
            reason("notes.md", "# Notes\n\nTBD\n\nMore later.", "markdown").as_deref(),
            Some("placeholder content")
        );
        assert_eq!(reason("notes.md", "short", "markdown").as_deref(), Some("content too short (5 chars)"));
    }

    #[test]
    fn test_todo_markers() {
        assert_eq!(
            reason("src/app.js", "function run() {\n  // TODO: implement\n}", "javascript").as_deref(),
            Some("unfinished implementation marker")
        );
        let mentions_todo = format!("// TODO: add dark mode later\n{APP}");
        assert_eq!(reason("src/app.js", &mentions_todo, "javascript"), None);
    }

    #[test]
    fn test_bracket_tolerances() {
        let braces = "a {{{{ b c d e f";
        assert!(reason("src/styles.css", braces, "css").unwrap().starts_with("unbalanced '{}'"));
        assert_eq!(reason("src/styles.css", "a {{{ b c d e f", "css"), None);
        assert_eq!(reason("notes.md", "((((( text here", "markdown"), None);
        assert!(reason("notes.md", "(((((( text here", "markdown").unwrap().starts_with("unbalanced '()'"));
    }

    #[test]
    fn test_markup_needs_document_root() {
        assert_eq!(
            reason("index.html", "<div>Hello there</div>", "html").as_deref(),
            Some("missing doctype or <html> root")
        );
        assert_eq!(reason("about.htm", "<!doctype html>\n<title>About</title>", ""), None);
    }

    #[test]
    fn test_classic_script_syntax_check() {
        assert_eq!(reason("src/app.js", APP, "javascript"), None);
        let broken = "const greeting = 'hi';\nlet total = ;\nconsole.log(greeting, total);";
        let message = reason("src/app.js", broken, "javascript").unwrap();
        assert!(message.starts_with("javascript syntax error near line"), "{message}");
    }

    #[test]
    fn test_module_scripts_skip_syntax_check() {
        let module = "import { mountNav } from './components/nav.js';\nlet total = ;\nmountNav();";
        assert_eq!(reason("src/app.js", module, "javascript"), None);
        let side_effect = "import './components/nav.js';\nlet total = ;";
        assert_eq!(reason("src/app.js", side_effect, "javascript"), None);
    }

    #[test]
    fn test_import_prefixed_identifier_is_not_module_syntax() {
        let classic = "importantItems();\nlet total = ;\nconsole.log(total);";
        let message = reason("src/app.js", classic, "javascript").unwrap();
        assert!(message.starts_with("javascript syntax error near line"), "{message}");
    }

    #[test]
    fn test_validate_candidates_is_idempotent() {
        let files = vec![
            CandidateFile::new("./src/app.js", APP, "javascript"),
            CandidateFile::new("../../etc/passwd", "root:x:0:0:root", "text"),
            CandidateFile::new("notes.md", "...", "markdown"),
        ];
        let limits = ValidationLimits::default();
        let (accepted, rejected) = validate_candidates(&files, &limits);
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].path, "src/app.js");
        assert_eq!(rejected.len(), 2);

        let (again, rejected_again) = validate_candidates(&accepted, &limits);
        assert_eq!(again, accepted);
        assert!(rejected_again.is_empty());
    }
}
