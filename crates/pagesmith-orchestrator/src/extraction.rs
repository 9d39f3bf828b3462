//! File block extraction from generated text.
//!
//! Generated answers describe files with a marker line followed by a fenced
//! block:
//!
//! ````text
//! File: src/app.js
//! ```javascript
//! import { mountNav } from './components/nav.js';
//! ```
//! ````
//!
//! The scanner is an explicit line-state machine (`Outside` / `InFence`). A
//! regex is used only to recognise a single marker line. Inside a fence every
//! line is content, including marker-looking lines and fences with an info
//! string; only a bare triple-backtick line closes the block.

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::files::{language_for_path, normalize_language, normalize_path, CandidateFile};

const FENCE: &str = "```";

static MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:<!--|/\*+|//+|#+|-|>)?\s*\**\s*(?i:file(?:name)?|path)\s*\**\s*:\s*\**\s*`?([^\s`]+?)`?\s*\**\s*(?:-->|\*+/)?\s*$",
    )
    .expect("marker pattern is valid")
});

/// Candidates plus diagnostics from one extraction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionReport {
    /// Candidates in first-occurrence order, last content wins per path.
    pub files: Vec<CandidateFile>,
    /// Paths whose earlier block was discarded in favour of a later one.
    pub duplicates: Vec<String>,
}

#[derive(Debug)]
struct RawBlock {
    path: Option<String>,
    language: Option<String>,
    content: String,
    closed: bool,
}

#[derive(Debug)]
enum ScanState {
    Outside { pending: Option<String> },
    InFence { path: Option<String>, language: Option<String>, lines: Vec<String> },
}

/// Path named by a marker line, if the line is one.
pub fn marker_path(line: &str) -> Option<String> {
    MARKER.captures(line).map(|caps| caps[1].trim_end_matches([',', ';', ')']).to_string())
}

fn looks_like_path(token: &str) -> bool {
    !token.is_empty() && (token.contains('.') || token.contains('/')) && !token.starts_with('{')
}

/// Split a fence info string into `(language, path)`.
fn parse_fence_info(info: &str) -> (Option<String>, Option<String>) {
    let mut language = None;
    let mut path = None;

    for raw in info.split_whitespace() {
        let token = raw.trim_matches(|c| c == '`' || c == '"' || c == '\'');
        if let Some((lang, rest)) = token.split_once(':') {
            if !lang.is_empty() && looks_like_path(rest) {
                language.get_or_insert_with(|| lang.to_string());
                path.get_or_insert_with(|| rest.to_string());
                continue;
            }
        }
        if looks_like_path(token) {
            path.get_or_insert_with(|| token.to_string());
        } else if language.is_none()
            && token.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '+' || c == '_')
        {
            language = Some(token.to_string());
        }
    }

    (language, path)
}

fn scan(text: &str) -> Vec<RawBlock> {
    let mut blocks = Vec::new();
    let mut state = ScanState::Outside { pending: None };

    for line in text.lines() {
        let trimmed = line.trim();
        state = match state {
            ScanState::Outside { pending } => {
                if let Some(info) = trimmed.strip_prefix(FENCE) {
                    let (language, fence_path) = parse_fence_info(info);
                    ScanState::InFence {
                        path: fence_path.or(pending),
                        language,
                        lines: Vec::new(),
                    }
                } else if let Some(path) = marker_path(line) {
                    ScanState::Outside { pending: Some(path) }
                } else {
                    ScanState::Outside { pending }
                }
            }
            ScanState::InFence { path, language, mut lines } => {
                if trimmed == FENCE {
                    blocks.push(RawBlock {
                        path,
                        language,
                        content: lines.join("\n"),
                        closed: true,
                    });
                    ScanState::Outside { pending: None }
                } else {
                    lines.push(line.to_string());
                    ScanState::InFence { path, language, lines }
                }
            }
        };
    }

    if let ScanState::InFence { path, language, lines } = state {
        blocks.push(RawBlock { path, language, content: lines.join("\n"), closed: false });
    }

    blocks
}

fn assemble(blocks: Vec<RawBlock>, include_unclosed: bool) -> ExtractionReport {
    let mut report = ExtractionReport::default();
    let mut index: HashMap<String, usize> = HashMap::new();

    for block in blocks {
        if block.path.is_none() && block.language.is_none() {
            // Untagged, unnamed fences are illustrative snippets.
            continue;
        }
        if !block.closed && !include_unclosed {
            continue;
        }

        let path = normalize_path(block.path.as_deref().unwrap_or_default());
        let language = block
            .language
            .as_deref()
            .map(normalize_language)
            .unwrap_or_else(|| language_for_path(&path));
        let candidate = CandidateFile::new(path.clone(), block.content.trim_end(), language);

        if path.is_empty() {
            report.files.push(candidate);
            continue;
        }

        match index.get(&path) {
            Some(&pos) => {
                debug!(path = %path, "Discarding earlier block for duplicated path");
                report.duplicates.push(path);
                report.files[pos] = candidate;
            }
            None => {
                index.insert(path, report.files.len());
                report.files.push(candidate);
            }
        }
    }

    report
}

/// Extract every file block from the full text, flushing an unclosed final fence.
pub fn extract_files(text: &str) -> ExtractionReport {
    assemble(scan(text), true)
}

/// Extract only blocks whose closing fence has been seen.
///
/// Used while the text is still streaming; a trailing incomplete line is ignored.
pub fn extract_closed(text: &str) -> ExtractionReport {
    let complete = match text.rfind('\n') {
        Some(end) => &text[..=end],
        None => "",
    };
    assemble(scan(complete), false)
}

/// Serialise candidates back into the marker + fence form.
pub fn render_file_blocks(files: &[CandidateFile]) -> String {
    let mut out = String::new();
    for file in files {
        let _ = write!(out, "File: {}\n{FENCE}{}\n{}\n{FENCE}\n\n", file.path, file.language, file.content);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_marker_variants() {
        for line in [
            "File: src/app.js",
            "  path: src/app.js",
            "// File: src/app.js",
            "<!-- File: src/app.js -->",
            "/* File: src/app.js */",
            "### File: `src/app.js`",
            "**File:** src/app.js",
            "**File: src/app.js**",
            "# filename: src/app.js",
        ] {
            assert_eq!(marker_path(line).as_deref(), Some("src/app.js"), "line: {line}");
        }
        assert_eq!(marker_path("File: the main page"), None);
        assert_eq!(marker_path("Profile: admin"), None);
    }

    #[test]
    fn test_marker_then_fence() {
        let text = "Here you go.\n\nFile: index.html\n```html\n<!DOCTYPE html>\n<html></html>\n```\n\nFile: src/styles.css\n```css\nbody { margin: 0; }   \n\n```\n";
        let report = extract_files(text);
        assert_eq!(
            report.files,
            vec![
                CandidateFile::new("index.html", "<!DOCTYPE html>\n<html></html>", "html"),
                CandidateFile::new("src/styles.css", "body { margin: 0; }", "css"),
            ]
        );
    }

    #[test]
    fn test_fence_filename_forms() {
        let text = "```js src/app.js\nlet a = 1;\n```\n```src/b.js\nlet b = 2;\n```\n```css:src/c.css\np {}\n```\n";
        let files = extract_files(text).files;
        assert_eq!(files[0].path, "src/app.js");
        assert_eq!(files[0].language, "javascript");
        assert_eq!(files[1].path, "src/b.js");
        assert_eq!(files[1].language, "javascript");
        assert_eq!(files[2].path, "src/c.css");
        assert_eq!(files[2].language, "css");
    }

    #[test]
    fn test_markers_inside_fence_are_content() {
        let text = "File: notes.md\n```markdown\nFile: not-a-marker.js\n```js\n```\n";
        let report = extract_files(text);
        assert_eq!(report.files.len(), 1);
        assert_eq!(report.files[0].content, "File: not-a-marker.js\n```js");
    }

    #[test]
    fn test_untagged_unnamed_fence_is_ignored() {
        let text = "Run this:\n```\nnpm start\n```\n";
        assert!(extract_files(text).files.is_empty());
    }

    #[test]
    fn test_tagged_unnamed_fence_yields_empty_path() {
        let text = "```javascript\nconsole.log('hi');\n```\n";
        let files = extract_files(text).files;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "");
    }

    #[test]
    fn test_unclosed_fence_is_flushed_at_end() {
        let text = "File: src/app.js\n```js\nconst x = 1;\nconst y = 2;";
        let files = extract_files(text).files;
        assert_eq!(files, vec![CandidateFile::new("src/app.js", "const x = 1;\nconst y = 2;", "javascript")]);
        assert!(extract_closed(text).files.is_empty());
    }

    #[test]
    fn test_extract_closed_ignores_partial_last_line() {
        let text = "File: a.js\n```js\nlet a = 1;\n```";
        assert!(extract_closed(text).files.is_empty());
        assert_eq!(extract_closed(&format!("{text}\n")).files.len(), 1);
    }

    #[test]
    fn test_last_duplicate_wins_in_first_position() {
        let text = "File: a.js\n```js\nold\n```\nFile: b.css\n```css\nb\n```\nFile: ./a.js\n```js\nnew\n```\n";
        let report = extract_files(text);
        assert_eq!(report.files.len(), 2);
        assert_eq!(report.files[0].path, "a.js");
        assert_eq!(report.files[0].content, "new");
        assert_eq!(report.duplicates, vec!["a.js".to_string()]);
    }

    #[test]
    fn test_doubled_slashes_name_the_same_file() {
        let text = "File: src//app.js\n```js\nold\n```\nFile: src/app.js\n```js\nnew\n```\n";
        let report = extract_files(text);
        assert_eq!(report.files.len(), 1);
        assert_eq!(report.files[0].path, "src/app.js");
        assert_eq!(report.files[0].content, "new");
    }

    #[test]
    fn test_pending_marker_replaced_by_newer_marker() {
        let text = "File: first.js\nActually, this one:\nFile: second.js\n```js\nlet s = 1;\n```\n";
        assert_eq!(extract_files(text).files[0].path, "second.js");
    }

    #[test]
    fn test_crlf_input() {
        let text = "File: a.css\r\n```css\r\np { color: red; }\r\n```\r\n";
        assert_eq!(extract_files(text).files[0].content, "p { color: red; }");
    }

    fn file_strategy() -> impl Strategy<Value = CandidateFile> {
        (
            "[a-z]{1,6}(/[a-z]{1,6})?",
            prop::sample::select(vec!["js", "css", "html"]),
            prop::collection::vec("[a-zA-Z0-9 (){};=<>]{0,24}", 1..6),
        )
            .prop_map(|(stem, ext, lines)| {
                let path = format!("{stem}.{ext}");
                let language = language_for_path(&path);
                CandidateFile::new(path, lines.join("\n").trim_end(), language)
            })
    }

    proptest! {
        #[test]
        fn test_render_then_extract_round_trips(files in prop::collection::vec(file_strategy(), 0..6)) {
            let mut expected: Vec<CandidateFile> = Vec::new();
            for file in &files {
                match expected.iter_mut().find(|f| f.path == file.path) {
                    Some(existing) => *existing = file.clone(),
                    None => expected.push(file.clone()),
                }
            }

            let first = extract_files(&render_file_blocks(&files)).files;
            prop_assert_eq!(&first, &expected);
            let second = extract_files(&render_file_blocks(&first)).files;
            prop_assert_eq!(second, first);
        }
    }
}
