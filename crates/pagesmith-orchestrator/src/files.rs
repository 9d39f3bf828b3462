//! File types shared by extraction, validation and persistence.

use serde::{Deserialize, Serialize};

/// A file block extracted from generated text, not yet trusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateFile {
    /// Project-relative path as written by the model.
    pub path: String,
    /// File content, right-trimmed.
    pub content: String,
    /// Language tag (fence tag or inferred from the extension).
    pub language: String,
}

impl CandidateFile {
    /// Create a candidate.
    pub fn new(
        path: impl Into<String>,
        content: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Self { path: path.into(), content: content.into(), language: language.into() }
    }
}

/// A candidate that did not make it into the accepted set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedFile {
    /// Path as written by the model (possibly empty).
    pub path: String,
    /// Human-readable rejection reason.
    pub reason: String,
}

impl RejectedFile {
    /// Create a rejection record.
    pub fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self { path: path.into(), reason: reason.into() }
    }
}

/// Normalise a path for comparison: trim, forward slashes, no repeated
/// slashes, no leading `./`.
pub fn normalize_path(raw: &str) -> String {
    let mut path = raw.trim().replace('\\', "/");
    while path.contains("//") {
        path = path.replace("//", "/");
    }
    while let Some(rest) = path.strip_prefix("./") {
        path = rest.to_string();
    }
    path
}

/// Last path segment.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// File name without its final extension.
pub fn file_stem(path: &str) -> &str {
    let name = file_name(path);
    match name.rfind('.') {
        Some(0) | None => name,
        Some(idx) => &name[..idx],
    }
}

/// Lowercased final extension, if any.
pub fn extension(path: &str) -> Option<String> {
    let name = file_name(path);
    match name.rfind('.') {
        Some(0) | None => None,
        Some(idx) => Some(name[idx + 1..].to_ascii_lowercase()),
    }
}

/// Canonical language name for a fence tag.
pub fn normalize_language(tag: &str) -> String {
    match tag.trim().to_ascii_lowercase().as_str() {
        "js" | "mjs" | "cjs" | "jsx" | "javascript" => "javascript".to_string(),
        "ts" | "tsx" | "typescript" => "typescript".to_string(),
        "htm" | "html" | "xhtml" => "html".to_string(),
        "md" | "markdown" => "markdown".to_string(),
        "txt" | "text" | "plaintext" => "text".to_string(),
        other => other.to_string(),
    }
}

/// Language inferred from a path's extension.
pub fn language_for_path(path: &str) -> String {
    match extension(path).as_deref() {
        Some("html" | "htm") => "html",
        Some("css") => "css",
        Some("js" | "mjs" | "cjs" | "jsx") => "javascript",
        Some("ts" | "tsx") => "typescript",
        Some("json") => "json",
        Some("md" | "markdown") => "markdown",
        Some("svg") => "svg",
        _ => "text",
    }
    .to_string()
}

/// Whether a path or language denotes a script file.
pub fn is_script(path: &str, language: &str) -> bool {
    matches!(normalize_language(language).as_str(), "javascript" | "typescript")
        || matches!(extension(path).as_deref(), Some("js" | "mjs" | "cjs" | "ts"))
}

/// Whether a path or language denotes an HTML document.
pub fn is_markup(path: &str, language: &str) -> bool {
    normalize_language(language) == "html" || matches!(extension(path).as_deref(), Some("html" | "htm"))
}
