//! Whole-answer validation.
//!
//! Applies the turn's requirements to the accepted file set and produces a
//! single [`ValidationVerdict`]. Everything here is a pure function of its
//! inputs, so validating the same text twice gives the same verdict.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::config::{EngineConfig, ScaffoldConfig};
use crate::extraction::extract_files;
use crate::files::{is_script, CandidateFile, RejectedFile};
use crate::mode::ModeFlags;
use crate::validation::validate_candidates;

/// Reason attached to component files the app script does not reference.
pub const NOT_IMPORTED: &str = "not imported";

/// Result of validating one attempt's output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    /// Whether the attempt is acceptable
    pub ok: bool,
    /// Why the attempt failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Accepted files
    pub files: Vec<CandidateFile>,
    /// Rejected files with reasons
    pub rejected: Vec<RejectedFile>,
    /// Files the turn had to produce
    pub required: Vec<String>,
    /// Required files that were not produced
    pub missing: Vec<String>,
}

impl ValidationVerdict {
    /// Paths of the accepted files.
    pub fn file_paths(&self) -> Vec<String> {
        self.files.iter().map(|f| f.path.clone()).collect()
    }
}

fn parent_dir(path: &str) -> &str {
    path.rfind('/').map_or("", |idx| &path[..idx])
}

fn strip_extension(path: &str) -> &str {
    let name_start = path.rfind('/').map_or(0, |idx| idx + 1);
    match path[name_start..].rfind('.') {
        Some(0) | None => path,
        Some(idx) => &path[..name_start + idx],
    }
}

/// Path of `target` relative to directory `from_dir`, with `/` separators.
fn relative_to(from_dir: &str, target: &str) -> String {
    let from: Vec<&str> = from_dir.split('/').filter(|s| !s.is_empty()).collect();
    let to: Vec<&str> = target.split('/').filter(|s| !s.is_empty()).collect();
    let common = from.iter().zip(&to).take_while(|(a, b)| a == b).count();

    let mut parts: Vec<&str> = vec![".."; from.len() - common];
    parts.extend_from_slice(&to[common..]);
    parts.join("/")
}

fn contains_reference(haystack: &str, needle: &str) -> bool {
    haystack.match_indices(needle).any(|(idx, _)| {
        haystack[idx + needle.len()..]
            .chars()
            .next()
            .is_none_or(|c| !(c.is_alphanumeric() || c == '_' || c == '-'))
    })
}

/// Whether the app script references the component through any accepted import form.
pub fn references_component(app_path: &str, app_content: &str, component_path: &str) -> bool {
    let relative = relative_to(parent_dir(app_path), component_path);
    let mut forms = vec![relative.clone()];
    // Only scripts resolve without their extension.
    if is_script(component_path, "") {
        forms.push(strip_extension(&relative).to_string());
    }
    if !relative.starts_with("../") {
        let dotted: Vec<String> = forms.iter().map(|form| format!("./{form}")).collect();
        forms.extend(dotted);
    }

    forms.iter().any(|form| contains_reference(app_content, form))
}

fn is_component(file: &CandidateFile, scaffold: &ScaffoldConfig) -> bool {
    file.path != scaffold.app_script
        && file.path.split('/').rev().skip(1).any(|segment| segment == scaffold.components_dir)
}

/// Apply the turn's requirements to the accepted set.
pub fn validate_output(
    files: Vec<CandidateFile>,
    mut rejected: Vec<RejectedFile>,
    flags: &ModeFlags,
    scaffold: &ScaffoldConfig,
) -> ValidationVerdict {
    let scaffold_files = scaffold.required_files();
    let required = if flags.require_scaffold { scaffold_files.clone() } else { Vec::new() };

    if files.is_empty() {
        let ok = (flags.has_existing_files && !flags.require_scaffold) || !flags.require_files;
        return ValidationVerdict {
            ok,
            reason: (!ok).then(|| "no valid files were produced".to_string()),
            files,
            rejected,
            required,
            missing: if ok { Vec::new() } else { scaffold_files },
        };
    }

    let mut reasons = Vec::new();
    let present: HashSet<&str> = files.iter().map(|f| f.path.as_str()).collect();
    let missing: Vec<String> = required.iter().filter(|p| !present.contains(p.as_str())).cloned().collect();
    if !missing.is_empty() {
        reasons.push(format!("missing required files: {}", missing.join(", ")));
    }

    if let Some(app) = files.iter().find(|f| f.path == scaffold.app_script) {
        let orphans: Vec<&CandidateFile> = files
            .iter()
            .filter(|f| is_component(f, scaffold) && !references_component(&app.path, &app.content, &f.path))
            .collect();
        if !orphans.is_empty() {
            let paths: Vec<&str> = orphans.iter().map(|f| f.path.as_str()).collect();
            reasons.push(format!("components not imported by {}: {}", app.path, paths.join(", ")));
            rejected.extend(orphans.iter().map(|f| RejectedFile::new(f.path.clone(), NOT_IMPORTED)));
        }
    }

    ValidationVerdict {
        ok: reasons.is_empty(),
        reason: (!reasons.is_empty()).then(|| reasons.join("; ")),
        files,
        rejected,
        required,
        missing,
    }
}

/// Extract, validate and judge a complete answer.
pub fn validate_response(text: &str, flags: &ModeFlags, config: &EngineConfig) -> ValidationVerdict {
    let report = extract_files(text);
    let (accepted, rejected) = validate_candidates(&report.files, &config.validation);
    validate_output(accepted, rejected, flags, &config.scaffold)
}
