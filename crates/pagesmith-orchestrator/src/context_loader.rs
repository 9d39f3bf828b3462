//! Context file selection
//!
//! Chooses which existing project files are loaded in full into the system
//! prompt. The model nominates files in a short auxiliary exchange; when its
//! reply is unusable the scaffold files that exist are used instead.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::config::ScaffoldConfig;
use crate::files::normalize_path;
use crate::store::{FileMeta, ProjectFile, ProjectStore};

/// Parse a JSON array of paths, keeping known paths only, in reply order, at most `max`.
pub fn parse_selection(reply: &str, files: &[FileMeta], max: usize) -> Option<Vec<String>> {
    let start = reply.find('[')?;
    let end = reply.rfind(']')?;
    if end < start {
        return None;
    }
    let paths: Vec<String> = match serde_json::from_str(&reply[start..=end]) {
        Ok(paths) => paths,
        Err(e) => {
            debug!(error = %e, "Context selection reply is not a JSON array of strings");
            return None;
        }
    };

    let known: HashSet<&str> = files.iter().map(|f| f.path.as_str()).collect();
    let mut seen = HashSet::new();
    let selected: Vec<String> = paths
        .iter()
        .map(|p| normalize_path(p))
        .filter(|p| known.contains(p.as_str()) && seen.insert(p.clone()))
        .take(max)
        .collect();

    Some(selected)
}

/// Scaffold files that exist in the project, in scaffold order.
pub fn fallback_selection(files: &[FileMeta], scaffold: &ScaffoldConfig, max: usize) -> Vec<String> {
    scaffold
        .required_files()
        .into_iter()
        .filter(|path| files.iter().any(|f| &f.path == path))
        .take(max)
        .collect()
}

/// Fetch the selected files, skipping any that vanished from the store or
/// cannot be read as text.
pub async fn load_selected(store: &dyn ProjectStore, paths: &[String]) -> Vec<ProjectFile> {
    let mut loaded = Vec::with_capacity(paths.len());
    for path in paths {
        match store.get_file(path).await {
            Ok(Some(file)) => loaded.push(file),
            Ok(None) => warn!(path = %path, "Selected context file no longer exists"),
            Err(e) => warn!(path = %path, error = %e, "Skipping unreadable context file"),
        }
    }
    loaded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DirectoryProjectStore, InMemoryProjectStore};

    fn metas(paths: &[&str]) -> Vec<FileMeta> {
        paths
            .iter()
            .map(|p| FileMeta { path: (*p).to_string(), language: "text".to_string(), size: 1 })
            .collect()
    }

    #[test]
    fn test_parse_selection_keeps_known_paths() {
        let files = metas(&["index.html", "src/app.js", "src/styles.css"]);
        let reply = "I need these:\n```json\n[\"./src/app.js\", \"secret.env\", \"src/app.js\", \"index.html\"]\n```";
        assert_eq!(
            parse_selection(reply, &files, 5),
            Some(vec!["src/app.js".to_string(), "index.html".to_string()])
        );
        assert_eq!(parse_selection(reply, &files, 1), Some(vec!["src/app.js".to_string()]));
        assert_eq!(parse_selection("none needed", &files, 5), None);
        assert_eq!(parse_selection("[1, 2]", &files, 5), None);
    }

    #[test]
    fn test_fallback_uses_existing_scaffold_files() {
        let files = metas(&["src/app.js", "about.html", "index.html"]);
        assert_eq!(
            fallback_selection(&files, &ScaffoldConfig::default(), 5),
            vec!["index.html".to_string(), "src/app.js".to_string()]
        );
    }

    #[tokio::test]
    async fn test_load_selected_skips_missing() {
        let store = InMemoryProjectStore::with_files([("index.html", "<!DOCTYPE html>")]);
        let loaded = load_selected(&store, &["index.html".to_string(), "gone.js".to_string()]).await;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].path, "index.html");
    }

    #[tokio::test]
    async fn test_load_selected_skips_binary_files() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("index.html"), "<!DOCTYPE html><html></html>").unwrap();
        std::fs::write(temp_dir.path().join("logo.png"), [0x89, 0x50, 0xff, 0xfe, 0x00]).unwrap();
        let store = DirectoryProjectStore::new(temp_dir.path());

        let loaded = load_selected(&store, &["logo.png".to_string(), "index.html".to_string()]).await;

        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].path, "index.html");
    }
}
