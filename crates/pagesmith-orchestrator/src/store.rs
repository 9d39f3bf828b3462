//! Project file storage.
//!
//! The engine reads the current project through [`ProjectStore`] and writes
//! accepted files back through it once a run passes validation.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{OrchestrationError, Result};
use crate::files::{language_for_path, normalize_path};

/// Directories never listed by [`DirectoryProjectStore`].
const SKIPPED_DIRS: [&str; 3] = ["node_modules", "target", "dist"];

/// Store-side metadata of a project file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    /// Project-relative path with `/` separators
    pub path: String,
    /// Language inferred from the extension
    pub language: String,
    /// Size in bytes
    pub size: u64,
}

/// A project file with its content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectFile {
    /// Project-relative path with `/` separators
    pub path: String,
    /// File content
    pub content: String,
    /// Language tag
    pub language: String,
    /// Last write time
    pub updated_at: DateTime<Utc>,
}

impl ProjectFile {
    /// Metadata view of this file.
    pub fn meta(&self) -> FileMeta {
        FileMeta {
            path: self.path.clone(),
            language: self.language.clone(),
            size: self.content.len() as u64,
        }
    }
}

/// Read/write access to one project's files.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// All files, sorted by path.
    async fn list_files(&self) -> Result<Vec<FileMeta>>;

    /// One file, or `None` if it does not exist.
    async fn get_file(&self, path: &str) -> Result<Option<ProjectFile>>;

    /// Create or replace a file.
    async fn put_file(&self, path: &str, content: &str, language: &str) -> Result<FileMeta>;
}

/// In-memory store, used by tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryProjectStore {
    files: RwLock<BTreeMap<String, ProjectFile>>,
}

impl InMemoryProjectStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with `(path, content)` pairs.
    pub fn with_files<I, P, C>(files: I) -> Self
    where
        I: IntoIterator<Item = (P, C)>,
        P: AsRef<str>,
        C: Into<String>,
    {
        let files = files
            .into_iter()
            .map(|(path, content)| {
                let path = normalize_path(path.as_ref());
                let file = ProjectFile {
                    language: language_for_path(&path),
                    path: path.clone(),
                    content: content.into(),
                    updated_at: Utc::now(),
                };
                (path, file)
            })
            .collect();
        Self { files: RwLock::new(files) }
    }

    /// Copy of every stored file.
    pub async fn snapshot(&self) -> Vec<ProjectFile> {
        self.files.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl ProjectStore for InMemoryProjectStore {
    async fn list_files(&self) -> Result<Vec<FileMeta>> {
        Ok(self.files.read().await.values().map(ProjectFile::meta).collect())
    }

    async fn get_file(&self, path: &str) -> Result<Option<ProjectFile>> {
        Ok(self.files.read().await.get(&normalize_path(path)).cloned())
    }

    async fn put_file(&self, path: &str, content: &str, language: &str) -> Result<FileMeta> {
        let path = normalize_path(path);
        let file = ProjectFile {
            path: path.clone(),
            content: content.to_string(),
            language: language.to_string(),
            updated_at: Utc::now(),
        };
        let meta = file.meta();
        self.files.write().await.insert(path, file);
        Ok(meta)
    }
}

/// Store backed by a directory on disk.
#[derive(Debug, Clone)]
pub struct DirectoryProjectStore {
    root: PathBuf,
}

impl DirectoryProjectStore {
    /// Creates a store rooted at `root`. The directory is created on first write.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a project path, refusing anything that would leave the root.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let normalized = normalize_path(path);
        let relative = Path::new(&normalized);
        if normalized.is_empty()
            || !relative.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(OrchestrationError::Store(format!("path '{path}' escapes the project root")));
        }
        Ok(self.root.join(relative))
    }

    fn relative_path(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<_> = relative.components().map(|c| c.as_os_str().to_string_lossy().into_owned()).collect();
        Some(parts.join("/"))
    }
}

#[async_trait]
impl ProjectStore for DirectoryProjectStore {
    async fn list_files(&self) -> Result<Vec<FileMeta>> {
        let mut files = Vec::new();
        if !tokio::fs::try_exists(&self.root).await? {
            return Ok(files);
        }

        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    if !name.starts_with('.') && !SKIPPED_DIRS.contains(&name.as_str()) {
                        pending.push(entry.path());
                    }
                } else if file_type.is_file() {
                    if let Some(path) = self.relative_path(&entry.path()) {
                        let size = entry.metadata().await?.len();
                        files.push(FileMeta { language: language_for_path(&path), path, size });
                    }
                }
            }
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    async fn get_file(&self, path: &str) -> Result<Option<ProjectFile>> {
        let full = self.resolve(path)?;
        let content = match tokio::fs::read_to_string(&full).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let updated_at = tokio::fs::metadata(&full)
            .await?
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        let path = normalize_path(path);

        Ok(Some(ProjectFile { language: language_for_path(&path), path, content, updated_at }))
    }

    async fn put_file(&self, path: &str, content: &str, language: &str) -> Result<FileMeta> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, content).await?;
        debug!(path = %path, bytes = content.len(), "Wrote project file");

        Ok(FileMeta {
            path: normalize_path(path),
            language: language.to_string(),
            size: content.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_in_memory_round_trip() {
        let store = InMemoryProjectStore::with_files([("./index.html", "<!DOCTYPE html>")]);
        store.put_file("src/app.js", "console.log(1);", "javascript").await.unwrap();

        let listed = store.list_files().await.unwrap();
        assert_eq!(listed.iter().map(|f| f.path.as_str()).collect::<Vec<_>>(), vec!["index.html", "src/app.js"]);
        assert_eq!(listed[0].language, "html");

        let file = store.get_file("src/app.js").await.unwrap().unwrap();
        assert_eq!(file.content, "console.log(1);");
        assert!(store.get_file("missing.js").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_directory_store_lists_and_writes() {
        let temp_dir = TempDir::new().unwrap();
        let store = DirectoryProjectStore::new(temp_dir.path());
        assert!(store.list_files().await.unwrap().is_empty());

        store.put_file("src/components/nav.js", "export const nav = 1;", "javascript").await.unwrap();
        store.put_file("index.html", "<!DOCTYPE html>", "html").await.unwrap();
        tokio::fs::create_dir_all(temp_dir.path().join(".git")).await.unwrap();
        tokio::fs::write(temp_dir.path().join(".git/HEAD"), "ref").await.unwrap();

        let listed = store.list_files().await.unwrap();
        let paths: Vec<_> = listed.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["index.html", "src/components/nav.js"]);
        assert_eq!(listed[1].size, 21);

        let file = store.get_file("./src/components/nav.js").await.unwrap().unwrap();
        assert_eq!(file.path, "src/components/nav.js");
        assert_eq!(file.language, "javascript");
    }

    #[tokio::test]
    async fn test_directory_store_refuses_escape() {
        let temp_dir = TempDir::new().unwrap();
        let store = DirectoryProjectStore::new(temp_dir.path().join("site"));

        for path in ["../outside.txt", "/etc/passwd", "a/../../b.txt", ""] {
            let err = store.put_file(path, "x", "text").await.unwrap_err();
            assert!(matches!(err, OrchestrationError::Store(_)), "path: {path}");
        }
        assert!(!temp_dir.path().join("outside.txt").exists());
    }
}
