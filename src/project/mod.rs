//! Project access for kubekit.
//!
//! A project is a directory tree holding playbooks, roles, and task files.
//! Everything the compiler reads goes through the [`ProjectLoader`] trait,
//! addressed by `/`-separated paths relative to the project root:
//!
//! - [`FsProject`]: a directory on the local filesystem
//! - [`MemoryProject`]: files held in memory, for embedding and tests
//!
//! [`PlaybookResolver`] turns a playbook path into a fully resolved
//! [`crate::playbook::Playbook`] (imports, roles, includes).

pub mod resolve;

pub use resolve::PlaybookResolver;

use async_trait::async_trait;
use indexmap::IndexMap;
use std::path::PathBuf;
use thiserror::Error;
use walkdir::WalkDir;

/// Errors raised by project loaders.
#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("file not found in project: {0}")]
    NotFound(String),

    #[error("path traversal detected: '{0}' escapes the project root")]
    PathTraversal(String),

    #[error("failed to read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{0}' is not valid UTF-8")]
    InvalidUtf8(String),

    #[error("project walk failed: {0}")]
    Walk(String),
}

/// Result type for project operations.
pub type ProjectResult<T> = Result<T, ProjectError>;

/// Metadata of a project entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// Whether the entry is a directory
    pub is_dir: bool,
    /// Size in bytes, zero for directories
    pub size: u64,
}

/// Read access to a project tree.
#[async_trait]
pub trait ProjectLoader: Send + Sync + std::fmt::Debug {
    /// Read a file.
    async fn read_file(&self, path: &str) -> ProjectResult<Vec<u8>>;

    /// Stat an entry, `None` when it does not exist.
    async fn stat(&self, path: &str) -> ProjectResult<Option<FileStat>>;

    /// Every file below a directory, sorted.
    async fn walk_dir(&self, path: &str) -> ProjectResult<Vec<String>>;

    /// Whether a regular file exists.
    async fn is_file(&self, path: &str) -> bool {
        matches!(self.stat(path).await, Ok(Some(stat)) if !stat.is_dir)
    }

    /// Whether a directory exists.
    async fn is_dir(&self, path: &str) -> bool {
        matches!(self.stat(path).await, Ok(Some(stat)) if stat.is_dir)
    }

    /// Read a file as UTF-8 text.
    async fn read_to_string(&self, path: &str) -> ProjectResult<String> {
        let bytes = self.read_file(path).await?;
        String::from_utf8(bytes).map_err(|_| ProjectError::InvalidUtf8(path.to_string()))
    }
}

/// Normalize a project path lexically.
///
/// `.` segments and empty segments are dropped, `..` pops a segment. Paths
/// that are absolute or climb above the root are rejected.
pub fn normalize(path: &str) -> ProjectResult<String> {
    if path.starts_with('/') {
        return Err(ProjectError::PathTraversal(path.to_string()));
    }
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(ProjectError::PathTraversal(path.to_string()));
                }
            }
            other => parts.push(other),
        }
    }
    Ok(parts.join("/"))
}

/// Join two project paths and normalize the result.
pub fn join(base: &str, rel: &str) -> ProjectResult<String> {
    if base.is_empty() {
        normalize(rel)
    } else {
        normalize(&format!("{}/{}", base, rel))
    }
}

/// Parent directory of a project path, `""` for top-level entries.
pub fn parent_dir(path: &str) -> &str {
    path.rfind('/').map(|i| &path[..i]).unwrap_or("")
}

/// Project rooted at a local directory.
#[derive(Debug, Clone)]
pub struct FsProject {
    root: PathBuf,
}

impl FsProject {
    /// Create a loader for `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Project root.
    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> ProjectResult<PathBuf> {
        let normalized = normalize(path)?;
        Ok(if normalized.is_empty() {
            self.root.clone()
        } else {
            self.root.join(normalized)
        })
    }
}

#[async_trait]
impl ProjectLoader for FsProject {
    async fn read_file(&self, path: &str) -> ProjectResult<Vec<u8>> {
        let full = self.resolve(path)?;
        tokio::fs::read(&full).await.map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ProjectError::NotFound(path.to_string())
            } else {
                ProjectError::Io {
                    path: path.to_string(),
                    source,
                }
            }
        })
    }

    async fn stat(&self, path: &str) -> ProjectResult<Option<FileStat>> {
        let full = self.resolve(path)?;
        match tokio::fs::metadata(&full).await {
            Ok(meta) => Ok(Some(FileStat {
                is_dir: meta.is_dir(),
                size: if meta.is_dir() { 0 } else { meta.len() },
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(ProjectError::Io {
                path: path.to_string(),
                source,
            }),
        }
    }

    async fn walk_dir(&self, path: &str) -> ProjectResult<Vec<String>> {
        let base = normalize(path)?;
        let full = self.resolve(&base)?;
        let root = self.root.clone();
        let files = tokio::task::spawn_blocking(move || {
            let mut files = Vec::new();
            for entry in WalkDir::new(&full).follow_links(true) {
                let entry = entry.map_err(|e| ProjectError::Walk(e.to_string()))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                if let Ok(rel) = entry.path().strip_prefix(&root) {
                    let rel: Vec<String> = rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect();
                    files.push(rel.join("/"));
                }
            }
            files.sort();
            Ok::<_, ProjectError>(files)
        })
        .await
        .map_err(|e| ProjectError::Walk(e.to_string()))??;
        Ok(files)
    }
}

/// Project held entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryProject {
    files: IndexMap<String, Vec<u8>>,
}

impl MemoryProject {
    /// Create an empty project.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file, builder style.
    pub fn with_file(mut self, path: &str, content: impl Into<Vec<u8>>) -> Self {
        self.insert(path, content);
        self
    }

    /// Add or replace a file.
    pub fn insert(&mut self, path: &str, content: impl Into<Vec<u8>>) {
        let key = normalize(path).unwrap_or_else(|_| path.trim_start_matches('/').to_string());
        self.files.insert(key, content.into());
    }

    fn is_dir_path(&self, dir: &str) -> bool {
        dir.is_empty()
            || self
                .files
                .keys()
                .any(|f| f.len() > dir.len() && f.starts_with(dir) && f.as_bytes()[dir.len()] == b'/')
    }
}

#[async_trait]
impl ProjectLoader for MemoryProject {
    async fn read_file(&self, path: &str) -> ProjectResult<Vec<u8>> {
        let key = normalize(path)?;
        self.files
            .get(&key)
            .cloned()
            .ok_or_else(|| ProjectError::NotFound(path.to_string()))
    }

    async fn stat(&self, path: &str) -> ProjectResult<Option<FileStat>> {
        let key = normalize(path)?;
        if let Some(content) = self.files.get(&key) {
            return Ok(Some(FileStat {
                is_dir: false,
                size: content.len() as u64,
            }));
        }
        if self.is_dir_path(&key) {
            return Ok(Some(FileStat {
                is_dir: true,
                size: 0,
            }));
        }
        Ok(None)
    }

    async fn walk_dir(&self, path: &str) -> ProjectResult<Vec<String>> {
        let dir = normalize(path)?;
        let mut files: Vec<String> = self
            .files
            .keys()
            .filter(|f| {
                dir.is_empty()
                    || (f.len() > dir.len()
                        && f.starts_with(&dir)
                        && f.as_bytes()[dir.len()] == b'/')
            })
            .cloned()
            .collect();
        files.sort();
        Ok(files)
    }
}
