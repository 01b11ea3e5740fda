use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use tracing::debug;

use promptline_core::error::{PromptlineError, Result};

use crate::vars::Variables;

/// File enumeration, reads and directory-creating writes.
///
/// Relative paths are resolved against the implementation's root.
pub trait FileSystem: Send + Sync + 'static {
    /// Expand a glob pattern, in enumeration order.
    fn glob(&self, pattern: &str) -> Result<Vec<PathBuf>>;

    fn read<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<String>>;

    /// Write `content`, creating parent directories as needed.
    fn write<'a>(&'a self, path: &'a Path, content: &'a str) -> BoxFuture<'a, Result<()>>;

    fn exists<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, bool>;
}

/// The local disk, rooted at a working directory.
pub struct LocalFs {
    root: PathBuf,
}

impl LocalFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

impl FileSystem for LocalFs {
    fn glob(&self, pattern: &str) -> Result<Vec<PathBuf>> {
        let full = self.resolve(Path::new(pattern));
        let full = full.to_string_lossy();

        let entries = glob::glob(&full)
            .map_err(|e| PromptlineError::Planning(format!("invalid glob '{}': {}", pattern, e)))?;

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| PromptlineError::Io(e.into()))?;
            if !path.is_file() {
                continue;
            }
            // Keep matches relative to the root so derived names stay short.
            let path = match path.strip_prefix(&self.root) {
                Ok(rel) => rel.to_path_buf(),
                Err(_) => path,
            };
            paths.push(path);
        }

        debug!(pattern, matches = paths.len(), "Expanded glob");
        Ok(paths)
    }

    fn read<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move { Ok(tokio::fs::read_to_string(self.resolve(path)).await?) })
    }

    fn write<'a>(&'a self, path: &'a Path, content: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let full = self.resolve(path);
            if let Some(parent) = full.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&full, content).await?;
            debug!(path = %full.display(), bytes = content.len(), "Wrote file");
            Ok(())
        })
    }

    fn exists<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, bool> {
        Box::pin(async move { tokio::fs::try_exists(self.resolve(path)).await.unwrap_or(false) })
    }
}

/// Structured components of a candidate file path.
#[derive(Debug, Clone, PartialEq)]
pub struct PathParts {
    /// The path as enumerated.
    pub path: String,
    /// Parent directory; empty for a bare file name.
    pub dir: String,
    /// File name without its extension.
    pub stem: String,
    /// Extension without the dot; empty if none.
    pub ext: String,
    pub file_name: String,
}

impl PathParts {
    pub fn from_path(path: &Path) -> Self {
        let text = |s: Option<&std::ffi::OsStr>| {
            s.map(|s| s.to_string_lossy().into_owned()).unwrap_or_default()
        };
        Self {
            path: path.to_string_lossy().into_owned(),
            dir: path
                .parent()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default(),
            stem: text(path.file_stem()),
            ext: text(path.extension()),
            file_name: text(path.file_name()),
        }
    }

    /// Bind each component under `prefix.` (or bare when `prefix` is `None`).
    pub fn to_variables(&self, prefix: Option<&str>) -> Variables {
        let key = |name: &str| match prefix {
            Some(p) => format!("{}.{}", p, name),
            None => name.to_string(),
        };
        [
            (key("path"), self.path.clone()),
            (key("dir"), self.dir.clone()),
            (key("stem"), self.stem.clone()),
            (key("ext"), self.ext.clone()),
            (key("file_name"), self.file_name.clone()),
        ]
        .into_iter()
        .map(|(k, v)| (k, serde_json::Value::String(v)))
        .collect()
    }
}
