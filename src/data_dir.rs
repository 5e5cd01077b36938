use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Environment variable overriding the data root.
pub const DATA_DIR_ENV_VAR: &str = "DOCSHELF_DATA_DIR";

#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Resolve the data directory from, in order of priority:
    /// 1. An explicit path (from --data-dir)
    /// 2. The DOCSHELF_DATA_DIR environment variable
    /// 3. The XDG data directory (~/.local/share/docshelf/)
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let root = if let Some(path) = explicit {
            path.to_path_buf()
        } else if let Ok(val) = std::env::var(DATA_DIR_ENV_VAR) {
            PathBuf::from(val)
        } else {
            xdg::BaseDirectories::with_prefix("docshelf")
                .get_data_home()
                .ok_or_else(|| {
                    Error::Config(
                        "could not determine XDG data home directory".into(),
                    )
                })?
        };

        std::fs::create_dir_all(&root)
            .map_err(|_| Error::DataDir(root.clone()))?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn registry_db(&self) -> PathBuf {
        self.root.join("registry.redb")
    }

    pub fn ranks_db(&self) -> PathBuf {
        self.root.join("ranks.redb")
    }

    /// Where imported docsets are installed.
    pub fn library_dir(&self) -> Result<PathBuf> {
        self.ensure_dir("docsets")
    }

    /// Where downloads and import staging directories live.
    pub fn downloads_dir(&self) -> Result<PathBuf> {
        self.ensure_dir("downloads")
    }

    /// Express `path` relative to the data root, if it lies inside it.
    pub fn relativize(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<_> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if parts.is_empty() {
            return None;
        }
        Some(parts.join("/"))
    }

    /// Absolute location of a data-root-relative path.
    pub fn absolute(&self, relative_path: &str) -> PathBuf {
        self.root.join(relative_path)
    }

    fn ensure_dir(&self, name: &str) -> Result<PathBuf> {
        let path = self.root.join(name);
        std::fs::create_dir_all(&path)
            .map_err(|_| Error::DataDir(path.clone()))?;
        Ok(path)
    }
}
