//! Docsets and the on-disk bundle layout they are read from.
//!
//! A bundle is a directory, conventionally named `<Name>.docset`:
//!
//! ```text
//! Python.docset/
//!   Contents/
//!     meta.json            {"name", "identifier", "platform", "version"}
//!     Resources/
//!       index/             full-text content store
//!       Documents/         page files
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const BUNDLE_EXTENSION: &str = "docset";
pub const META_FILE: &str = "Contents/meta.json";
pub const INDEX_DIR: &str = "Contents/Resources/index";
pub const DOCUMENTS_DIR: &str = "Contents/Resources/Documents";

/// Metadata shipped inside a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocsetMeta {
    pub name: String,
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub version: Option<String>,
}

impl DocsetMeta {
    /// The explicit identifier, or one derived from name and platform.
    pub fn resolved_identifier(&self) -> String {
        match &self.identifier {
            Some(id) if !id.trim().is_empty() => id.clone(),
            _ if self.platform.is_empty() => slug(&self.name),
            _ => format!("{}.{}", slug(&self.platform), slug(&self.name)),
        }
    }
}

/// An installed docset as tracked by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Docset {
    pub identifier: String,
    pub name: String,
    /// Bundle location relative to the data root, `/`-separated.
    pub relative_path: String,
    #[serde(default)]
    pub platform: String,
    pub enabled: bool,
}

impl Docset {
    pub fn from_meta(meta: &DocsetMeta, relative_path: String) -> Self {
        Self {
            identifier: meta.resolved_identifier(),
            name: meta.name.clone(),
            relative_path,
            platform: meta.platform.clone(),
            enabled: true,
        }
    }

    /// True if `path` is this docset's path or lies beneath it.
    pub fn owns_relative_path(&self, path: &str) -> bool {
        let own = self.relative_path.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        path == own
            || path
                .strip_prefix(own)
                .is_some_and(|rest| rest.starts_with('/'))
    }
}

/// Paths of the members inside a bundle.
#[derive(Debug, Clone)]
pub struct BundlePaths {
    pub root: PathBuf,
}

impl BundlePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn meta(&self) -> PathBuf {
        self.root.join(META_FILE)
    }

    pub fn index(&self) -> PathBuf {
        self.root.join(INDEX_DIR)
    }

    pub fn documents(&self) -> PathBuf {
        self.root.join(DOCUMENTS_DIR)
    }
}

/// Check that `path` is a well-formed bundle and return its metadata.
pub fn validate_bundle(path: &Path) -> Result<DocsetMeta> {
    let invalid = |reason: String| Error::InvalidBundle {
        path: path.to_path_buf(),
        reason,
    };

    if !path.is_dir() {
        return Err(invalid("not a directory".into()));
    }

    let paths = BundlePaths::new(path);
    let raw = std::fs::read(paths.meta())
        .map_err(|e| invalid(format!("cannot read {META_FILE}: {e}")))?;
    let meta: DocsetMeta = serde_json::from_slice(&raw)
        .map_err(|e| invalid(format!("malformed {META_FILE}: {e}")))?;
    if meta.name.trim().is_empty() {
        return Err(invalid("docset name is empty".into()));
    }

    // Tantivy writes meta.json at the root of every committed index.
    if !paths.index().join("meta.json").is_file() {
        return Err(invalid(format!("missing content store at {INDEX_DIR}")));
    }
    if !paths.documents().is_dir() {
        return Err(invalid(format!("missing {DOCUMENTS_DIR}")));
    }

    Ok(meta)
}

/// Directory name used for a docset inside the library.
pub fn bundle_dir_name(name: &str) -> String {
    format!("{}.{BUNDLE_EXTENSION}", sanitize_file_name(name))
}

fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "docset".to_string()
    } else {
        cleaned.to_string()
    }
}

fn slug(text: &str) -> String {
    text.trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}
