use std::path::{Path, PathBuf};

use crate::error::Result;

/// A page file found while building a docset.
#[derive(Debug, Clone)]
pub struct DiscoveredPage {
    /// Path relative to the source root, always `/`-separated.
    pub relative_path: String,
    /// Fully resolved absolute path.
    pub absolute_path: PathBuf,
}

/// Extensions treated as documentation pages.
const PAGE_EXTENSIONS: &[&str] = &["html", "htm", "md", "txt"];

/// Recursively walk a directory and discover documentation pages.
///
/// Skips hidden files/directories (names starting with `.`) and symlinked
/// directories. Results are sorted by relative path.
pub fn discover_pages(root: &Path) -> Result<Vec<DiscoveredPage>> {
    let canonical_root = root.canonicalize()?;
    let mut results = Vec::new();
    walk_dir(&canonical_root, &canonical_root, &mut results)?;
    results.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(results)
}

fn walk_dir(
    root: &Path,
    current: &Path,
    results: &mut Vec<DiscoveredPage>,
) -> Result<()> {
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        let file_name = entry.file_name();
        if file_name.to_string_lossy().starts_with('.') {
            continue;
        }

        let file_type = entry.file_type()?;
        let path = entry.path();

        if file_type.is_dir() {
            walk_dir(root, &path, results)?;
        } else if file_type.is_symlink() {
            let Ok(resolved) = path.canonicalize() else {
                continue;
            };
            if resolved.is_file() && is_page(&resolved) {
                results.push(make_discovered(root, &path, resolved));
            }
        } else if file_type.is_file() && is_page(&path) {
            let abs = path.canonicalize()?;
            results.push(make_discovered(root, &path, abs));
        }
    }

    Ok(())
}

fn is_page(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            PAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
        })
}

fn make_discovered(
    root: &Path,
    original_path: &Path,
    absolute_path: PathBuf,
) -> DiscoveredPage {
    let relative = original_path.strip_prefix(root).unwrap_or(original_path);
    let relative_path = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/");

    DiscoveredPage {
        relative_path,
        absolute_path,
    }
}

/// Copy a directory tree. Symlinks are copied as the files they point to;
/// symlinked directories are skipped.
pub fn copy_tree(source: &Path, destination: &Path) -> Result<u64> {
    std::fs::create_dir_all(destination)?;
    let mut copied = 0;

    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let from = entry.path();
        let to = destination.join(entry.file_name());
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            copied += copy_tree(&from, &to)?;
        } else if file_type.is_file()
            || (file_type.is_symlink() && from.is_file())
        {
            copied += std::fs::copy(&from, &to)?;
        }
    }

    Ok(copied)
}
