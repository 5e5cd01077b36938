//! Builds docset bundles from a directory of pages.

use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::Deserialize;

use crate::{
    docset::{BundlePaths, DocsetMeta, bundle_dir_name},
    error::{Error, Result},
    store::{ContentStore, IndexEntry},
    text_util,
    types,
    walker::{self, DiscoveredPage},
};

/// Optional file in a source directory listing symbol entries.
pub const ENTRIES_FILE: &str = "entries.json";

/// Entry type given to every page.
pub const PAGE_ENTRY_TYPE: &str = "Guide";

const WRITER_BUDGET: usize = 15_000_000;

/// A symbol entry listed in `entries.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct SymbolEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub entry_type: String,
    pub path: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub summary: String,
}

#[derive(Debug, Clone)]
pub struct BuildSummary {
    pub bundle: PathBuf,
    pub pages: usize,
    pub entries: usize,
}

/// Build a docset bundle from a directory of pages.
///
/// Pages are copied into `Documents/` and indexed one entry per page, with
/// the raw page kept in the compressed content column. Entries from an
/// `entries.json` next to the pages are indexed as well.
pub fn build_docset(
    source: &Path,
    meta: &DocsetMeta,
    out_dir: &Path,
) -> Result<BuildSummary> {
    if !source.is_dir() {
        return Err(Error::Config(format!(
            "source is not a directory: {}",
            source.display()
        )));
    }

    let bundle = out_dir.join(bundle_dir_name(&meta.name));
    if bundle.exists() {
        return Err(Error::Config(format!(
            "bundle already exists: {}",
            bundle.display()
        )));
    }
    let paths = BundlePaths::new(&bundle);

    walker::copy_tree(source, &paths.documents())?;

    let pages = walker::discover_pages(source)?;
    // Read pages in parallel, then index sequentially through one writer.
    let loaded = load_pages(&pages);

    let symbols = read_symbol_entries(source)?;

    let store = ContentStore::open_registered(&paths.index())?;
    let mut writer = store.writer(WRITER_BUDGET)?;
    for entry in &loaded {
        store.add_entry(&writer, entry)?;
    }
    for symbol in &symbols {
        store.add_entry(
            &writer,
            &IndexEntry {
                name: symbol.name.clone(),
                entry_type: types::normalize(&symbol.entry_type).to_string(),
                path: symbol.path.clone(),
                parent: symbol.parent.clone(),
                body: symbol.summary.clone(),
                content: None,
            },
        )?;
    }
    writer.commit()?;

    std::fs::write(paths.meta(), serde_json::to_vec_pretty(meta)?)?;

    tracing::info!(
        bundle = %bundle.display(),
        pages = loaded.len(),
        entries = symbols.len(),
        "built docset"
    );

    Ok(BuildSummary {
        bundle,
        pages: loaded.len(),
        entries: symbols.len(),
    })
}

/// Read and parse `pages`. Unreadable pages are logged and left out.
fn load_pages(pages: &[DiscoveredPage]) -> Vec<IndexEntry> {
    pages
        .par_iter()
        .filter_map(|page| match std::fs::read(&page.absolute_path) {
            Ok(raw) => Some(page_entry(&page.relative_path, raw)),
            Err(e) => {
                tracing::warn!(
                    page = %page.relative_path,
                    error = %e,
                    "skipping unreadable page"
                );
                None
            }
        })
        .collect()
}

fn page_entry(relative_path: &str, raw: Vec<u8>) -> IndexEntry {
    let text = String::from_utf8_lossy(&raw);
    let path = Path::new(relative_path);
    let is_html = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| {
            e.eq_ignore_ascii_case("html") || e.eq_ignore_ascii_case("htm")
        });

    let name = text_util::page_title(&text, path);
    let body = if is_html {
        text_util::strip_markup(&text)
    } else {
        text_util::collapse_whitespace(&text)
    };

    IndexEntry {
        name,
        entry_type: PAGE_ENTRY_TYPE.to_string(),
        path: relative_path.to_string(),
        parent: None,
        body,
        content: Some(raw),
    }
}

fn read_symbol_entries(source: &Path) -> Result<Vec<SymbolEntry>> {
    let path = source.join(ENTRIES_FILE);
    if !path.is_file() {
        return Ok(vec![]);
    }
    let raw = std::fs::read(&path)?;
    Ok(serde_json::from_slice(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docset::validate_bundle;

    fn meta(name: &str) -> DocsetMeta {
        DocsetMeta {
            name: name.into(),
            identifier: None,
            platform: "test".into(),
            version: Some("1".into()),
        }
    }

    fn write_source(dir: &Path) {
        std::fs::write(
            dir.join("str.html"),
            "<html><title>str</title><body>Text sequence type. \
             join concatenates strings.</body></html>",
        )
        .unwrap();
        std::fs::write(dir.join("intro.md"), "# Introduction\n\nWelcome.")
            .unwrap();
        std::fs::write(
            dir.join(ENTRIES_FILE),
            r#"[
                {"name": "join", "type": "clm", "path": "str.html#join",
                 "parent": "str", "summary": "Concatenate strings"}
            ]"#,
        )
        .unwrap();
    }

    #[test]
    fn builds_valid_bundle() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write_source(src.path());

        let summary =
            build_docset(src.path(), &meta("Python"), out.path()).unwrap();
        assert_eq!(summary.pages, 2);
        assert_eq!(summary.entries, 1);
        assert_eq!(summary.bundle, out.path().join("Python.docset"));

        let read_back = validate_bundle(&summary.bundle).unwrap();
        assert_eq!(read_back, meta("Python"));

        let docs = BundlePaths::new(&summary.bundle).documents();
        assert!(docs.join("str.html").is_file());
    }

    #[test]
    fn built_store_is_searchable() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write_source(src.path());
        let summary =
            build_docset(src.path(), &meta("Python"), out.path()).unwrap();

        let index = BundlePaths::new(&summary.bundle).index();
        let store = ContentStore::open_registered(&index).unwrap();
        let hits = store.search("join", 10).unwrap();
        assert_eq!(hits[0].name, "join");
        assert_eq!(hits[0].entry_type, "Method");
        assert_eq!(hits[0].parent.as_deref(), Some("str"));

        let intro = store.search("introduction", 10).unwrap();
        assert_eq!(intro[0].path, "intro.md");
        assert_eq!(intro[0].entry_type, PAGE_ENTRY_TYPE);
    }

    #[test]
    fn refuses_existing_bundle() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write_source(src.path());
        build_docset(src.path(), &meta("Python"), out.path()).unwrap();
        assert!(build_docset(src.path(), &meta("Python"), out.path()).is_err());
    }

    #[test]
    fn unreadable_pages_are_left_out() {
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("a.html"), "<title>A</title>").unwrap();
        let pages = vec![
            DiscoveredPage {
                relative_path: "a.html".into(),
                absolute_path: src.path().join("a.html"),
            },
            DiscoveredPage {
                relative_path: "gone.html".into(),
                absolute_path: src.path().join("gone.html"),
            },
        ];

        let loaded = load_pages(&pages);
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].path, "a.html");
    }

    #[test]
    fn page_entry_strips_html() {
        let e = page_entry(
            "a.html",
            b"<title>A</title><p>Hello <b>there</b></p>".to_vec(),
        );
        assert_eq!(e.name, "A");
        assert_eq!(e.body, "A Hello there");
        assert!(e.content.is_some());
    }
}
