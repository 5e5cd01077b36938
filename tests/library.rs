use std::{path::Path, sync::Arc};

use docshelf::{
    ContentTransport,
    DataDir,
    DocsetRegistry,
    Outcome,
    Reranker,
    TransportConfig,
    bundle::{ENTRIES_FILE, build_docset},
    docset::{DOCUMENTS_DIR, DocsetMeta},
    docset_url::{docset_url, search_url},
    search::{self, SearchParams},
};

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn build_fixture(
    out: &Path,
    name: &str,
    pages: &[(&str, &str)],
    entries: Option<&str>,
) -> Result<std::path::PathBuf, Box<dyn std::error::Error>> {
    let src = tempfile::tempdir()?;
    for (file, html) in pages {
        std::fs::write(src.path().join(file), html)?;
    }
    if let Some(entries) = entries {
        std::fs::write(src.path().join(ENTRIES_FILE), entries)?;
    }
    let meta = DocsetMeta {
        name: name.to_string(),
        identifier: None,
        platform: "it".to_string(),
        version: Some("1".to_string()),
    };
    Ok(build_docset(src.path(), &meta, out)?.bundle)
}

fn open(
    root: &Path,
) -> Result<(Arc<DocsetRegistry>, Arc<Reranker>), Box<dyn std::error::Error>> {
    let data_dir = DataDir::resolve(Some(root))?;
    let registry = Arc::new(DocsetRegistry::open(data_dir.clone())?);
    let reranker = Arc::new(Reranker::open(&data_dir.ranks_db())?);
    Ok((registry, reranker))
}

#[tokio::test]
async fn import_search_choose_and_fetch() -> TestResult {
    let data = tempfile::tempdir()?;
    let incoming = tempfile::tempdir()?;
    let (registry, reranker) = open(data.path())?;
    let mut changes = registry.subscribe();

    let python = build_fixture(
        incoming.path(),
        "Python",
        &[(
            "str.html",
            "<title>str</title><p>Immutable text sequence.</p>",
        )],
        Some(
            r#"[{"name": "format", "type": "Method",
                 "path": "str.html#format", "parent": "str",
                 "summary": "Format a string"}]"#,
        ),
    )?;
    let rust = build_fixture(
        incoming.path(),
        "Rust",
        &[(
            "string.html",
            "<title>String</title><p>A growable text buffer.</p>",
        )],
        None,
    )?;
    let python = registry.import_docset(&python, false)?;
    registry.import_docset(&rust, false)?;
    assert_eq!(changes.try_recv()?, docshelf::DocsetsChanged);
    assert_eq!(changes.try_recv()?, docshelf::DocsetsChanged);

    // Both docsets match "text"; choosing the second one lifts it on ties.
    let params = SearchParams::new("text");
    let results = search::execute_search(&registry, &reranker, &params)?;
    assert_eq!(results.len(), 2);

    let chosen = results[1].identity.clone();
    reranker.increase_rank(&chosen)?;
    assert_eq!(reranker.rank_for(&chosen), 1);

    let mut tied = results.clone();
    for node in &mut tied {
        node.score = 1.0;
    }
    let reordered = reranker.sort_nested_results(tied);
    assert_eq!(reordered[0].identity, chosen);

    let transport = ContentTransport::new(
        Arc::clone(&registry),
        Arc::clone(&reranker),
        TransportConfig::default(),
    );

    let page = docset_url(&python, &format!("{DOCUMENTS_DIR}/str.html"));
    let Outcome::Delivered(response) =
        transport.request(&page, "tab").outcome().await
    else {
        panic!("page should be delivered");
    };
    assert!(String::from_utf8(response.data)?.contains("Immutable"));
    assert_eq!(response.mime_type, "text/html");

    let query = search_url(&python, "format");
    let Outcome::Delivered(response) =
        transport.request(&query, "tab").outcome().await
    else {
        panic!("search should be delivered");
    };
    let hits: Vec<serde_json::Value> = serde_json::from_slice(&response.data)?;
    assert!(hits.iter().any(|h| h["name"] == "format"
        || h["children"]
            .as_array()
            .is_some_and(|c| c.iter().any(|c| c["name"] == "format"))));

    let missing = transport.request("dash-docset://nowhere/x", "tab");
    assert!(matches!(missing.outcome().await, Outcome::Failed(_)));
    assert!(transport.last_response_info("tab").is_some());

    Ok(())
}

#[test]
fn state_survives_reopen() -> TestResult {
    let data = tempfile::tempdir()?;
    let incoming = tempfile::tempdir()?;

    {
        let (registry, reranker) = open(data.path())?;
        for name in ["A", "B", "C"] {
            let bundle = build_fixture(
                incoming.path(),
                name,
                &[("index.html", "<title>x</title><p>x</p>")],
                None,
            )?;
            registry.import_docset(&bundle, false)?;
        }
        registry.move_docset(2, 0)?;
        let b = registry.docset_named("B").ok_or("B missing")?;
        registry.set_enabled(&b, false)?;
        reranker.save_defaults([("it.a::Guide::x", 5u64)])?;
    }

    let (registry, reranker) = open(data.path())?;
    let names: Vec<_> =
        registry.docsets().iter().map(|d| d.name.clone()).collect();
    assert_eq!(names, vec!["C", "A", "B"]);
    assert_eq!(registry.enabled_docsets().len(), 2);
    assert_eq!(reranker.rank_for("it.a::Guide::x"), 5);
    Ok(())
}

#[test]
fn cache_clean_keeps_library_intact() -> TestResult {
    let data = tempfile::tempdir()?;
    let incoming = tempfile::tempdir()?;
    let (registry, _reranker) = open(data.path())?;

    let bundle = build_fixture(
        incoming.path(),
        "Kept",
        &[("index.html", "<title>k</title><p>kept</p>")],
        None,
    )?;
    let kept = registry.import_docset(&bundle, false)?;

    let downloads = registry.data_dir().downloads_dir()?;
    std::fs::create_dir_all(downloads.join(".import-999-0/Contents"))?;
    std::fs::write(downloads.join("archive.tgz.part"), b"partial")?;

    assert_eq!(registry.remove_cached_downloads()?, 2);
    assert!(registry.absolute_path(&kept).is_dir());
    assert_eq!(registry.docsets().len(), 1);
    Ok(())
}
