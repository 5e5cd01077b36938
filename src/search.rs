//! Search across docsets: per-docset store queries, parent nesting and
//! reranking of the combined tree.

use std::collections::HashMap;

use rayon::prelude::*;

use crate::{
    docset::Docset,
    error::{Error, Result},
    registry::DocsetRegistry,
    reranker::Reranker,
    result::ResultNode,
    store::StoreHit,
    types,
};

/// Parameters for one search across the library.
#[derive(Debug, Clone)]
pub struct SearchParams {
    pub query: String,
    /// Maximum number of top-level results.
    pub limit: usize,
    /// Search only this docset, by name or identifier.
    pub docset: Option<String>,
    /// Search the docset serving this platform. `docset` wins when both
    /// are set.
    pub platform: Option<String>,
    /// Hits scoring below this are dropped.
    pub min_score: f64,
}

impl SearchParams {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            limit: 20,
            docset: None,
            platform: None,
            min_score: 0.0,
        }
    }
}

/// Execute the full search pipeline.
///
/// 1. Query every enabled docset (or the one requested by name or
///    platform) in parallel
/// 2. Drop hits below `min_score`
/// 3. Nest entries under their parent when both matched
/// 4. Rerank the tree and keep the best `limit` top-level results
pub fn execute_search(
    registry: &DocsetRegistry,
    reranker: &Reranker,
    params: &SearchParams,
) -> Result<Vec<ResultNode>> {
    let targets: Vec<Docset> = match (&params.docset, &params.platform) {
        (Some(name), _) => {
            let docset =
                registry.docset_named(name).ok_or_else(|| Error::NotFound {
                    kind: "docset",
                    name: name.clone(),
                })?;
            vec![docset]
        }
        (None, Some(platform)) => {
            let docset = registry.docset_for_platform(platform).ok_or_else(
                || Error::NotFound {
                    kind: "platform docset",
                    name: platform.clone(),
                },
            )?;
            vec![docset]
        }
        (None, None) => registry.enabled_docsets().to_vec(),
    };

    search_docsets(registry, reranker, &targets, params)
}

/// Search `docsets` in order, which is also the tiebreak order.
pub fn search_docsets(
    registry: &DocsetRegistry,
    reranker: &Reranker,
    docsets: &[Docset],
    params: &SearchParams,
) -> Result<Vec<ResultNode>> {
    if params.query.trim().is_empty() || params.limit == 0 {
        return Ok(vec![]);
    }

    // Query stores in parallel; collect() keeps registry order.
    let per_docset: Vec<Vec<ResultNode>> = docsets
        .par_iter()
        .map(|docset| {
            let hits = match query_docset(registry, docset, params) {
                Ok(hits) => hits,
                Err(e) => {
                    tracing::warn!(
                        docset = %docset.name,
                        error = %e,
                        "skipping docset"
                    );
                    vec![]
                }
            };
            nest(docset, hits)
        })
        .collect();

    let roots: Vec<ResultNode> = per_docset.into_iter().flatten().collect();
    let mut sorted = reranker.sort_nested_results(roots);
    sorted.truncate(params.limit);

    tracing::debug!(
        query = %params.query,
        docsets = docsets.len(),
        results = sorted.len(),
        "search complete"
    );
    Ok(sorted)
}

fn query_docset(
    registry: &DocsetRegistry,
    docset: &Docset,
    params: &SearchParams,
) -> Result<Vec<StoreHit>> {
    let store = registry.store_for(docset)?;
    let mut hits: Vec<StoreHit> = store
        .search(&params.query, params.limit)?
        .into_iter()
        .filter(|h| h.score >= params.min_score)
        .collect();
    order_hits(&mut hits);
    Ok(hits)
}

/// Score descending; equal scores list types in their usual order
/// (guides before classes before methods).
fn order_hits(hits: &mut [StoreHit]) {
    hits.sort_by(|a, b| {
        b.score.total_cmp(&a.score).then_with(|| {
            types::order(&a.entry_type).cmp(&types::order(&b.entry_type))
        })
    });
}

/// Turn one docset's hits into a forest, placing each hit under the
/// matched entry named by its parent.
fn nest(docset: &Docset, hits: Vec<StoreHit>) -> Vec<ResultNode> {
    let mut by_name: HashMap<&str, usize> = HashMap::new();
    for (i, hit) in hits.iter().enumerate() {
        by_name.entry(hit.name.as_str()).or_insert(i);
    }

    let mut parent_of: Vec<Option<usize>> = hits
        .iter()
        .enumerate()
        .map(|(i, hit)| {
            let parent = hit.parent.as_deref()?;
            by_name.get(parent).copied().filter(|&p| p != i)
        })
        .collect();

    // Break cycles so every node is reachable from a root.
    for i in 0..parent_of.len() {
        let mut current = parent_of[i];
        let mut steps = 0;
        while let Some(p) = current {
            if p == i || steps > hits.len() {
                parent_of[i] = None;
                break;
            }
            current = parent_of[p];
            steps += 1;
        }
    }

    let mut children: Vec<Vec<usize>> = vec![vec![]; hits.len()];
    let mut roots = Vec::new();
    for (i, parent) in parent_of.iter().enumerate() {
        match parent {
            Some(p) => children[*p].push(i),
            None => roots.push(i),
        }
    }

    let mut nodes: Vec<Option<ResultNode>> = hits
        .into_iter()
        .map(|hit| Some(ResultNode::from_hit(docset, hit)))
        .collect();

    roots
        .into_iter()
        .filter_map(|i| build(i, &mut nodes, &children))
        .collect()
}

fn build(
    index: usize,
    nodes: &mut [Option<ResultNode>],
    children: &[Vec<usize>],
) -> Option<ResultNode> {
    let mut node = nodes[index].take()?;
    node.children = children[index]
        .iter()
        .filter_map(|&c| build(c, nodes, children))
        .collect();
    Some(node)
}

/// Format results for human-readable terminal output.
pub fn format_human(results: &[ResultNode]) {
    if results.is_empty() {
        println!("No results found.");
        return;
    }

    for (i, r) in results.iter().enumerate() {
        println!(
            "{:>3}. [{:.3}] {} ({}) {}",
            i + 1,
            r.score,
            r.name,
            types::normalize(&r.entry_type),
            r.docset
        );
        println!("     {}", r.url);
        print_children(&r.children, 2);
    }
    println!("\n{} result(s): {}", results.len(), type_summary(results));
}

/// Count results per type across the whole tree, e.g. `2 Classes,
/// 1 Method`. Types are listed in their usual order.
fn type_summary(results: &[ResultNode]) -> String {
    fn tally<'a>(
        nodes: &'a [ResultNode],
        counts: &mut Vec<(&'a str, usize)>,
    ) {
        for node in nodes {
            let name = types::normalize(&node.entry_type);
            match counts.iter_mut().find(|(n, _)| *n == name) {
                Some((_, count)) => *count += 1,
                None => counts.push((name, 1)),
            }
            tally(&node.children, counts);
        }
    }

    let mut counts = Vec::new();
    tally(results, &mut counts);
    counts.sort_by(|(a, _), (b, _)| {
        types::order(a).cmp(&types::order(b)).then_with(|| a.cmp(b))
    });
    counts
        .into_iter()
        .map(|(name, count)| match count {
            1 => format!("1 {name}"),
            n => format!("{n} {}", types::plural(name)),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn print_children(children: &[ResultNode], depth: usize) {
    for c in children {
        println!(
            "{:indent$}- [{:.3}] {} ({})",
            "",
            c.score,
            c.name,
            types::normalize(&c.entry_type),
            indent = depth * 3
        );
        print_children(&c.children, depth + 1);
    }
}

/// Format results as JSON output.
pub fn format_json(results: &[ResultNode], query: &str) -> Result<()> {
    let out = serde_json::json!({
        "query": query,
        "result_count": results.len(),
        "results": results,
    });
    println!("{}", serde_json::to_string(&out)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::{
        bundle::{ENTRIES_FILE, build_docset},
        data_dir::DataDir,
        docset::DocsetMeta,
    };

    struct Fixture {
        _tmp: tempfile::TempDir,
        registry: DocsetRegistry,
        reranker: Reranker,
    }

    fn write_page(dir: &Path, file: &str, title: &str, body: &str) {
        std::fs::write(
            dir.join(file),
            format!("<html><title>{title}</title><body>{body}</body></html>"),
        )
        .unwrap();
    }

    fn import(
        registry: &DocsetRegistry,
        name: &str,
        platform: &str,
        setup: impl Fn(&Path),
    ) {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        setup(src.path());
        let meta = DocsetMeta {
            name: name.into(),
            identifier: None,
            platform: platform.into(),
            version: None,
        };
        let bundle = build_docset(src.path(), &meta, out.path()).unwrap();
        registry.import_docset(&bundle.bundle, false).unwrap();
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = DataDir::resolve(Some(tmp.path())).unwrap();
        let registry = DocsetRegistry::open(data_dir.clone()).unwrap();
        let reranker = Reranker::open(&data_dir.ranks_db()).unwrap();

        import(&registry, "Python", "test", |dir| {
            write_page(dir, "str.html", "str", "Text sequence type.");
            write_page(dir, "list.html", "list", "Mutable sequence type.");
            std::fs::write(
                dir.join(ENTRIES_FILE),
                r#"[
                    {"name": "join", "type": "Method",
                     "path": "str.html#join", "parent": "str",
                     "summary": "Concatenate any number of strings"},
                    {"name": "split", "type": "Method",
                     "path": "str.html#split", "parent": "str",
                     "summary": "Split a string into a sequence"}
                ]"#,
            )
            .unwrap();
        });
        import(&registry, "Rust", "rust", |dir| {
            write_page(dir, "vec.html", "Vec", "A growable sequence.");
        });

        Fixture {
            _tmp: tmp,
            registry,
            reranker,
        }
    }

    #[test]
    fn searches_all_enabled_docsets() {
        let f = fixture();
        let results = execute_search(
            &f.registry,
            &f.reranker,
            &SearchParams::new("sequence"),
        )
        .unwrap();

        let docsets: Vec<_> =
            results.iter().map(|r| r.docset.as_str()).collect();
        assert!(docsets.contains(&"Python"));
        assert!(docsets.contains(&"Rust"));
    }

    #[test]
    fn disabled_docsets_are_skipped() {
        let f = fixture();
        let rust = f.registry.docset_named("Rust").unwrap();
        f.registry.set_enabled(&rust, false).unwrap();

        let results = execute_search(
            &f.registry,
            &f.reranker,
            &SearchParams::new("sequence"),
        )
        .unwrap();
        assert!(results.iter().all(|r| r.docset == "Python"));
    }

    #[test]
    fn named_docset_restricts_search() {
        let f = fixture();
        let mut params = SearchParams::new("sequence");
        params.docset = Some("Rust".into());

        let results =
            execute_search(&f.registry, &f.reranker, &params).unwrap();
        assert!(!results.is_empty());
        assert!(results.iter().all(|r| r.docset == "Rust"));

        params.docset = Some("Missing".into());
        let err =
            execute_search(&f.registry, &f.reranker, &params).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn children_nest_under_matched_parent() {
        let f = fixture();
        let results = execute_search(
            &f.registry,
            &f.reranker,
            &SearchParams::new("str join"),
        )
        .unwrap();

        let str_node = results
            .iter()
            .find(|r| r.name == "str")
            .expect("str page should match");
        assert!(str_node.find("test.python::Method::str.join").is_some());
        assert!(results.iter().all(|r| r.name != "join"));
    }

    #[test]
    fn rank_breaks_ties_between_equal_scores() {
        let f = fixture();
        let params = SearchParams::new("sequence");
        let before =
            execute_search(&f.registry, &f.reranker, &params).unwrap();
        let last = before.last().unwrap().clone();

        // Same score for everything, so rank alone decides.
        let flat: Vec<ResultNode> = before
            .iter()
            .cloned()
            .map(|mut n| {
                n.score = 1.0;
                n
            })
            .collect();
        f.reranker.increase_rank(&last.identity).unwrap();
        let sorted = f.reranker.sort_nested_results(flat);
        assert_eq!(sorted[0].identity, last.identity);
    }

    #[test]
    fn limit_and_min_score_apply() {
        let f = fixture();
        let mut params = SearchParams::new("sequence");
        params.limit = 1;
        let results =
            execute_search(&f.registry, &f.reranker, &params).unwrap();
        assert_eq!(results.len(), 1);

        params.limit = 20;
        params.min_score = f64::MAX;
        let results =
            execute_search(&f.registry, &f.reranker, &params).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn empty_query_returns_nothing() {
        let f = fixture();
        let results =
            execute_search(&f.registry, &f.reranker, &SearchParams::new("  "))
                .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn platform_selects_its_docset() {
        let f = fixture();
        let mut params = SearchParams::new("sequence");
        params.platform = Some("RUST".into());
        let results =
            execute_search(&f.registry, &f.reranker, &params).unwrap();
        assert!(!results.is_empty());
        assert!(results.iter().all(|r| r.docset == "Rust"));

        // A named docset takes precedence over the platform.
        params.docset = Some("Python".into());
        let results =
            execute_search(&f.registry, &f.reranker, &params).unwrap();
        assert!(results.iter().all(|r| r.docset == "Python"));

        params.docset = None;
        params.platform = Some("haskell".into());
        let err =
            execute_search(&f.registry, &f.reranker, &params).unwrap_err();
        assert!(matches!(
            err,
            Error::NotFound {
                kind: "platform docset",
                ..
            }
        ));
    }

    fn store_hit(name: &str, entry_type: &str, score: f64) -> StoreHit {
        StoreHit {
            score,
            name: name.into(),
            entry_type: entry_type.into(),
            path: format!("{name}.html"),
            parent: None,
        }
    }

    #[test]
    fn equal_scores_order_by_entry_type() {
        let mut hits = vec![
            store_hit("len", "clm", 1.0),
            store_hit("Widget", "Widget", 1.0),
            store_hit("str", "Class", 1.0),
            store_hit("intro", "Guide", 1.0),
            store_hit("best", "Method", 2.0),
        ];
        order_hits(&mut hits);
        let names: Vec<_> = hits.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, ["best", "intro", "str", "len", "Widget"]);
    }

    #[test]
    fn summary_counts_types_across_the_tree() {
        let docset = Docset {
            identifier: "t".into(),
            name: "T".into(),
            relative_path: "docsets/T.docset".into(),
            platform: String::new(),
            enabled: true,
        };
        let node = |hit: StoreHit, children: Vec<ResultNode>| {
            let mut node = ResultNode::from_hit(&docset, hit);
            node.children = children;
            node
        };
        let results = vec![
            node(
                store_hit("str", "cl", 2.0),
                vec![
                    node(store_hit("join", "clm", 1.0), vec![]),
                    node(store_hit("split", "Method", 1.0), vec![]),
                ],
            ),
            node(store_hit("list", "Class", 1.5), vec![]),
            node(store_hit("intro", "Guide", 1.0), vec![]),
        ];
        assert_eq!(type_summary(&results), "1 Guide, 2 Classes, 2 Methods");
        assert_eq!(type_summary(&[]), "");
    }

    #[test]
    fn nest_breaks_parent_cycles() {
        let docset = Docset {
            identifier: "t".into(),
            name: "T".into(),
            relative_path: "docsets/T.docset".into(),
            platform: String::new(),
            enabled: true,
        };
        let hit = |name: &str, parent: &str| StoreHit {
            score: 1.0,
            name: name.into(),
            entry_type: "Type".into(),
            path: format!("{name}.html"),
            parent: Some(parent.into()),
        };

        let forest = nest(&docset, vec![hit("a", "b"), hit("b", "a")]);
        let total: usize = forest.iter().map(ResultNode::count).sum();
        assert_eq!(total, 2);
        assert!(!forest.is_empty());
    }
}
