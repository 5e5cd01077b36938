use serde::Serialize;

use crate::{docset::Docset, docset_url, store::StoreHit};

/// One search match, with any matches nested beneath it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultNode {
    /// Stable key into the rank table, see [`identity`].
    pub identity: String,
    /// Score from the content store's rank function.
    pub score: f64,
    pub name: String,
    pub entry_type: String,
    /// Name of the docset the match came from.
    pub docset: String,
    /// Path inside the docset's `Documents/`, possibly with a fragment.
    pub path: String,
    pub url: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ResultNode>,
}

impl ResultNode {
    pub fn from_hit(docset: &Docset, hit: StoreHit) -> Self {
        let identity = identity(
            &docset.identifier,
            &hit.entry_type,
            &hit.name,
            hit.parent.as_deref(),
        );
        let resource = format!("Contents/Resources/Documents/{}", hit.path);
        Self {
            identity,
            score: hit.score,
            name: hit.name,
            entry_type: hit.entry_type,
            docset: docset.name.clone(),
            url: docset_url::docset_url(docset, &resource),
            path: hit.path,
            children: vec![],
        }
    }

    /// Number of nodes in this subtree, including this one.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(ResultNode::count).sum::<usize>()
    }

    /// Depth-first search for the node with `identity`.
    pub fn find(&self, identity: &str) -> Option<&ResultNode> {
        if self.identity == identity {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(identity))
    }
}

/// Rank table key for an entry: `docset::entry_type::qualified_name`.
///
/// Nested entries are qualified by their parent (`parent.name`), so the
/// same method name under two types gets two ranks. The docset part is the
/// docset identifier, which survives re-imports.
pub fn identity(
    docset_identifier: &str,
    entry_type: &str,
    name: &str,
    parent: Option<&str>,
) -> String {
    match parent.filter(|p| !p.is_empty()) {
        Some(parent) => {
            format!("{docset_identifier}::{entry_type}::{parent}.{name}")
        }
        None => format!("{docset_identifier}::{entry_type}::{name}"),
    }
}
