//! Relevance feedback: persisted ranks for chosen results and the sort
//! that orders nested result trees with them.

use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex, PoisonError, RwLock},
};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::{error::Result, result::ResultNode};

/// Preference ranks keyed by result identity.
const RANKS: TableDefinition<&str, u64> = TableDefinition::new("ranks");

/// Amount added to a rank each time its result is chosen.
pub const RANK_STEP: u64 = 1;

/// Immutable copy of the rank table used for one sort pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RankSnapshot {
    ranks: HashMap<String, u64>,
}

impl RankSnapshot {
    pub fn get(&self, identity: &str) -> u64 {
        self.ranks.get(identity).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    /// Entries sorted by rank, highest first, then by identity.
    pub fn sorted(&self) -> Vec<(&str, u64)> {
        let mut entries: Vec<_> =
            self.ranks.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        entries
    }
}

impl FromIterator<(String, u64)> for RankSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, u64)>>(iter: I) -> Self {
        Self {
            ranks: iter.into_iter().collect(),
        }
    }
}

/// Reorders result trees using persisted relevance feedback.
pub struct Reranker {
    db: Database,
    snapshot: RwLock<Arc<RankSnapshot>>,
    writer: Mutex<()>,
}

impl Reranker {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(RANKS)?;
        txn.commit()?;

        let snapshot = Arc::new(read_all(&db)?);
        tracing::debug!(entries = snapshot.len(), "loaded rank table");

        Ok(Self {
            db,
            snapshot: RwLock::new(snapshot),
            writer: Mutex::new(()),
        })
    }

    pub fn snapshot(&self) -> Arc<RankSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Persisted rank of `identity`, 0 if it was never chosen.
    pub fn rank_for(&self, identity: &str) -> u64 {
        self.snapshot().get(identity)
    }

    /// Record that `identity` was chosen. Returns the new rank.
    pub fn increase_rank(&self, identity: &str) -> Result<u64> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let txn = self.db.begin_write()?;
        let rank = {
            let mut table = txn.open_table(RANKS)?;
            let current = table.get(identity)?.map_or(0, |v| v.value());
            let rank = current.saturating_add(RANK_STEP);
            table.insert(identity, rank)?;
            rank
        };
        txn.commit()?;

        self.publish(|ranks| {
            ranks.insert(identity.to_string(), rank);
        });
        tracing::debug!(identity, rank, "increased rank");
        Ok(rank)
    }

    /// Seed ranks in bulk. Given identities are overwritten; others keep
    /// their ranks.
    pub fn save_defaults<I, S>(&self, entries: I) -> Result<usize>
    where
        I: IntoIterator<Item = (S, u64)>,
        S: AsRef<str>,
    {
        let entries: Vec<(S, u64)> = entries.into_iter().collect();
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(RANKS)?;
            for (identity, rank) in &entries {
                table.insert(identity.as_ref(), *rank)?;
            }
        }
        txn.commit()?;

        self.publish(|ranks| {
            for (identity, rank) in &entries {
                ranks.insert(identity.as_ref().to_string(), *rank);
            }
        });
        Ok(entries.len())
    }

    /// Forget every rank.
    pub fn reset(&self) -> Result<()> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let txn = self.db.begin_write()?;
        txn.delete_table(RANKS)?;
        txn.open_table(RANKS)?;
        txn.commit()?;

        self.publish(HashMap::clear);
        tracing::info!("reset rank table");
        Ok(())
    }

    /// Reorder `tree` against the current rank table.
    pub fn sort_nested_results(
        &self,
        tree: Vec<ResultNode>,
    ) -> Vec<ResultNode> {
        sort_tree(tree, &self.snapshot())
    }

    fn publish(&self, update: impl FnOnce(&mut HashMap<String, u64>)) {
        let mut state =
            self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = RankSnapshot::clone(&state);
        update(&mut next.ranks);
        *state = Arc::new(next);
    }
}

impl std::fmt::Debug for Reranker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reranker")
            .field("entries", &self.snapshot().len())
            .finish_non_exhaustive()
    }
}

/// Sort every level of `tree`: score descending, then rank descending,
/// then input order.
pub fn sort_tree(
    tree: Vec<ResultNode>,
    ranks: &RankSnapshot,
) -> Vec<ResultNode> {
    let mut level: Vec<(usize, u64, ResultNode)> = tree
        .into_iter()
        .enumerate()
        .map(|(position, mut node)| {
            let children = std::mem::take(&mut node.children);
            node.children = sort_tree(children, ranks);
            (position, ranks.get(&node.identity), node)
        })
        .collect();

    level.sort_by(|(pa, ra, a), (pb, rb, b)| {
        b.score
            .total_cmp(&a.score)
            .then(rb.cmp(ra))
            .then(pa.cmp(pb))
    });

    level.into_iter().map(|(_, _, node)| node).collect()
}

fn read_all(db: &Database) -> Result<RankSnapshot> {
    let txn = db.begin_read()?;
    let table = txn.open_table(RANKS)?;
    let mut ranks = HashMap::new();
    for entry in table.iter()? {
        let (k, v) = entry?;
        ranks.insert(k.value().to_string(), v.value());
    }
    Ok(RankSnapshot { ranks })
}
