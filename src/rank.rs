//! Match ranking for content-store queries.
//!
//! The store gathers [`MatchStats`] for each hit and hands them to a
//! [`RankFunction`]. Scores are only comparable within one query.

/// Field weights applied to per-field term hits.
pub const NAME_WEIGHT: f64 = 4.0;
pub const BODY_WEIGHT: f64 = 1.0;

/// Bonus added when the entry name equals the whole query.
pub const EXACT_NAME_BONUS: f64 = 8.0;
/// Bonus added when the entry name starts with the query.
pub const PREFIX_NAME_BONUS: f64 = 3.0;

/// Raw match statistics for one hit, per query term.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchStats {
    /// Hits of each query term in the entry name.
    pub name_hits: Vec<u32>,
    /// Hits of each query term in the page body.
    pub body_hits: Vec<u32>,
    /// Documents in the store containing each term, across all fields.
    pub doc_freq: Vec<u64>,
    /// Documents in the store.
    pub num_docs: u64,
    /// The entry name equals the query, ignoring case.
    pub exact_name: bool,
    /// The entry name starts with the query, ignoring case.
    pub prefix_name: bool,
    /// Score reported by the full-text engine.
    pub engine_score: f32,
    /// Length of the entry name in characters.
    pub name_len: usize,
}

/// Turns match statistics into a single relevance score.
pub trait RankFunction: Send + Sync {
    fn score(&self, stats: &MatchStats) -> f64;
}

/// Weighted term-hit ranking with name bonuses.
///
/// Each term contributes `weight * hits / (1 + hits)` per field, scaled by
/// its inverse document frequency, so more hits always raise the score but
/// with diminishing returns. Exact and prefix name matches add fixed
/// bonuses, and shorter names win ties between otherwise equal entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchRank;

impl RankFunction for MatchRank {
    fn score(&self, stats: &MatchStats) -> f64 {
        let terms = stats.name_hits.len().max(stats.body_hits.len());
        let mut score = 0.0;

        for term in 0..terms {
            let idf = inverse_doc_freq(
                stats.doc_freq.get(term).copied().unwrap_or(0),
                stats.num_docs,
            );
            let name = saturate(stats.name_hits.get(term).copied());
            let body = saturate(stats.body_hits.get(term).copied());
            score += idf * (NAME_WEIGHT * name + BODY_WEIGHT * body);
        }

        if stats.exact_name {
            score += EXACT_NAME_BONUS;
        } else if stats.prefix_name {
            score += PREFIX_NAME_BONUS;
        }

        if score > 0.0 {
            score += 1.0 / (1.0 + stats.name_len as f64);
        }

        score + f64::from(stats.engine_score.max(0.0)) * 0.1
    }
}

fn saturate(hits: Option<u32>) -> f64 {
    let hits = f64::from(hits.unwrap_or(0));
    hits / (1.0 + hits)
}

fn inverse_doc_freq(doc_freq: u64, num_docs: u64) -> f64 {
    let n = num_docs as f64;
    let df = doc_freq.min(num_docs) as f64;
    (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
}
