use std::sync::Arc;
use tracing::{debug, warn};

use crate::metric::DistanceMetric;
use crate::types::{EmbeddingRecord, RecordId};

/// A stored record that scored above the threshold
#[derive(Debug, Clone)]
pub struct Match {
    pub record: Arc<EmbeddingRecord>,
    pub score: f32,
}

impl Match {
    pub fn id(&self) -> RecordId {
        self.record.id()
    }
}

/// Result of one linear scan
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    /// First (or best, for a full scan) record above threshold
    pub matched: Option<Match>,

    /// Highest score among the records actually scanned; 0.0 if none were
    pub max_similarity_found: f32,

    /// Records compared
    pub scanned: usize,

    /// Records skipped because their score could not be computed
    pub skipped: usize,

    /// Whether every record was visited
    pub exhaustive: bool,
}

impl SearchOutcome {
    pub fn is_match(&self) -> bool {
        self.matched.is_some()
    }
}

/// Exact linear-scan similarity search
#[derive(Debug, Clone, Copy)]
pub struct MatchSearch {
    metric: DistanceMetric,
    early_exit: bool,
}

impl MatchSearch {
    pub fn new(metric: DistanceMetric, early_exit: bool) -> Self {
        Self { metric, early_exit }
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub fn early_exit(&self) -> bool {
        self.early_exit
    }

    /// Scan `records` in order for a score strictly above `threshold`
    ///
    /// With early exit the first hit wins. Otherwise every record is scored
    /// and the highest hit wins, ties going to the lowest id, so the answer
    /// does not depend on scan order.
    pub fn find_best<'a, I>(&self, query: &[f32], records: I, threshold: f32) -> SearchOutcome
    where
        I: IntoIterator<Item = &'a Arc<EmbeddingRecord>>,
    {
        let mut outcome = SearchOutcome {
            matched: None,
            max_similarity_found: 0.0,
            scanned: 0,
            skipped: 0,
            exhaustive: true,
        };

        let mut iter = records.into_iter();
        for record in iter.by_ref() {
            let score = match self.metric.score(query, record.vector().as_slice()) {
                Ok(score) => score,
                Err(e) => {
                    warn!("Skipping record {} during search: {}", record.id(), e);
                    outcome.skipped += 1;
                    continue;
                }
            };

            outcome.scanned += 1;
            if score > outcome.max_similarity_found {
                outcome.max_similarity_found = score;
            }

            if score <= threshold {
                continue;
            }

            let better = match &outcome.matched {
                None => true,
                Some(current) => {
                    score > current.score || (score == current.score && record.id() < current.id())
                }
            };
            if better {
                outcome.matched = Some(Match {
                    record: Arc::clone(record),
                    score,
                });
            }

            if self.early_exit {
                break;
            }
        }

        if self.early_exit && outcome.matched.is_some() {
            outcome.exhaustive = iter.next().is_none();
        }

        debug!(
            "Search finished - scanned={}, skipped={}, max_similarity={:.4}, matched={:?}",
            outcome.scanned,
            outcome.skipped,
            outcome.max_similarity_found,
            outcome.matched.as_ref().map(Match::id)
        );

        outcome
    }
}
