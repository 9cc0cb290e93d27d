use facededup_common::{validate_threshold, EngineConfig, FaceDedupError, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};

use crate::metric::DistanceMetric;
use crate::search::{MatchSearch, SearchOutcome};
use crate::store::EmbeddingStore;
use crate::types::{EmbeddingVector, Metadata, RejectReason, SubmitResult};

/// Running totals of submission outcomes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CoordinatorStats {
    pub stored: u64,
    pub duplicates: u64,
    pub rejected: u64,
    pub failures: u64,
}

#[derive(Default)]
struct Counters {
    stored: AtomicU64,
    duplicates: AtomicU64,
    rejected: AtomicU64,
    failures: AtomicU64,
}

struct Inner {
    store: Arc<EmbeddingStore>,
    search: MatchSearch,
    config: EngineConfig,
    // Held across scan, decide and append for the whole store
    gate: Arc<Mutex<()>>,
    counters: Counters,
}

/// Search-then-insert-if-new, serialized over the whole store
///
/// Submissions may be cancelled while waiting for the dedup section. Once a
/// submission is inside, the scan/decide/append sequence runs on its own task
/// and finishes even if the caller goes away.
#[derive(Clone)]
pub struct DedupCoordinator {
    inner: Arc<Inner>,
}

impl DedupCoordinator {
    /// Create coordinator over an opened store
    pub fn new(store: Arc<EmbeddingStore>, config: EngineConfig) -> Result<Self> {
        config.validate()?;

        if store.dimension() != config.dimension {
            return Err(FaceDedupError::config(format!(
                "Store dimension {} does not match configured dimension {}",
                store.dimension(),
                config.dimension
            )));
        }

        let search = MatchSearch::new(DistanceMetric::new(config.metric), config.early_exit);

        info!(
            "Dedup coordinator ready - metric={}, threshold={}, early_exit={}, dimension={}",
            config.metric, config.threshold, config.early_exit, config.dimension
        );

        Ok(Self {
            inner: Arc::new(Inner {
                store,
                search,
                config,
                gate: Arc::new(Mutex::new(())),
                counters: Counters::default(),
            }),
        })
    }

    /// Submit an embedding with the configured threshold
    pub async fn submit(&self, vector: Vec<f32>, metadata: Metadata) -> Result<SubmitResult> {
        self.submit_with_threshold(vector, metadata, None).await
    }

    /// Submit extractor output: zero faces is a rejection, extra faces are ignored
    pub async fn submit_extracted(
        &self,
        encodings: Vec<Vec<f32>>,
        metadata: Metadata,
        threshold: Option<f32>,
    ) -> Result<SubmitResult> {
        let face_count = encodings.len();
        let Some(first) = encodings.into_iter().next() else {
            return Ok(self.reject(RejectReason::NoEmbeddingProvided));
        };

        if face_count > 1 {
            warn!("Extractor returned {} faces; using the first", face_count);
        }

        self.submit_with_threshold(first, metadata, threshold).await
    }

    /// Submit an embedding, optionally overriding the threshold for this call
    #[instrument(skip(self, vector, metadata), fields(dimension = vector.len()))]
    pub async fn submit_with_threshold(
        &self,
        vector: Vec<f32>,
        metadata: Metadata,
        threshold: Option<f32>,
    ) -> Result<SubmitResult> {
        let threshold = self.resolve_threshold(threshold)?;

        if let Err(reason) = self.validate(&vector) {
            return Ok(self.reject(reason));
        }
        if vector.iter().any(|v| !v.is_finite()) {
            self.inner.counters.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(FaceDedupError::invalid_input("Embedding contains non-finite values"));
        }

        // Cancellable up to here
        let guard = self.enter().await?;

        let inner = Arc::clone(&self.inner);
        let vector = EmbeddingVector::new(vector);
        tokio::spawn(async move { inner.decide(guard, vector, metadata, threshold).await })
            .await
            .map_err(|e| FaceDedupError::internal(format!("Dedup task failed: {}", e)))?
    }

    /// Read-only search against the current store, outside the dedup section
    pub async fn probe(&self, vector: &[f32], threshold: Option<f32>) -> Result<SearchOutcome> {
        let threshold = self.resolve_threshold(threshold)?;

        match self.validate(vector) {
            Ok(()) => {}
            Err(RejectReason::DimensionMismatch { expected, actual }) => {
                return Err(FaceDedupError::dimension_mismatch(expected, actual))
            }
            Err(RejectReason::NoEmbeddingProvided) => {
                return Err(FaceDedupError::NoEmbeddingProvided)
            }
        }

        let snapshot = self.inner.store.scan().await;
        Ok(self.inner.search.find_best(vector, &snapshot, threshold))
    }

    /// Current record count; may trail an in-flight insert
    pub async fn count(&self) -> usize {
        self.inner.store.count().await
    }

    pub fn stats(&self) -> CoordinatorStats {
        let counters = &self.inner.counters;
        CoordinatorStats {
            stored: counters.stored.load(Ordering::Relaxed),
            duplicates: counters.duplicates.load(Ordering::Relaxed),
            rejected: counters.rejected.load(Ordering::Relaxed),
            failures: counters.failures.load(Ordering::Relaxed),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<EmbeddingStore> {
        &self.inner.store
    }

    fn resolve_threshold(&self, threshold: Option<f32>) -> Result<f32> {
        let threshold = threshold.unwrap_or(self.inner.config.threshold);
        validate_threshold(threshold).map_err(FaceDedupError::invalid_input)?;
        Ok(threshold)
    }

    fn validate(&self, vector: &[f32]) -> std::result::Result<(), RejectReason> {
        if vector.is_empty() {
            return Err(RejectReason::NoEmbeddingProvided);
        }

        let expected = self.inner.config.dimension;
        if vector.len() != expected {
            return Err(RejectReason::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }

        Ok(())
    }

    fn reject(&self, reason: RejectReason) -> SubmitResult {
        self.inner.counters.rejected.fetch_add(1, Ordering::Relaxed);
        info!("Submission rejected: {}", reason);
        SubmitResult::Rejected { reason }
    }

    async fn enter(&self) -> Result<OwnedMutexGuard<()>> {
        let gate = Arc::clone(&self.inner.gate);

        match self.inner.config.lock_timeout_ms {
            Some(ms) => tokio::time::timeout(Duration::from_millis(ms), gate.lock_owned())
                .await
                .map_err(|_| {
                    FaceDedupError::busy(format!("Dedup section not available within {}ms", ms))
                }),
            None => Ok(gate.lock_owned().await),
        }
    }
}

impl Inner {
    /// Scan, decide and optionally append while holding the gate
    async fn decide(
        &self,
        _guard: OwnedMutexGuard<()>,
        vector: EmbeddingVector,
        metadata: Metadata,
        threshold: f32,
    ) -> Result<SubmitResult> {
        let snapshot = self.store.scan().await;
        let outcome = self.search.find_best(vector.as_slice(), &snapshot, threshold);
        let max_similarity_found = outcome.max_similarity_found;

        if let Some(found) = outcome.matched {
            self.counters.duplicates.fetch_add(1, Ordering::Relaxed);
            info!(
                "Duplicate of record {} (score={:.4}, threshold={})",
                found.id(),
                found.score,
                threshold
            );
            return Ok(SubmitResult::Duplicate {
                matched_id: found.id(),
                score: found.score,
                max_similarity_found,
            });
        }

        debug!(
            "No match among {} records (max_similarity={:.4}); inserting",
            snapshot.len(),
            max_similarity_found
        );

        match self.store.append(vector, metadata).await {
            Ok(id) => {
                self.counters.stored.fetch_add(1, Ordering::Relaxed);
                info!(
                    "Stored new embedding as record {} (max_similarity={:.4})",
                    id, max_similarity_found
                );
                Ok(SubmitResult::Stored {
                    id,
                    max_similarity_found,
                })
            }
            Err(e) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }
}
