use facededup_common::{FaceDedupError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::backend::StorageBackend;
use crate::types::{EmbeddingRecord, EmbeddingVector, Metadata, RecordId};

type RecordList = Arc<Vec<Arc<EmbeddingRecord>>>;

/// Point-in-time view of the store
///
/// Cheap to take and to clone; later appends are not visible through it.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    records: RecordList,
}

impl Snapshot {
    /// Records in insertion (id) order; may be iterated any number of times
    pub fn iter(&self) -> impl Iterator<Item = &Arc<EmbeddingRecord>> + '_ {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a Arc<EmbeddingRecord>;
    type IntoIter = std::slice::Iter<'a, Arc<EmbeddingRecord>>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Owner of every embedding record
///
/// Keeps an in-memory mirror for scans; the backend is the durable copy.
/// A record is published to the mirror only after the backend accepted it.
pub struct EmbeddingStore {
    backend: Arc<dyn StorageBackend>,
    dimension: usize,
    mirror: RwLock<RecordList>,
    // Serializes appends and owns the id counter
    next_id: Mutex<u64>,
    closed: AtomicBool,
}

impl EmbeddingStore {
    /// Open the store and load all persisted records
    pub async fn open(backend: Arc<dyn StorageBackend>, dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(FaceDedupError::config("Store dimension must be positive"));
        }

        let report = backend.load().await?;

        let mut records = Vec::with_capacity(report.records.len());
        for record in report.records {
            // backends filter by dimension, but a foreign backend might not
            if record.vector().len() != dimension {
                tracing::warn!(
                    "Dropping record {} with dimension {} (store expects {})",
                    record.id(),
                    record.vector().len(),
                    dimension
                );
                continue;
            }
            records.push(Arc::new(record));
        }
        records.sort_by_key(|record| record.id());

        // skipped lines still own their ids
        let highest = records
            .last()
            .map(|r| r.id())
            .max(report.max_id)
            .map(|id| id.get())
            .unwrap_or(0);
        let next_id = highest + 1;

        info!(
            "Embedding store opened at {} - {} records, dimension {}",
            backend.describe(),
            records.len(),
            dimension
        );

        Ok(Self {
            backend,
            dimension,
            mirror: RwLock::new(Arc::new(records)),
            next_id: Mutex::new(next_id),
            closed: AtomicBool::new(false),
        })
    }

    /// Persist a new record and return its id
    pub async fn append(&self, vector: EmbeddingVector, metadata: Metadata) -> Result<RecordId> {
        if vector.len() != self.dimension {
            return Err(FaceDedupError::dimension_mismatch(self.dimension, vector.len()));
        }
        if vector.as_slice().iter().any(|v| !v.is_finite()) {
            return Err(FaceDedupError::invalid_input("Embedding contains non-finite values"));
        }

        let mut next_id = self.next_id.lock().await;
        if self.closed.load(Ordering::Acquire) {
            return Err(FaceDedupError::store_unavailable("Store is closed"));
        }

        let id = RecordId(*next_id);
        // an id is never handed out twice, even when the write fails
        *next_id += 1;

        let record = EmbeddingRecord::new(id, vector, metadata);
        self.backend.persist(&record).await?;

        let mut mirror = self.mirror.write().await;
        Arc::make_mut(&mut *mirror).push(Arc::new(record));

        debug!("Appended record {} ({} total)", id, mirror.len());
        Ok(id)
    }

    /// Snapshot of all committed records as of now
    pub async fn scan(&self) -> Snapshot {
        Snapshot {
            records: Arc::clone(&*self.mirror.read().await),
        }
    }

    /// Current record count
    pub async fn count(&self) -> usize {
        self.mirror.read().await.len()
    }

    /// Look up a record by id
    pub async fn get(&self, id: RecordId) -> Option<Arc<EmbeddingRecord>> {
        let mirror = self.mirror.read().await;
        mirror
            .binary_search_by_key(&id, |record| record.id())
            .ok()
            .map(|index| Arc::clone(&mirror[index]))
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn location(&self) -> String {
        self.backend.describe()
    }

    /// Flush the backend and refuse further appends
    pub async fn close(&self) -> Result<()> {
        // wait out any in-flight append
        let _appends = self.next_id.lock().await;
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.backend.close().await?;
        info!("Embedding store closed at {}", self.backend.describe());
        Ok(())
    }
}
