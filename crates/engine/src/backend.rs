//! Persistence collaborators behind [`EmbeddingStore`](crate::EmbeddingStore)

use async_trait::async_trait;
use facededup_common::{FaceDedupError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::codec::{self, EncodedVector};
use crate::types::{EmbeddingRecord, Metadata, RecordId};

/// Records recovered from storage at open time
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Intact records in id order
    pub records: Vec<EmbeddingRecord>,

    /// Units that could not be decoded and were left out
    pub skipped: usize,

    /// Highest id found in storage, counting units that were skipped
    pub max_id: Option<RecordId>,
}

/// Durable storage for embedding records
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Read every persisted record
    async fn load(&self) -> Result<LoadReport>;

    /// Durably write one record; must not interleave with other writes
    async fn persist(&self, record: &EmbeddingRecord) -> Result<()>;

    /// Flush and release resources
    async fn close(&self) -> Result<()>;

    /// Human-readable location, for logs
    fn describe(&self) -> String;
}

/// Non-durable backend, for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: std::sync::Mutex<Vec<EmbeddingRecord>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn load(&self) -> Result<LoadReport> {
        let records = self
            .records
            .lock()
            .map_err(|_| FaceDedupError::internal("memory backend lock poisoned"))?
            .clone();
        let max_id = records.iter().map(|record| record.id()).max();

        Ok(LoadReport {
            records,
            skipped: 0,
            max_id,
        })
    }

    async fn persist(&self, record: &EmbeddingRecord) -> Result<()> {
        self.records
            .lock()
            .map_err(|_| FaceDedupError::internal("memory backend lock poisoned"))?
            .push(record.clone());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// One persisted line of the JSON Lines store
#[derive(Debug, Serialize, Deserialize)]
struct StoredLine {
    id: RecordId,
    #[serde(flatten)]
    vector: EncodedVector,
    #[serde(default)]
    metadata: Metadata,
}

/// Just the id of a line, readable even when the rest is damaged
#[derive(Deserialize)]
struct LineId {
    id: RecordId,
}

struct AppendHandle {
    file: tokio::fs::File,
    // Bytes known to be on disk; a failed write is cut back to this
    len: u64,
    // The file does not end with a newline
    torn: bool,
}

/// Append-only JSON Lines file, one record per line
pub struct JsonlBackend {
    path: PathBuf,
    dimension: usize,
    fsync: bool,
    handle: Mutex<Option<AppendHandle>>,
    #[cfg(test)]
    fail_after_write: std::sync::atomic::AtomicBool,
}

impl JsonlBackend {
    /// Create backend for `path`; the file is opened lazily by `load`
    pub fn new(path: impl Into<PathBuf>, dimension: usize, fsync: bool) -> Self {
        Self {
            path: path.into(),
            dimension,
            fsync,
            handle: Mutex::new(None),
            #[cfg(test)]
            fail_after_write: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parse_line(&self, line: &str) -> Result<EmbeddingRecord> {
        let stored: StoredLine = serde_json::from_str(line)?;
        let vector = codec::decode(&stored.vector)?;

        if vector.len() != self.dimension {
            return Err(FaceDedupError::dimension_mismatch(self.dimension, vector.len()));
        }

        Ok(EmbeddingRecord::new(stored.id, vector, stored.metadata))
    }

    async fn open_append(&self) -> Result<AppendHandle> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    FaceDedupError::store_unavailable(format!(
                        "Failed to create {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| {
                FaceDedupError::store_unavailable(format!(
                    "Failed to open {}: {}",
                    self.path.display(),
                    e
                ))
            })?;

        Ok(AppendHandle {
            file,
            len: 0,
            torn: false,
        })
    }
}

#[async_trait]
impl StorageBackend for JsonlBackend {
    async fn load(&self) -> Result<LoadReport> {
        let mut report = LoadReport::default();

        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Store file {} does not exist yet", self.path.display());
                Vec::new()
            }
            Err(e) => {
                return Err(FaceDedupError::store_unavailable(format!(
                    "Failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        let text = String::from_utf8_lossy(&data);
        let mut seen = HashSet::new();

        for (index, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }

            if let Ok(LineId { id }) = serde_json::from_str::<LineId>(line) {
                report.max_id = report.max_id.max(Some(id));
            }

            match self.parse_line(line) {
                Ok(record) if !seen.insert(record.id()) => {
                    warn!(
                        "Skipping duplicate record id {} at {}:{}",
                        record.id(),
                        self.path.display(),
                        index + 1
                    );
                    report.skipped += 1;
                }
                Ok(record) => report.records.push(record),
                Err(e) => {
                    warn!(
                        "Skipping corrupt record at {}:{}: {}",
                        self.path.display(),
                        index + 1,
                        e
                    );
                    report.skipped += 1;
                }
            }
        }

        report.records.sort_by_key(|record| record.id());

        let mut handle = self.open_append().await?;
        // A crash mid-write leaves an unterminated last line; start fresh after it
        handle.len = data.len() as u64;
        handle.torn = !data.is_empty() && !data.ends_with(b"\n");
        *self.handle.lock().await = Some(handle);

        info!(
            "Loaded {} records from {} ({} skipped)",
            report.records.len(),
            self.path.display(),
            report.skipped
        );
        Ok(report)
    }

    async fn persist(&self, record: &EmbeddingRecord) -> Result<()> {
        let line = StoredLine {
            id: record.id(),
            vector: codec::encode(record.vector()),
            metadata: record.metadata().clone(),
        };

        let mut buf = serde_json::to_vec(&line)?;
        buf.push(b'\n');

        let mut guard = self.handle.lock().await;
        let handle = guard.as_mut().ok_or_else(|| {
            FaceDedupError::store_unavailable(format!("{} is not open", self.path.display()))
        })?;

        if handle.torn {
            buf.insert(0, b'\n');
        }

        let result = async {
            handle.file.write_all(&buf).await?;
            handle.file.flush().await?;
            #[cfg(test)]
            if self
                .fail_after_write
                .swap(false, std::sync::atomic::Ordering::SeqCst)
            {
                return Err(std::io::Error::other("injected sync failure"));
            }
            if self.fsync {
                handle.file.sync_data().await?;
            }
            Ok::<(), std::io::Error>(())
        }
        .await;

        match result {
            Ok(()) => {
                handle.len += buf.len() as u64;
                handle.torn = false;
                Ok(())
            }
            Err(e) => {
                // drop whatever part of the line reached the file
                match handle.file.set_len(handle.len).await {
                    Ok(()) => debug!(
                        "Truncated {} back to {} bytes",
                        self.path.display(),
                        handle.len
                    ),
                    Err(truncate_err) => {
                        handle.torn = true;
                        error!(
                            "Failed to truncate {} after a failed write: {}",
                            self.path.display(),
                            truncate_err
                        );
                    }
                }
                error!(
                    "Failed to append record {} to {}: {}",
                    record.id(),
                    self.path.display(),
                    e
                );
                Err(FaceDedupError::store_unavailable(format!(
                    "Failed to append record {}: {}",
                    record.id(),
                    e
                )))
            }
        }
    }

    async fn close(&self) -> Result<()> {
        if let Some(mut handle) = self.handle.lock().await.take() {
            handle.file.flush().await.map_err(|e| {
                FaceDedupError::store_unavailable(format!("Failed to flush on close: {}", e))
            })?;
            handle.file.sync_all().await.map_err(|e| {
                FaceDedupError::store_unavailable(format!("Failed to sync on close: {}", e))
            })?;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EmbeddingVector;

    fn record(id: u64, values: Vec<f32>) -> EmbeddingRecord {
        EmbeddingRecord::new(
            RecordId(id),
            EmbeddingVector::new(values),
            Metadata::new().with_text("filename", format!("face_{}.jpg", id)),
        )
    }

    #[tokio::test]
    async fn test_jsonl_persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.jsonl");

        let backend = JsonlBackend::new(&path, 3, false);
        assert!(backend.load().await.unwrap().records.is_empty());
        backend.persist(&record(1, vec![1.0, 0.0, 0.0])).await.unwrap();
        backend.persist(&record(2, vec![0.0, 1.0, 0.0])).await.unwrap();
        backend.close().await.unwrap();

        let reopened = JsonlBackend::new(&path, 3, false);
        let report = reopened.load().await.unwrap();
        assert_eq!(report.skipped, 0);
        assert_eq!(report.records.len(), 2);
        assert_eq!(report.records[1].id(), RecordId(2));
        assert_eq!(report.records[1].vector().as_slice(), &[0.0, 1.0, 0.0]);
        assert_eq!(report.records[0].metadata(), record(1, vec![]).metadata());
    }

    #[tokio::test]
    async fn test_jsonl_skips_corrupt_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.jsonl");

        let backend = JsonlBackend::new(&path, 2, false);
        backend.load().await.unwrap();
        backend.persist(&record(1, vec![1.0, 0.0])).await.unwrap();
        backend.close().await.unwrap();

        // garbage, a wrong-dimension record, then a torn trailing write
        let wrong_dim = serde_json::to_string(&StoredLine {
            id: RecordId(2),
            vector: codec::encode(&EmbeddingVector::new(vec![1.0, 2.0, 3.0])),
            metadata: Metadata::new(),
        })
        .unwrap();
        let mut contents = tokio::fs::read_to_string(&path).await.unwrap();
        contents.push_str("not json\n");
        contents.push_str(&wrong_dim);
        contents.push('\n');
        contents.push_str("{\"id\":3,\"payl");
        tokio::fs::write(&path, contents).await.unwrap();

        let reopened = JsonlBackend::new(&path, 2, false);
        let report = reopened.load().await.unwrap();
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.skipped, 3);

        // a new append after the torn line must land on its own line
        reopened.persist(&record(4, vec![0.0, 1.0])).await.unwrap();
        reopened.close().await.unwrap();

        let report = JsonlBackend::new(&path, 2, false).load().await.unwrap();
        let ids: Vec<u64> = report.records.iter().map(|r| r.id().get()).collect();
        assert_eq!(ids, vec![1, 4]);
    }

    #[tokio::test]
    async fn test_jsonl_failed_write_is_rolled_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.jsonl");

        let backend = JsonlBackend::new(&path, 2, true);
        backend.load().await.unwrap();
        backend.persist(&record(1, vec![1.0, 0.0])).await.unwrap();

        backend
            .fail_after_write
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let err = backend.persist(&record(2, vec![0.0, 1.0])).await.unwrap_err();
        assert!(err.is_retryable());

        backend.persist(&record(3, vec![0.5, 0.5])).await.unwrap();
        backend.close().await.unwrap();

        let report = JsonlBackend::new(&path, 2, true).load().await.unwrap();
        let ids: Vec<u64> = report.records.iter().map(|r| r.id().get()).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.max_id, Some(RecordId(3)));
    }

    #[tokio::test]
    async fn test_jsonl_max_id_counts_skipped_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.jsonl");

        let backend = JsonlBackend::new(&path, 2, false);
        backend.load().await.unwrap();
        backend.persist(&record(1, vec![1.0, 0.0])).await.unwrap();
        backend.close().await.unwrap();

        let mut contents = tokio::fs::read_to_string(&path).await.unwrap();
        contents.push_str("{\"id\":7,\"payload\":\"zz\",\"checksum\":\"00\"}\n");
        tokio::fs::write(&path, contents).await.unwrap();

        let report = JsonlBackend::new(&path, 2, false).load().await.unwrap();
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.max_id, Some(RecordId(7)));
    }

    #[tokio::test]
    async fn test_jsonl_persist_before_load_fails() {
        let dir = tempfile::tempdir().unwrap();
        let backend = JsonlBackend::new(dir.path().join("store.jsonl"), 2, false);

        let err = backend.persist(&record(1, vec![1.0, 0.0])).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_memory_backend() {
        let backend = MemoryBackend::new();
        backend.persist(&record(1, vec![1.0])).await.unwrap();
        let report = backend.load().await.unwrap();
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.max_id, Some(RecordId(1)));
        assert_eq!(backend.describe(), "memory");
    }
}
