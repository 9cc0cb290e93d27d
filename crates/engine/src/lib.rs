//! FaceDedup embedding engine
//!
//! Stores face embeddings and decides, atomically with respect to other
//! submissions, whether a new embedding duplicates one already stored.

pub mod backend;
pub mod codec;
mod coordinator;
pub mod metric;
mod search;
mod store;
mod types;

pub use backend::{JsonlBackend, LoadReport, MemoryBackend, StorageBackend};
pub use coordinator::{CoordinatorStats, DedupCoordinator};
pub use metric::DistanceMetric;
pub use search::{Match, MatchSearch, SearchOutcome};
pub use store::{EmbeddingStore, Snapshot};
pub use types::{
    EmbeddingRecord, EmbeddingVector, Metadata, MetadataValue, RecordId, RejectReason,
    SubmitResult,
};
