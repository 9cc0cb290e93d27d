//! FaceDedup common layer
//!
//! Configuration, error taxonomy and logging shared by the engine and the CLI

pub mod config;
pub mod error;
pub mod logger;

// Re-export commonly used types
pub use config::{validate_threshold, AppConfig, EngineConfig, MetricKind};
pub use error::FaceDedupError;

pub type Result<T> = std::result::Result<T, FaceDedupError>;
