/// FaceDedup error types
#[derive(Debug, thiserror::Error)]
pub enum FaceDedupError {
    /// Vector length disagrees with the configured dimension
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Upstream extraction produced no usable embedding
    #[error("No embedding provided")]
    NoEmbeddingProvided,

    /// Persistence collaborator failed (retryable)
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Similarity could not be computed for a stored record
    #[error("Distance computation error: {0}")]
    DistanceComputation(String),

    /// Persisted vector could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Dedup section could not be entered in time (retryable)
    #[error("Busy: {0}")]
    Busy(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// General error (anyhow integration)
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FaceDedupError {
    /// Create dimension mismatch error
    pub fn dimension_mismatch(expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch { expected, actual }
    }

    /// Create store unavailable error
    pub fn store_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::StoreUnavailable(msg.into())
    }

    /// Create distance computation error
    pub fn distance<S: Into<String>>(msg: S) -> Self {
        Self::DistanceComputation(msg.into())
    }

    /// Create codec error
    pub fn codec<S: Into<String>>(msg: S) -> Self {
        Self::Codec(msg.into())
    }

    /// Create config error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create busy error
    pub fn busy<S: Into<String>>(msg: S) -> Self {
        Self::Busy(msg.into())
    }

    /// Create invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }
}

impl FaceDedupError {
    /// Whether the caller may retry the same request later.
    ///
    /// Bad input is never retryable; storage hiccups and lock contention are.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::StoreUnavailable(_) => true,
            Self::Busy(_) => true,
            Self::Io(_) => true,
            Self::DimensionMismatch { .. } => false,
            Self::NoEmbeddingProvided => false,
            Self::DistanceComputation(_) => false,
            Self::Codec(_) => false,
            Self::Config(_) => false,
            Self::InvalidInput(_) => false,
            Self::Internal(_) => false,
            Self::Json(_) => false,
            Self::Other(_) => false,
        }
    }
}

impl From<config::ConfigError> for FaceDedupError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_split() {
        assert!(FaceDedupError::store_unavailable("disk gone").is_retryable());
        assert!(FaceDedupError::busy("lock timeout").is_retryable());
        assert!(!FaceDedupError::dimension_mismatch(128, 127).is_retryable());
        assert!(!FaceDedupError::NoEmbeddingProvided.is_retryable());
        assert!(!FaceDedupError::codec("bad checksum").is_retryable());
    }

    #[test]
    fn test_display() {
        let err = FaceDedupError::dimension_mismatch(4, 3);
        assert_eq!(err.to_string(), "Dimension mismatch: expected 4, got 3");
    }
}
