//! Similarity metrics
//!
//! Every score lands in [0, 1], higher meaning more similar. The metric is
//! chosen once at startup so all comparisons in a deployment are comparable.

use facededup_common::{FaceDedupError, MetricKind, Result};
use ndarray::{Array1, ArrayView1};

/// Similarity function bound to one [`MetricKind`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistanceMetric {
    kind: MetricKind,
}

impl DistanceMetric {
    pub fn new(kind: MetricKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    /// Similarity between two vectors of equal length
    pub fn score(&self, a: &[f32], b: &[f32]) -> Result<f32> {
        if a.len() != b.len() {
            return Err(FaceDedupError::dimension_mismatch(a.len(), b.len()));
        }

        let a = widen(a);
        let b = widen(b);

        let raw = match self.kind {
            MetricKind::Cosine => cosine_similarity(&a, &b),
            MetricKind::Euclidean => euclidean_similarity(&a, &b),
        };

        if !raw.is_finite() {
            return Err(FaceDedupError::distance(format!(
                "{} similarity is not finite",
                self.kind
            )));
        }

        Ok(raw.clamp(0.0, 1.0) as f32)
    }
}

// Accumulate in f64 so identical vectors score exactly 1.0 after narrowing.
fn widen(v: &[f32]) -> Array1<f64> {
    ArrayView1::from(v).mapv(f64::from)
}

/// `dot(a, b) / (‖a‖·‖b‖)`; zero-norm operands score 0
fn cosine_similarity(a: &Array1<f64>, b: &Array1<f64>) -> f64 {
    let norm_a = a.dot(a).sqrt();
    let norm_b = b.dot(b).sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    a.dot(b) / (norm_a * norm_b)
}

/// `1 - ‖a - b‖₂`
fn euclidean_similarity(a: &Array1<f64>, b: &Array1<f64>) -> f64 {
    let diff = a - b;
    1.0 - diff.dot(&diff).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine() -> DistanceMetric {
        DistanceMetric::new(MetricKind::Cosine)
    }

    fn euclidean() -> DistanceMetric {
        DistanceMetric::new(MetricKind::Euclidean)
    }

    #[test]
    fn test_cosine_identical_is_one() {
        let v = [0.12, -0.4, 0.33, 0.9];
        assert_eq!(cosine().score(&v, &v).unwrap(), 1.0);
    }

    #[test]
    fn test_cosine_orthogonal_is_zero() {
        let score = cosine().score(&[1.0, 0.0, 0.0, 0.0], &[0.0, 1.0, 0.0, 0.0]).unwrap();
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_cosine_opposite_clamps_to_zero() {
        let score = cosine().score(&[1.0, 0.0], &[-1.0, 0.0]).unwrap();
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_cosine_does_not_assume_unit_length() {
        let score = cosine().score(&[1.0, 0.0, 0.0, 0.0], &[0.9, 0.1, 0.0, 0.0]).unwrap();
        assert!((score - 0.99388).abs() < 1e-4, "score was {}", score);

        let scaled = cosine().score(&[10.0, 0.0], &[0.5, 0.0]).unwrap();
        assert_eq!(scaled, 1.0);
    }

    #[test]
    fn test_cosine_zero_vector() {
        assert_eq!(cosine().score(&[0.0, 0.0], &[1.0, 0.0]).unwrap(), 0.0);
    }

    #[test]
    fn test_euclidean() {
        assert_eq!(euclidean().score(&[0.3, 0.4], &[0.3, 0.4]).unwrap(), 1.0);

        // distance 0.5
        let score = euclidean().score(&[0.0, 0.0], &[0.3, 0.4]).unwrap();
        assert!((score - 0.5).abs() < 1e-6);

        // distance beyond 1 floors at 0
        let far = euclidean().score(&[0.0, 0.0], &[3.0, 4.0]).unwrap();
        assert_eq!(far, 0.0);
    }

    #[test]
    fn test_metrics_disagree_on_same_pair() {
        let a = [1.0, 0.0, 0.0, 0.0];
        let b = [2.0, 0.0, 0.0, 0.0];
        assert_eq!(cosine().score(&a, &b).unwrap(), 1.0);
        assert_eq!(euclidean().score(&a, &b).unwrap(), 0.0);
    }

    #[test]
    fn test_dimension_mismatch() {
        let err = cosine().score(&[1.0, 0.0], &[1.0, 0.0, 0.0]).unwrap_err();
        assert!(matches!(
            err,
            FaceDedupError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));
    }

    #[test]
    fn test_nan_is_computation_error() {
        let err = euclidean().score(&[f32::NAN, 0.0], &[0.0, 0.0]).unwrap_err();
        assert!(matches!(err, FaceDedupError::DistanceComputation(_)));
    }
}
