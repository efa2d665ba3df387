//! Distance metrics for vector similarity.

use std::fmt;

/// Distance metric for vector similarity calculations.
///
/// Scores returned by [`DistanceMetric::score`] are always in `[0, 1]`,
/// higher meaning more similar, so callers can compare and scale them
/// without knowing which metric a collection uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DistanceMetric {
    /// Cosine similarity, mapped to `(1 + cos) / 2`.
    ///
    /// Best for: Text embeddings, semantic similarity.
    #[default]
    Cosine,

    /// Euclidean (L2) distance, mapped to `1 / (1 + dist)`.
    Euclidean,
}

impl DistanceMetric {
    /// Compute the normalized similarity score between two vectors.
    #[inline]
    pub fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len(), "Vector dimensions must match");

        match self {
            DistanceMetric::Cosine => {
                let cos = cosine_similarity(a, b).clamp(-1.0, 1.0);
                (1.0 + cos) / 2.0
            }
            DistanceMetric::Euclidean => 1.0 / (1.0 + euclidean_distance(a, b)),
        }
    }

    /// Get the name of this distance metric.
    pub fn name(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Euclidean => "euclidean",
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for DistanceMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cosine" | "cos" => Ok(DistanceMetric::Cosine),
            "euclidean" | "l2" | "euclid" => Ok(DistanceMetric::Euclidean),
            _ => Err(format!("Unknown distance metric: {}", s)),
        }
    }
}

// ============================================================================
// Distance Functions
// ============================================================================

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1]; zero-norm inputs yield 0.
#[inline]
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = (norm_a * norm_b).sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

#[inline]
fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Squared L2 norm, used to reject zero vectors under cosine.
#[inline]
pub(crate) fn norm_squared(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum()
}

// ============================================================================
// Tests
// ============================================================================
