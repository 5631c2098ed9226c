//! Embeddings seam
//!
//! Embeddings are an optional capability supplied by the host. The engine
//! never generates vectors itself; it asks an [`Embedder`] and degrades to
//! lexical ranking whenever the answer is an error or the capability is
//! absent.

use crate::cancel::CancelToken;

// ============================================================================
// EMBEDDER TRAIT
// ============================================================================

/// Opaque embedding function provided by the host.
///
/// May block arbitrarily long; implementations are expected to honor the
/// cancellation token, and callers invoke this outside the writer lock.
pub trait Embedder: Send + Sync {
    /// Embed `text`, or explain why that is not possible right now.
    fn embed(&self, text: &str, cancel: &CancelToken) -> Result<Vec<f32>, EmbedUnavailable>;
}

/// Why an embedding could not be produced.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EmbedUnavailable {
    /// The host wired no embedder at all
    #[error("no embedder configured")]
    NotConfigured,
    /// The embedder failed or timed out; message is opaque
    #[error("embedder failed: {0}")]
    Failed(String),
}

// ============================================================================
// SIMILARITY
// ============================================================================

/// Cosine similarity between two vectors.
///
/// Mismatched dimensions and zero vectors score 0.0 rather than erroring:
/// a useless vector should demote a result, not fail a search.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot_product = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot_product += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a.sqrt() * norm_b.sqrt())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identity_and_orthogonality() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_cosine_scale_invariance() {
        let a = vec![0.2, 0.4, 0.6];
        let b: Vec<f32> = a.iter().map(|x| x * 10.0).collect();
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
    }
}
