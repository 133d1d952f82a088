//! The embedder capability
//!
//! Concrete embedder implementations (OpenAI, Gemini, Ollama, local ONNX
//! models) are external collaborators — out of scope here (spec §1). This
//! module defines the contract they satisfy, the deterministic fallback
//! vector used when an embedder call fails, and a trivial deterministic
//! embedder used as the default when no real one is configured.

/// Dimension of the deterministic fallback embedding. Kept at 768 to match
/// the common embedding dimension named in spec §3.
pub const EMBEDDING_DIMENSIONS: usize = 768;

#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum EmbedError {
    #[error("embedding failed: {0}")]
    Failed(String),
}

/// Anything that can turn text into a dense vector.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;

    /// Batch embedding. The default falls back to one call per input; real
    /// adapters override this to batch the underlying API call.
    fn embed_many(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

/// A 768-bucket byte histogram of `text`, L1-normalized so bucket values sum
/// to 1. This is part of the contract, not an implementation quirk (spec §9
/// "Fallback embedding"): it keeps writes from ever failing on embedder
/// outage, and makes tests reproducible without a real model.
pub fn fallback_embedding(text: &str) -> Vec<f32> {
    let mut buckets = vec![0f32; EMBEDDING_DIMENSIONS];
    let bytes = text.as_bytes();
    if bytes.is_empty() {
        return buckets;
    }
    for &b in bytes {
        buckets[b as usize % EMBEDDING_DIMENSIONS] += 1.0;
    }
    let total = bytes.len() as f32;
    for v in &mut buckets {
        *v /= total;
    }
    buckets
}

/// Embed `text`, falling back to the deterministic histogram on any error or
/// empty result. Writes and reads never fail because the embedder is down.
pub fn embed_or_fallback(embedder: &dyn Embedder, text: &str) -> Vec<f32> {
    match embedder.embed(text) {
        Ok(v) if !v.is_empty() => v,
        _ => fallback_embedding(text),
    }
}

/// A deterministic embedder that always returns the fallback histogram.
/// Used when no real embedder is configured (e.g. `SessionMemory`'s
/// "auto-selected from environment; falls back to deterministic dummy",
/// spec §4.3) and throughout this crate's own tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct DummyEmbedder;

impl Embedder for DummyEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        Ok(fallback_embedding(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_is_deterministic() {
        let a = fallback_embedding("hello world");
        let b = fallback_embedding("hello world");
        assert_eq!(a, b);
        assert_eq!(a.len(), EMBEDDING_DIMENSIONS);
    }

    #[test]
    fn fallback_differs_for_different_text() {
        assert_ne!(fallback_embedding("alpha"), fallback_embedding("beta"));
    }

    #[test]
    fn fallback_sums_to_one() {
        let v = fallback_embedding("some content here");
        let sum: f32 = v.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
    }

    struct FailingEmbedder;
    impl Embedder for FailingEmbedder {
        fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbedError> {
            Err(EmbedError::Failed("outage".into()))
        }
    }

    #[test]
    fn embed_or_fallback_degrades_on_error() {
        let v = embed_or_fallback(&FailingEmbedder, "hi");
        assert_eq!(v, fallback_embedding("hi"));
    }
}
