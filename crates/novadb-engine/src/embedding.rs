//! The embedding collaborator (spec.md §6): turns raw text/bytes into a
//! fixed-dimension vector. `embed` must be deterministic and must never
//! panic; failure is reported through the error taxonomy, not a panic.

use async_trait::async_trait;
use novadb_core::{NovaError, Result};

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>>;
    async fn embed_bytes(&self, bytes: &[u8]) -> Result<Vec<f32>>;
}

/// Deterministic, model-free embedder: hashes the input with BLAKE3 and
/// expands the digest into `dimension` floats in `[-1, 1]`. Stands in for a
/// real embedding model collaborator in tests and demos; `find({like: ...})`
/// and `add({data: ...})` both route text/bytes through this trait, so
/// swapping in a real model is a matter of implementing it, not touching the
/// engine.
pub struct HashEmbeddingProvider {
    dimension: usize,
}

impl HashEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        if text.is_empty() {
            return Err(NovaError::EmbeddingFailed(
                novadb_core::ErrorContext::new().with_detail("cannot embed empty text"),
            ));
        }
        Ok(hash_embed(text.as_bytes(), self.dimension))
    }

    async fn embed_bytes(&self, bytes: &[u8]) -> Result<Vec<f32>> {
        if bytes.is_empty() {
            return Err(NovaError::EmbeddingFailed(
                novadb_core::ErrorContext::new().with_detail("cannot embed empty bytes"),
            ));
        }
        Ok(hash_embed(bytes, self.dimension))
    }
}

fn hash_embed(input: &[u8], dimension: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(dimension);
    let mut counter: u32 = 0;
    while out.len() < dimension {
        let mut hasher = blake3::Hasher::new();
        hasher.update(input);
        hasher.update(&counter.to_le_bytes());
        let digest = hasher.finalize();
        for chunk in digest.as_bytes().chunks_exact(4) {
            if out.len() >= dimension {
                break;
            }
            let bits = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            out.push((bits as f64 / u32::MAX as f64) as f32 * 2.0 - 1.0);
        }
        counter += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn embed_text_is_deterministic() {
        let provider = HashEmbeddingProvider::new(8);
        let a = provider.embed_text("hello world").await.unwrap();
        let b = provider.embed_text("hello world").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
    }

    #[tokio::test]
    async fn embed_text_differs_for_different_input() {
        let provider = HashEmbeddingProvider::new(8);
        let a = provider.embed_text("hello").await.unwrap();
        let b = provider.embed_text("goodbye").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn embed_rejects_empty_input() {
        let provider = HashEmbeddingProvider::new(8);
        assert!(provider.embed_text("").await.is_err());
    }
}
