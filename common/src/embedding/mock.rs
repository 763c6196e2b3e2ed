//! Deterministic embedding adapter for dry runs: no network, seeded output.

use async_trait::async_trait;
use rand::{rngs::StdRng, Rng, SeedableRng};
use sha2::{Digest, Sha256};

use crate::error::PipelineError;

use super::{pooling::l2_normalize, Embedder};

pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    /// Seed the generator from the input text so identical inputs always map
    /// to identical vectors, across processes.
    fn seed_for(text: &str) -> u64 {
        let digest = Sha256::digest(text.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        u64::from_le_bytes(bytes)
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(Self::seed_for(text));
        let vector: Vec<f32> = (0..self.dimension)
            .map(|_| rng.gen_range(-1.0f32..1.0f32))
            .collect();
        l2_normalize(vector)
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    fn backend(&self) -> &'static str {
        "mock"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn max_tokens(&self) -> Option<usize> {
        None
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, PipelineError> {
        Ok(self.vector_for(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        Ok(texts.iter().map(|text| self.vector_for(text)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn identical_inputs_produce_identical_vectors() {
        let embedder = MockEmbedder::new(16);
        let a = embedder.embed("same text").await.unwrap();
        let b = embedder.embed("same text").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);

        let other = embedder.embed("different text").await.unwrap();
        assert_ne!(a, other);
    }

    #[tokio::test]
    async fn vectors_are_unit_length() {
        let embedder = MockEmbedder::new(64);
        let vector = embedder.embed("normalise me").await.unwrap();
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }
}
