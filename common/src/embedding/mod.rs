//! Embedding providers: a remote OpenAI-compatible adapter, a local
//! FastEmbed adapter and a deterministic mock for dry runs.

mod cache;
mod local;
mod mock;
mod openai;
pub mod pooling;
pub mod reduction;

pub use cache::EmbeddingCache;
pub use local::FastEmbedder;
pub use mock::MockEmbedder;
pub use openai::OpenAiEmbedder;

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    config::{EmbeddingConfig, EmbeddingProviderKind},
    error::PipelineError,
};

/// Common surface over every embedding backend. Implementations must be
/// deterministic for identical inputs within a run.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn backend(&self) -> &'static str;

    /// Output dimensionality of raw (un-reduced) vectors.
    fn dimension(&self) -> usize;

    /// Model context limit in tokens, when the backend enforces one.
    fn max_tokens(&self) -> Option<usize>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, PipelineError>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

/// Select the adapter for a run. The dry-run adapter is chosen here, at
/// construction time, and implements the same capability set as the real
/// ones; `mock_dimension` is the dimensionality the rest of the run expects.
pub async fn build_embedder(
    config: &EmbeddingConfig,
    dry_run: bool,
    mock_dimension: usize,
) -> Result<Arc<dyn Embedder>, PipelineError> {
    if dry_run {
        return Ok(Arc::new(MockEmbedder::new(mock_dimension)));
    }

    match config.provider {
        EmbeddingProviderKind::Openai => {
            let cache = EmbeddingCache::with_spill_dir("data/.cache");
            Ok(Arc::new(OpenAiEmbedder::new(config, cache)?))
        }
        EmbeddingProviderKind::Huggingface => {
            Ok(Arc::new(FastEmbedder::new(config).await?))
        }
    }
}
