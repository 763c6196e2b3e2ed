//! Embedding provider configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    Huggingface,
    Openai,
}

/// Pooling applied when an oversize input is token-chunked and the sub-chunk
/// vectors must be merged back into one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolingStrategy {
    Mean,
    Max,
    Weighted,
    SmoothDecay,
}

impl Default for PoolingStrategy {
    fn default() -> Self {
        Self::Mean
    }
}

/// Optional projection of raw embeddings to a lower dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionReduction {
    /// Reduction kind; only `pca` is implemented, the rest are reserved.
    #[serde(rename = "type")]
    pub kind: String,
    pub dims: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Artifact location; defaults to `data/artifacts/pca_<dims>.json`.
    #[serde(default)]
    pub path: Option<String>,
}

fn default_seed() -> u64 {
    42
}

impl DimensionReduction {
    pub fn artifact_path(&self) -> String {
        self.path.clone().unwrap_or_else(|| {
            format!("data/artifacts/{}_{}.json", self.kind.to_lowercase(), self.dims)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProviderKind,
    pub model: String,
    /// Chunks embedded per request/shard; -1 means one unbounded batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
    #[serde(default)]
    pub pooling_strategy: PoolingStrategy,
    #[serde(default)]
    pub dimension_reduction: Option<DimensionReduction>,
    #[serde(default = "default_true")]
    pub use_threading: bool,
    /// L2-normalise output vectors.
    #[serde(default = "default_true")]
    pub normalize: bool,
    /// Token window used when an input exceeds the model context.
    #[serde(default = "default_chunk_max_tokens")]
    pub chunk_max_tokens: usize,
    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,
}

fn default_batch_size() -> i64 {
    128
}

fn default_true() -> bool {
    true
}

fn default_chunk_max_tokens() -> usize {
    2048
}

fn default_overlap_tokens() -> usize {
    128
}

impl EmbeddingConfig {
    /// Resolve the configured batch size against an actual item count.
    pub fn effective_batch_size(&self, total: usize) -> usize {
        if self.batch_size < 1 {
            total.max(1)
        } else {
            usize::try_from(self.batch_size).unwrap_or(total.max(1))
        }
    }
}
