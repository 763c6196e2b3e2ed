//! Remote OpenAI-compatible embedding adapter.
//!
//! Inputs within the model context embed in one call. Oversize inputs run
//! the token-chunking protocol: the text is windowed by tokens, sub-chunks
//! are embedded in batches, normalised, and pooled back into one vector.

use async_openai::{config::OpenAIConfig, types::CreateEmbeddingRequestArgs, Client};
use async_trait::async_trait;
use tiktoken_rs::CoreBPE;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    RetryIf,
};
use tracing::{debug, info, warn};

use crate::{
    config::{EmbeddingConfig, PoolingStrategy},
    error::PipelineError,
};

use super::{
    cache::EmbeddingCache,
    pooling::{l2_normalize, pool},
    Embedder,
};

const MAX_RETRIES: usize = 5;
const RETRY_BASE_DELAY_MS: u64 = 500;
/// Transport-level deadline per embedding call.
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);

/// Context limit for the supported embedding models.
fn token_limit(model: &str) -> Option<usize> {
    match model {
        "text-embedding-3-small" | "text-embedding-3-large" | "text-embedding-ada-002" => {
            Some(8191)
        }
        _ => None,
    }
}

fn model_dimension(model: &str) -> usize {
    match model {
        "text-embedding-3-large" => 3072,
        _ => 1536,
    }
}

pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    config: EmbeddingConfig,
    max_tokens: usize,
    dimension: usize,
    bpe: CoreBPE,
    cache: EmbeddingCache,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig, cache: EmbeddingCache) -> Result<Self, PipelineError> {
        let max_tokens = token_limit(&config.model).ok_or_else(|| {
            PipelineError::ConfigInvalid(format!(
                "unsupported OpenAI embedding model: {}",
                config.model
            ))
        })?;

        if config.chunk_max_tokens > max_tokens {
            return Err(PipelineError::TokenLimit(format!(
                "chunk_max_tokens ({}) cannot exceed the model limit ({max_tokens})",
                config.chunk_max_tokens
            )));
        }

        if std::env::var("OPENAI_API_KEY").is_err() {
            return Err(PipelineError::ProviderUnavailable(
                "OPENAI_API_KEY is not set".to_string(),
            ));
        }

        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|err| PipelineError::Internal(format!("loading tokenizer: {err}")))?;

        info!(
            model = config.model.as_str(),
            pooling = ?config.pooling_strategy,
            "Initialising OpenAI embedder"
        );

        Ok(Self {
            client: Client::new(),
            config: config.clone(),
            max_tokens,
            dimension: model_dimension(&config.model),
            bpe,
            cache,
        })
    }

    fn count_tokens(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }

    /// Window the token stream with the configured size and overlap.
    fn chunk_by_tokens(&self, text: &str) -> Result<Vec<String>, PipelineError> {
        let tokens = self.bpe.encode_with_special_tokens(text);
        if tokens.len() <= self.config.chunk_max_tokens {
            return Ok(vec![text.to_string()]);
        }

        let mut chunks = Vec::new();
        let mut start = 0usize;
        loop {
            let end = (start + self.config.chunk_max_tokens).min(tokens.len());
            let piece = self
                .bpe
                .decode(tokens[start..end].to_vec())
                .map_err(|err| PipelineError::Internal(format!("decoding tokens: {err}")))?;
            chunks.push(piece);
            if end == tokens.len() {
                break;
            }
            // The window start never regresses, even with a degenerate
            // overlap larger than the window.
            start = end
                .saturating_sub(self.config.overlap_tokens)
                .max(start + 1);
        }
        Ok(chunks)
    }

    /// One API round-trip with bounded exponential backoff and jitter.
    /// Retryable failures that survive every attempt escalate to
    /// `ProviderUnavailable`.
    async fn request_embeddings(
        &self,
        inputs: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, PipelineError> {
        let expected = inputs.len();
        let strategy = ExponentialBackoff::from_millis(RETRY_BASE_DELAY_MS)
            .map(jitter)
            .take(MAX_RETRIES);

        let result = RetryIf::spawn(
            strategy,
            || async {
                let request = CreateEmbeddingRequestArgs::default()
                    .model(self.config.model.clone())
                    .input(inputs.clone())
                    .build()?;
                let response =
                    tokio::time::timeout(REQUEST_TIMEOUT, self.client.embeddings().create(request))
                        .await
                        .map_err(|_| {
                            PipelineError::Timeout("embedding request deadline".to_string())
                        })??;
                let vectors: Vec<Vec<f32>> =
                    response.data.into_iter().map(|data| data.embedding).collect();
                if vectors.len() != expected {
                    return Err(PipelineError::Internal(format!(
                        "embedding response carried {} vectors for {expected} inputs",
                        vectors.len()
                    )));
                }
                Ok(vectors)
            },
            PipelineError::is_retryable,
        )
        .await;

        result.map_err(|err| {
            if err.is_retryable() {
                PipelineError::ProviderUnavailable(format!(
                    "embedding API failed after {MAX_RETRIES} attempts: {err}"
                ))
            } else {
                err
            }
        })
    }

    /// Oversize protocol: token-chunk, embed sub-chunks in batches, pool.
    async fn embed_oversize(&self, text: &str) -> Result<Vec<f32>, PipelineError> {
        let chunks = self.chunk_by_tokens(text)?;
        debug!(sub_chunks = chunks.len(), "Embedding oversize input");

        let batch_size = self.config.effective_batch_size(chunks.len());
        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(batch_size) {
            let mut batch_vectors = self.request_embeddings(batch.to_vec()).await?;
            if self.config.normalize {
                batch_vectors = batch_vectors.into_iter().map(l2_normalize).collect();
            }
            vectors.extend(batch_vectors);
        }

        let weights = if self.config.pooling_strategy == PoolingStrategy::Weighted {
            Some(
                chunks
                    .iter()
                    .map(|chunk| self.count_tokens(chunk) as f32)
                    .collect::<Vec<f32>>(),
            )
        } else {
            None
        };

        let mut pooled = pool(&vectors, self.config.pooling_strategy, weights.as_deref())?;
        if self.config.normalize {
            pooled = l2_normalize(pooled);
        }
        Ok(pooled)
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn backend(&self) -> &'static str {
        "openai"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn max_tokens(&self) -> Option<usize> {
        Some(self.max_tokens)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, PipelineError> {
        if let Some(hit) = self.cache.get(text) {
            return Ok(hit);
        }

        let vector = if self.count_tokens(text) <= self.max_tokens {
            let mut vectors = self.request_embeddings(vec![text.to_string()]).await?;
            let vector = vectors.pop().ok_or_else(|| {
                PipelineError::Internal("no embedding data received".to_string())
            })?;
            if self.config.normalize {
                l2_normalize(vector)
            } else {
                vector
            }
        } else {
            self.embed_oversize(text).await?
        };

        self.cache.insert(text, vector.clone());
        Ok(vector)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        let mut slots: Vec<Option<Vec<f32>>> = vec![None; texts.len()];

        let batch_size = self.config.effective_batch_size(texts.len());
        for (batch_index, batch) in texts.chunks(batch_size).enumerate() {
            let offset = batch_index * batch_size;

            // Anything cached or oversize is handled individually; the rest
            // of the batch goes out in a single call.
            let mut direct: Vec<(usize, String)> = Vec::new();
            for (i, text) in batch.iter().enumerate() {
                let slot = offset + i;
                if let Some(hit) = self.cache.get(text) {
                    slots[slot] = Some(hit);
                } else if self.count_tokens(text) > self.max_tokens {
                    warn!(tokens = self.count_tokens(text), "Chunk exceeds model context; pooling sub-chunks");
                    slots[slot] = Some(self.embed(text).await?);
                } else {
                    direct.push((slot, text.clone()));
                }
            }

            if direct.is_empty() {
                continue;
            }

            let inputs: Vec<String> = direct.iter().map(|(_, text)| text.clone()).collect();
            let vectors = self.request_embeddings(inputs).await?;
            for ((slot, text), vector) in direct.into_iter().zip(vectors) {
                let vector = if self.config.normalize {
                    l2_normalize(vector)
                } else {
                    vector
                };
                self.cache.insert(&text, vector.clone());
                slots[slot] = Some(vector);
            }
        }

        slots
            .into_iter()
            .map(|slot| {
                slot.ok_or_else(|| {
                    PipelineError::Internal("embedding batch left an unfilled slot".to_string())
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EmbeddingProviderKind, PoolingStrategy};

    fn config(model: &str, chunk_max_tokens: usize, overlap_tokens: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: EmbeddingProviderKind::Openai,
            model: model.to_string(),
            batch_size: 64,
            pooling_strategy: PoolingStrategy::Mean,
            dimension_reduction: None,
            use_threading: false,
            normalize: true,
            chunk_max_tokens,
            overlap_tokens,
        }
    }

    fn embedder(chunk_max_tokens: usize, overlap_tokens: usize) -> OpenAiEmbedder {
        std::env::set_var("OPENAI_API_KEY", "test-key");
        OpenAiEmbedder::new(
            &config("text-embedding-3-small", chunk_max_tokens, overlap_tokens),
            EmbeddingCache::in_memory(),
        )
        .unwrap()
    }

    #[test]
    fn unsupported_model_is_rejected_at_construction() {
        std::env::set_var("OPENAI_API_KEY", "test-key");
        let result = OpenAiEmbedder::new(
            &config("not-a-real-model", 2048, 128),
            EmbeddingCache::in_memory(),
        );
        assert!(matches!(result, Err(PipelineError::ConfigInvalid(_))));
    }

    #[test]
    fn chunk_window_above_model_limit_is_a_token_limit_error() {
        std::env::set_var("OPENAI_API_KEY", "test-key");
        let result = OpenAiEmbedder::new(
            &config("text-embedding-3-small", 10_000, 128),
            EmbeddingCache::in_memory(),
        );
        assert!(matches!(result, Err(PipelineError::TokenLimit(_))));
    }

    #[test]
    fn short_text_stays_in_one_token_window() {
        let embedder = embedder(64, 8);
        let chunks = embedder.chunk_by_tokens("a short sentence").unwrap();
        assert_eq!(chunks, vec!["a short sentence".to_string()]);
    }

    #[test]
    fn oversize_text_is_windowed_within_the_token_budget() {
        let embedder = embedder(32, 4);
        let text = "alpha beta gamma delta ".repeat(40);
        let chunks = embedder.chunk_by_tokens(&text).unwrap();

        assert!(chunks.len() > 1);
        // Re-encoding a decoded window can shift a merge at the boundary,
        // so allow a small slack over the window budget.
        for chunk in &chunks {
            assert!(embedder.count_tokens(chunk) <= 36);
        }
        let total: usize = chunks.iter().map(|chunk| embedder.count_tokens(chunk)).sum();
        assert!(total + 8 >= embedder.count_tokens(&text));
    }

    #[test]
    fn dimension_follows_the_model_table() {
        assert_eq!(embedder(2048, 128).dimension(), 1536);
        assert_eq!(model_dimension("text-embedding-3-large"), 3072);
    }
}
