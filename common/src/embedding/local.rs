//! Local embedding adapter backed by FastEmbed models.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use fastembed::{EmbeddingModel, ModelTrait, TextEmbedding, TextInitOptions};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{config::EmbeddingConfig, error::PipelineError};

use super::{pooling::l2_normalize, Embedder};

pub struct FastEmbedder {
    model: Arc<Mutex<TextEmbedding>>,
    model_name: EmbeddingModel,
    dimension: usize,
    batch_size: usize,
    normalize: bool,
}

impl FastEmbedder {
    pub async fn new(config: &EmbeddingConfig) -> Result<Self, PipelineError> {
        let model_name = match EmbeddingModel::from_str(&config.model) {
            Ok(model) => model,
            Err(_) => {
                let fallback = EmbeddingModel::default();
                warn!(
                    requested = config.model.as_str(),
                    fallback = %fallback,
                    "Unknown FastEmbed model; falling back to the default"
                );
                fallback
            }
        };

        info!(model = %model_name, "Initialising FastEmbed embedder");

        let options = TextInitOptions::new(model_name.clone()).with_show_download_progress(true);
        let model_name_for_task = model_name.clone();

        // Model download/initialisation is blocking work.
        let (model, dimension) = tokio::task::spawn_blocking(
            move || -> Result<(TextEmbedding, usize), PipelineError> {
                let model = TextEmbedding::try_new(options).map_err(|err| {
                    PipelineError::ProviderUnavailable(format!(
                        "initialising FastEmbed model: {err}"
                    ))
                })?;
                let info = EmbeddingModel::get_model_info(&model_name_for_task).ok_or_else(|| {
                    PipelineError::ProviderUnavailable(format!(
                        "FastEmbed model metadata missing for {model_name_for_task}"
                    ))
                })?;
                Ok((model, info.dim))
            },
        )
        .await??;

        info!(dimension, "FastEmbed model loaded");

        let batch_size = if config.batch_size < 1 {
            32
        } else {
            usize::try_from(config.batch_size).unwrap_or(32)
        };

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            model_name,
            dimension,
            batch_size,
            normalize: config.normalize,
        })
    }

    pub fn model_code(&self) -> String {
        self.model_name.to_string()
    }
}

#[async_trait]
impl Embedder for FastEmbedder {
    fn backend(&self) -> &'static str {
        "huggingface"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn max_tokens(&self) -> Option<usize> {
        // The underlying model truncates to its own sequence length.
        None
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, PipelineError> {
        let mut guard = self.model.lock().await;
        let embeddings = guard
            .embed(vec![text.to_owned()], None)
            .map_err(|err| PipelineError::ProviderUnavailable(format!("fastembed: {err}")))?;
        let vector = embeddings.into_iter().next().ok_or_else(|| {
            PipelineError::Internal("fastembed returned no embedding for input".to_string())
        })?;
        Ok(if self.normalize {
            l2_normalize(vector)
        } else {
            vector
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut guard = self.model.lock().await;
        let vectors = guard
            .embed(texts.to_vec(), Some(self.batch_size))
            .map_err(|err| PipelineError::ProviderUnavailable(format!("fastembed: {err}")))?;
        Ok(if self.normalize {
            vectors.into_iter().map(l2_normalize).collect()
        } else {
            vectors
        })
    }
}
