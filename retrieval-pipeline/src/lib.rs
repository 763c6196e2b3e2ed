//! Retrieval surface: embed the query, search the vector index, hydrate
//! chunk text from the text store and optionally rerank with a
//! cross-encoder.

pub mod reranking;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use common::{
    config::{DimensionReduction, RerankConfig},
    embedding::{reduction::{build_reducer, PcaReducer}, Embedder},
    error::PipelineError,
    storage::{
        text::TextStore,
        vector::{MetadataFilter, VectorMetadata, VectorStore},
    },
};

use reranking::{Reranker, RerankerPool};

const DEFAULT_RERANK_POOL_SIZE: usize = 2;

/// A hydrated retrieval match. `score` is the ANN similarity; a rerank
/// score is attached separately when a reranker ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedMatch {
    pub id: String,
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<VectorMetadata>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResponse {
    pub matches: Vec<RetrievedMatch>,
}

/// Knobs for building a [`RetrievalService`].
pub struct RetrievalOptions {
    pub top_k: usize,
    pub rerank: Option<RerankConfig>,
    pub reduction: Option<DimensionReduction>,
    /// Dimensionality of vectors stored in the index; checked against the
    /// reducer artifact at construction.
    pub vector_dimension: usize,
    pub dry_run: bool,
}

pub struct RetrievalService {
    embedder: Arc<dyn Embedder>,
    vector_store: Arc<dyn VectorStore>,
    text_store: Option<Arc<dyn TextStore>>,
    reducer: Option<PcaReducer>,
    reranker: Option<(Reranker, Option<usize>)>,
    top_k: usize,
}

impl RetrievalService {
    /// Build the service, loading the reducer artifact when reduction is
    /// configured and verifying it matches the stored vector dimension.
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vector_store: Arc<dyn VectorStore>,
        text_store: Option<Arc<dyn TextStore>>,
        options: RetrievalOptions,
    ) -> Result<Self, PipelineError> {
        // Dry runs embed directly at the target dimension; no artifact.
        let reducer = match options.reduction.as_ref().filter(|_| !options.dry_run) {
            Some(reduction) => {
                let mut reducer = build_reducer(reduction)?;
                reducer.load(None)?;
                if reducer.target_dim() != options.vector_dimension {
                    return Err(PipelineError::ReducerMismatch(format!(
                        "reducer targets {} dimensions but the vector store holds {}",
                        reducer.target_dim(),
                        options.vector_dimension
                    )));
                }
                info!(
                    target_dim = reducer.target_dim(),
                    "Query-time reducer loaded"
                );
                Some(reducer)
            }
            None => None,
        };

        let reranker = match options.rerank.as_ref() {
            Some(config) if options.dry_run => Some((Reranker::Lexical, config.top_k)),
            Some(config) => {
                let pool = RerankerPool::new(DEFAULT_RERANK_POOL_SIZE, config)?;
                Some((Reranker::Pool(pool), config.top_k))
            }
            None => None,
        };

        Ok(Self {
            embedder,
            vector_store,
            text_store,
            reducer,
            reranker,
            top_k: options.top_k,
        })
    }

    /// Embed → (reduce) → ANN → hydrate → (rerank).
    pub async fn search(
        &self,
        query: &str,
        filter: Option<&MetadataFilter>,
    ) -> Result<RetrievalResponse, PipelineError> {
        let raw = self.embedder.embed(query).await?;
        let vector = match &self.reducer {
            Some(reducer) => reducer.transform_one(&raw)?,
            None => raw,
        };

        let candidates = self
            .vector_store
            .query(&vector, self.top_k, true, filter)
            .await?;

        let mut matches = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let mut metadata = candidate.metadata;
            if let (Some(metadata), Some(text_store)) = (metadata.as_mut(), &self.text_store) {
                metadata.text = match text_store.retrieve_document(&candidate.id).await {
                    Ok(Some(stored)) => stored.text,
                    Ok(None) => {
                        warn!(
                            chunk_id = candidate.id.as_str(),
                            "Hydration miss: chunk missing from the text store"
                        );
                        String::new()
                    }
                    Err(err) => {
                        warn!(
                            chunk_id = candidate.id.as_str(),
                            error = %err,
                            "Hydration failed; continuing with empty text"
                        );
                        String::new()
                    }
                };
            }
            matches.push(RetrievedMatch {
                id: candidate.id,
                score: candidate.score,
                rerank_score: None,
                metadata,
            });
        }

        if let Some((reranker, rerank_top_k)) = &self.reranker {
            matches = self
                .rerank(reranker, *rerank_top_k, query, matches)
                .await?;
        }

        Ok(RetrievalResponse { matches })
    }

    async fn rerank(
        &self,
        reranker: &Reranker,
        rerank_top_k: Option<usize>,
        query: &str,
        matches: Vec<RetrievedMatch>,
    ) -> Result<Vec<RetrievedMatch>, PipelineError> {
        if matches.is_empty() {
            return Ok(matches);
        }

        let documents: Vec<String> = matches
            .iter()
            .map(|candidate| {
                candidate
                    .metadata
                    .as_ref()
                    .map(|metadata| metadata.text.clone())
                    .unwrap_or_default()
            })
            .collect();

        let scored = reranker.score(query, documents).await?;

        let mut reordered = Vec::with_capacity(scored.len());
        let mut matches: Vec<Option<RetrievedMatch>> = matches.into_iter().map(Some).collect();
        for (index, score) in scored {
            if let Some(mut candidate) = matches.get_mut(index).and_then(Option::take) {
                candidate.rerank_score = Some(score);
                reordered.push(candidate);
            }
        }
        if let Some(keep) = rerank_top_k {
            reordered.truncate(keep);
        }
        Ok(reordered)
    }
}
