//! Cross-encoder reranking over ANN candidates.
//!
//! The real scorer is a pool of FastEmbed cross-encoder engines behind a
//! semaphore; dry runs get a deterministic lexical scorer instead.

use std::{
    fs,
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use fastembed::{RerankInitOptions, TextRerank};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use common::{config::RerankConfig, error::PipelineError};

static NEXT_ENGINE: AtomicUsize = AtomicUsize::new(0);

fn pick_engine_index(pool_len: usize) -> usize {
    let n = NEXT_ENGINE.fetch_add(1, Ordering::Relaxed);
    n % pool_len
}

pub struct RerankerPool {
    engines: Vec<Arc<Mutex<TextRerank>>>,
    semaphore: Arc<Semaphore>,
}

impl RerankerPool {
    /// Build the pool at startup. `pool_size` bounds parallel reranks.
    pub fn new(pool_size: usize, config: &RerankConfig) -> Result<Arc<Self>, PipelineError> {
        if pool_size == 0 {
            return Err(PipelineError::ConfigInvalid(
                "rerank pool size must be greater than zero".to_string(),
            ));
        }

        let mut init_options = RerankInitOptions::default();
        let cache_dir = Path::new("data").join("fastembed").join("reranker");
        fs::create_dir_all(&cache_dir)?;
        init_options.cache_dir = cache_dir;
        init_options.show_download_progress = true;

        if let Some(model) = config.model.as_deref() {
            // Engine selection follows the FastEmbed default; a differing
            // configured model is surfaced, not silently honoured.
            warn!(
                requested = model,
                "Reranker runs the FastEmbed default cross-encoder"
            );
        }

        let mut engines = Vec::with_capacity(pool_size);
        for engine_index in 0..pool_size {
            debug!(engine = engine_index, "Creating reranking engine");
            let model = TextRerank::try_new(init_options.clone())
                .map_err(|err| PipelineError::ProviderUnavailable(err.to_string()))?;
            engines.push(Arc::new(Mutex::new(model)));
        }

        Ok(Arc::new(Self {
            engines,
            semaphore: Arc::new(Semaphore::new(pool_size)),
        }))
    }

    /// Check out capacity and pick an engine; the returned lease performs
    /// the rerank and releases the permit on drop.
    pub async fn checkout(self: &Arc<Self>) -> Result<RerankerLease, PipelineError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PipelineError::Internal("reranker semaphore closed".to_string()))?;

        let idx = pick_engine_index(self.engines.len());
        let engine = Arc::clone(&self.engines[idx]);

        Ok(RerankerLease {
            _permit: permit,
            engine,
        })
    }
}

/// Active lease on a single cross-encoder instance.
pub struct RerankerLease {
    _permit: OwnedSemaphorePermit,
    engine: Arc<Mutex<TextRerank>>,
}

impl RerankerLease {
    /// Score `(query, document)` pairs; returns `(candidate_index, score)`
    /// sorted by descending relevance.
    pub async fn rerank(
        &self,
        query: &str,
        documents: Vec<String>,
    ) -> Result<Vec<(usize, f32)>, PipelineError> {
        let mut guard = self.engine.lock().await;
        let results = guard
            .rerank(query.to_owned(), documents, false, None)
            .map_err(|err| PipelineError::ProviderUnavailable(err.to_string()))?;
        Ok(results
            .into_iter()
            .map(|result| (result.index, result.score))
            .collect())
    }
}

/// Scorer handle used by the retrieval service: the pooled cross-encoder or
/// the dry-run lexical stand-in.
pub enum Reranker {
    Pool(Arc<RerankerPool>),
    Lexical,
}

impl Reranker {
    pub async fn score(
        &self,
        query: &str,
        documents: Vec<String>,
    ) -> Result<Vec<(usize, f32)>, PipelineError> {
        match self {
            Self::Pool(pool) => {
                let lease = pool.checkout().await?;
                lease.rerank(query, documents).await
            }
            Self::Lexical => Ok(lexical_scores(query, &documents)),
        }
    }
}

/// Deterministic token-overlap scorer (Jaccard), used in dry runs.
fn lexical_scores(query: &str, documents: &[String]) -> Vec<(usize, f32)> {
    let query_tokens = token_set(query);
    let mut scored: Vec<(usize, f32)> = documents
        .iter()
        .enumerate()
        .map(|(index, document)| {
            let doc_tokens = token_set(document);
            let intersection = query_tokens.intersection(&doc_tokens).count() as f32;
            let union = query_tokens.union(&doc_tokens).count() as f32;
            let score = if union > 0.0 { intersection / union } else { 0.0 };
            (index, score)
        })
        .collect();
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    scored
}

fn token_set(text: &str) -> std::collections::HashSet<String> {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lexical_scorer_prefers_overlapping_candidates() {
        let reranker = Reranker::Lexical;
        let scores = reranker
            .score(
                "total revenue for fiscal 2024",
                vec![
                    "weather was mild".to_string(),
                    "total revenue rose in fiscal 2024".to_string(),
                ],
            )
            .await
            .unwrap();

        assert_eq!(scores[0].0, 1);
        assert!(scores[0].1 > scores[1].1);
    }

    #[tokio::test]
    async fn lexical_scorer_is_deterministic() {
        let reranker = Reranker::Lexical;
        let documents = vec!["a b c".to_string(), "a b".to_string(), "z".to_string()];
        let first = reranker.score("a b", documents.clone()).await.unwrap();
        let second = reranker.score("a b", documents).await.unwrap();
        assert_eq!(first, second);
    }
}
