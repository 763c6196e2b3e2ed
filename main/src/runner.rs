//! Run orchestration: Load → Parse → Embed (→ Reduce) → Store → Evaluate,
//! skipping any stage whose configuration is absent. A stage failure aborts
//! the run with the stage name attached; per-item failures accumulate and
//! finish the run with `partial = true`.

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use common::{
    config::RunConfig,
    embedding::{build_embedder, Embedder},
    error::PipelineError,
    storage::{
        text::{build_text_store, TextStore},
        vector::{build_vector_store, VectorStore},
    },
};
use evaluations::{report::write_config_reports, EvaluationDriver};
use ingestion_pipeline::{DatasetLoader, IngestionPipeline};
use retrieval_pipeline::{RetrievalOptions, RetrievalService};

/// A stage-level fatal failure.
#[derive(Debug)]
pub struct StageError {
    pub stage: &'static str,
    pub source: PipelineError,
}

impl std::fmt::Display for StageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stage `{}` failed: {}", self.stage, self.source)
    }
}

impl std::error::Error for StageError {}

fn at_stage(stage: &'static str) -> impl Fn(PipelineError) -> StageError {
    move |source| StageError { stage, source }
}

/// Outcome of a whole run. `partial` runs still exit 0.
#[derive(Debug, Default)]
pub struct RunOutcome {
    pub documents: usize,
    pub chunks: usize,
    pub tests_run: usize,
    pub errors: Vec<String>,
    pub partial: bool,
}

pub async fn execute(
    config: RunConfig,
    dry_run: bool,
    cancel: CancellationToken,
) -> Result<RunOutcome, StageError> {
    execute_with_output_root(config, dry_run, cancel, Path::new("output")).await
}

async fn execute_with_output_root(
    config: RunConfig,
    dry_run: bool,
    cancel: CancellationToken,
    output_root: &Path,
) -> Result<RunOutcome, StageError> {
    info!(
        run_id = config.run_id.as_str(),
        task = config.task.as_str(),
        dry_run,
        "Starting run"
    );
    let mut outcome = RunOutcome::default();

    // Load
    let documents = match &config.dataset {
        Some(dataset) => DatasetLoader::new(dataset.clone())
            .load()
            .await
            .map_err(at_stage("load"))?,
        None => Vec::new(),
    };
    outcome.documents = documents.len();

    // Adapters, dry-run pair selection happens inside the builders.
    let mock_dimension = mock_dimension(&config);
    let embedder: Option<Arc<dyn Embedder>> = match &config.embedding {
        Some(embedding) => Some(
            build_embedder(embedding, dry_run, mock_dimension)
                .await
                .map_err(at_stage("embed"))?,
        ),
        None => None,
    };
    let vector_store: Option<Arc<dyn VectorStore>> = match config
        .storage
        .as_ref()
        .and_then(|storage| storage.vector.as_ref())
    {
        Some(vector) => Some(
            build_vector_store(vector, dry_run)
                .await
                .map_err(at_stage("store"))?,
        ),
        None => None,
    };
    let text_store: Option<Arc<dyn TextStore>> = match config
        .storage
        .as_ref()
        .and_then(|storage| storage.text_store.as_ref())
    {
        Some(text) => Some(
            build_text_store(text, dry_run)
                .await
                .map_err(at_stage("store"))?,
        ),
        None => None,
    };

    // Parse → Embed → Store
    let pipeline = IngestionPipeline::new(
        config.clone(),
        embedder.clone(),
        vector_store.clone(),
        text_store.clone(),
        dry_run,
        cancel.clone(),
    );

    let chunks = pipeline.parse(&documents).map_err(at_stage("parse"))?;
    let chunks = pipeline.embed(chunks).await.map_err(at_stage("embed"))?;
    outcome.chunks = chunks.len();

    let ingest = pipeline.store(&chunks).await.map_err(at_stage("store"))?;
    info!(
        stored_vectors = ingest.stored_vectors,
        stored_texts = ingest.stored_texts,
        errors = ingest.errors.len(),
        "Storage stage finished"
    );
    outcome.errors.extend(ingest.errors);

    if cancel.is_cancelled() {
        return Err(at_stage("store")(PipelineError::Cancelled));
    }

    // Evaluate
    match &config.eval {
        Some(eval) => {
            let retrieval = match (&embedder, &vector_store) {
                (Some(embedder), Some(vector_store)) => Some(Arc::new(
                    RetrievalService::new(
                        Arc::clone(embedder),
                        Arc::clone(vector_store),
                        text_store.clone(),
                        RetrievalOptions {
                            top_k: eval.top_k,
                            rerank: eval.rerank.clone(),
                            reduction: config
                                .embedding
                                .as_ref()
                                .and_then(|embedding| embedding.dimension_reduction.clone()),
                            vector_dimension: config
                                .storage
                                .as_ref()
                                .and_then(|storage| storage.vector.as_ref())
                                .map(|vector| vector.dimension)
                                .unwrap_or(mock_dimension),
                            dry_run,
                        },
                    )
                    .map_err(at_stage("evaluate"))?,
                )),
                _ => {
                    warn!("Retrieval unavailable: evaluation runs without search-backed tests");
                    None
                }
            };

            let driver = EvaluationDriver::new_with_output_root(
                config.clone(),
                retrieval,
                dry_run,
                output_root,
            )
            .map_err(at_stage("evaluate"))?;
            let summary = driver.run().await.map_err(at_stage("evaluate"))?;
            outcome.tests_run = summary.tests_run;
            outcome.errors.extend(summary.failures);
        }
        None => {
            // Even without an eval section the run echoes its configuration.
            let output_dir = output_root.join(&config.run_id);
            write_config_reports(&config, &output_dir).map_err(at_stage("report"))?;
        }
    }

    outcome.partial = !outcome.errors.is_empty();
    if outcome.partial {
        warn!(
            errors = outcome.errors.len(),
            "Run completed with per-item failures (partial)"
        );
    }
    Ok(outcome)
}

/// Dimensionality for deterministic dry-run embeddings: the reduction
/// target when set, otherwise the configured index dimension.
fn mock_dimension(config: &RunConfig) -> usize {
    config
        .embedding
        .as_ref()
        .and_then(|embedding| embedding.dimension_reduction.as_ref())
        .map(|reduction| reduction.dims)
        .or_else(|| {
            config
                .storage
                .as_ref()
                .and_then(|storage| storage.vector.as_ref())
                .map(|vector| vector.dimension)
        })
        .unwrap_or(768)
}
