//! Staged ingest run: split → embed (→ reduce) → store.
//!
//! Stages execute sequentially; parallelism lives inside the embed stage.
//! Per-chunk storage failures never abort the run, they are collected and
//! the run completes with `partial = true`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use common::{
    config::RunConfig,
    embedding::{reduction::build_reducer, Embedder},
    error::PipelineError,
    storage::{
        text::TextStore,
        vector::{VectorRecord, VectorStore},
    },
    types::{Document, DocumentChunk},
};

use crate::splitter::TextSplitter;

/// Outcome of an ingest run. `partial` is set when any per-chunk error was
/// recorded; the run still counts as completed.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub documents: usize,
    pub chunks: usize,
    pub stored_vectors: usize,
    pub stored_texts: usize,
    pub errors: Vec<String>,
    pub partial: bool,
}

pub struct IngestionPipeline {
    config: RunConfig,
    embedder: Option<Arc<dyn Embedder>>,
    vector_store: Option<Arc<dyn VectorStore>>,
    text_store: Option<Arc<dyn TextStore>>,
    dry_run: bool,
    cancel: CancellationToken,
}

impl IngestionPipeline {
    pub fn new(
        config: RunConfig,
        embedder: Option<Arc<dyn Embedder>>,
        vector_store: Option<Arc<dyn VectorStore>>,
        text_store: Option<Arc<dyn TextStore>>,
        dry_run: bool,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            embedder,
            vector_store,
            text_store,
            dry_run,
            cancel,
        }
    }

    pub async fn run(&self, documents: Vec<Document>) -> Result<IngestReport, PipelineError> {
        self.ensure_not_cancelled()?;
        let pipeline_started = Instant::now();

        let stage_start = Instant::now();
        let mut chunks = self.parse(&documents)?;
        let parse_duration = stage_start.elapsed();

        self.ensure_not_cancelled()?;
        let stage_start = Instant::now();
        if !chunks.is_empty() {
            chunks = self.embed(chunks).await?;
        }
        let embed_duration = stage_start.elapsed();

        self.ensure_not_cancelled()?;
        let stage_start = Instant::now();
        let mut report = self.store(&chunks).await?;
        let store_duration = stage_start.elapsed();

        report.documents = documents.len();
        report.chunks = chunks.len();
        report.partial = !report.errors.is_empty();

        info!(
            documents = report.documents,
            chunks = report.chunks,
            stored_vectors = report.stored_vectors,
            stored_texts = report.stored_texts,
            errors = report.errors.len(),
            total_ms = duration_millis(pipeline_started.elapsed()),
            parse_ms = duration_millis(parse_duration),
            embed_ms = duration_millis(embed_duration),
            store_ms = duration_millis(store_duration),
            "Ingest pipeline finished"
        );

        Ok(report)
    }

    fn ensure_not_cancelled(&self) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }

    /// Split stage. Without a parser section every document passes through
    /// as a single chunk.
    pub fn parse(&self, documents: &[Document]) -> Result<Vec<DocumentChunk>, PipelineError> {
        match &self.config.parser {
            Some(parser) => {
                let splitter = TextSplitter::new(parser.clone())?;
                Ok(splitter.split_documents(documents))
            }
            None => Ok(documents
                .iter()
                .map(|document| {
                    let mut chunk =
                        DocumentChunk::new(document.text.clone(), document.clone());
                    chunk.assign_stable_id(0);
                    chunk
                })
                .collect()),
        }
    }

    /// Embed stage: fan out raw embedding work, re-join preserving input
    /// order, then reduce globally over the full run's raw vectors.
    pub async fn embed(
        &self,
        chunks: Vec<DocumentChunk>,
    ) -> Result<Vec<DocumentChunk>, PipelineError> {
        // An empty run embeds nothing and must not fit a reducer.
        if chunks.is_empty() {
            return Ok(chunks);
        }
        let (Some(embedder), Some(embedding_config)) =
            (self.embedder.as_ref(), self.config.embedding.as_ref())
        else {
            return Ok(chunks);
        };

        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();

        let raw = tokio::select! {
            () = self.cancel.cancelled() => return Err(PipelineError::Cancelled),
            result = self.embed_raw(embedder, embedding_config.use_threading, texts) => result?,
        };

        if raw.len() != chunks.len() {
            return Err(PipelineError::Internal(format!(
                "embedding stage produced {} vectors for {} chunks",
                raw.len(),
                chunks.len()
            )));
        }

        // Mock vectors already carry the target dimension, so dry runs skip
        // reduction (and its artifact writes) entirely.
        let vectors = match embedding_config.dimension_reduction.as_ref() {
            Some(reduction) if !self.dry_run => {
                let mut reducer = build_reducer(reduction)?;
                if reducer.artifact_path().exists() {
                    reducer.load(None)?;
                    info!(
                        target_dim = reducer.target_dim(),
                        "Reducer artifact loaded; transforming without re-fitting"
                    );
                    reducer.transform(&raw)?
                } else {
                    let reduced = reducer.fit_transform(&raw)?;
                    reducer.save(None)?;
                    reduced
                }
            }
            _ => raw,
        };

        Ok(chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| chunk.with_embedding(vector))
            .collect())
    }

    /// Raw embedding fan-out. Shards are embedded concurrently and their
    /// results concatenated in shard order, which equals input order; the
    /// reducer and the stores depend on that.
    async fn embed_raw(
        &self,
        embedder: &Arc<dyn Embedder>,
        use_threading: bool,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, PipelineError> {
        let max_workers = self.config.max_workers();
        if !use_threading || texts.len() <= 1 || max_workers <= 1 {
            return embedder.embed_batch(&texts).await;
        }

        let shard_size = texts.len().div_ceil(max_workers);
        info!(
            chunks = texts.len(),
            shards = texts.len().div_ceil(shard_size),
            max_workers,
            "Embedding chunks concurrently"
        );

        let handles: Vec<_> = texts
            .chunks(shard_size)
            .map(|shard| {
                let embedder = Arc::clone(embedder);
                let shard = shard.to_vec();
                tokio::spawn(async move { embedder.embed_batch(&shard).await })
            })
            .collect();

        let mut vectors = Vec::with_capacity(texts.len());
        for handle in handles {
            vectors.extend(handle.await??);
        }
        Ok(vectors)
    }

    /// Store stage: writes go out sequentially per chunk, vector before
    /// text, so a mid-pair failure is observable. Ends with a consistency
    /// sweep over both stores.
    pub async fn store(&self, chunks: &[DocumentChunk]) -> Result<IngestReport, PipelineError> {
        let mut report = IngestReport::default();

        let Some(storage) = self.config.storage.as_ref() else {
            return Ok(report);
        };

        let vector_active = storage
            .vector
            .as_ref()
            .filter(|config| config.upload)
            .and_then(|_| self.vector_store.clone());
        let text_active = storage
            .text_store
            .as_ref()
            .filter(|config| config.upload)
            .and_then(|_| self.text_store.clone());

        // Wipe exactly once, before the first upload of the run.
        if let (Some(vector_config), Some(vector_store)) =
            (storage.vector.as_ref(), self.vector_store.as_ref())
        {
            if vector_config.clear {
                vector_store.clear().await?;
                info!("Cleared vector index before ingest");
            }
        }

        if vector_active.is_none() && text_active.is_none() {
            return Ok(report);
        }

        for (index, chunk) in chunks.iter().enumerate() {
            self.ensure_not_cancelled()?;

            if let Some(vector_store) = &vector_active {
                let prev = index.checked_sub(1).map(|i| chunks[i].id.clone());
                let next = chunks.get(index + 1).map(|chunk| chunk.id.clone());
                match VectorRecord::from_chunk(chunk) {
                    Ok(record) => {
                        match vector_store.upload(record.with_neighbors(prev, next)).await {
                            Ok(()) => report.stored_vectors += 1,
                            Err(err) => {
                                warn!(chunk_id = chunk.id.as_str(), error = %err, "Vector upload failed");
                                report
                                    .errors
                                    .push(format!("StoreError: vector upload {}: {err}", chunk.id));
                            }
                        }
                    }
                    Err(err) => {
                        warn!(chunk_id = chunk.id.as_str(), error = %err, "Chunk not uploadable");
                        report
                            .errors
                            .push(format!("StoreError: vector upload {}: {err}", chunk.id));
                    }
                }
            }

            if let Some(text_store) = &text_active {
                match text_store.store_document_chunk(chunk).await {
                    Ok(()) => report.stored_texts += 1,
                    Err(err) => {
                        warn!(chunk_id = chunk.id.as_str(), error = %err, "Text store write failed");
                        report
                            .errors
                            .push(format!("StoreError: text store {}: {err}", chunk.id));
                    }
                }
            }
        }

        if let (Some(vector_store), Some(text_store)) = (&vector_active, &text_active) {
            self.reconcile(chunks, vector_store, text_store, &mut report.errors)
                .await;
        }

        Ok(report)
    }

    /// End-of-ingest sweep: every stored id must be present in both stores.
    async fn reconcile(
        &self,
        chunks: &[DocumentChunk],
        vector_store: &Arc<dyn VectorStore>,
        text_store: &Arc<dyn TextStore>,
        errors: &mut Vec<String>,
    ) {
        for chunk in chunks {
            let in_vector = matches!(vector_store.retrieve_from_id(&chunk.id).await, Ok(Some(_)));
            let in_text = matches!(text_store.retrieve_document(&chunk.id).await, Ok(Some(_)));
            if in_vector != in_text {
                warn!(
                    chunk_id = chunk.id.as_str(),
                    in_vector, in_text, "InconsistencyDetected: chunk present in one store only"
                );
                errors.push(format!(
                    "InconsistencyDetected: chunk {} present in {} only",
                    chunk.id,
                    if in_vector { "vector store" } else { "text store" }
                ));
            }
        }
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests;
