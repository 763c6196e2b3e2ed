//! Vector storage: dense vectors plus a small metadata record per chunk.

mod flat;
mod index;
mod memory;

pub use flat::FlatVectorStore;
pub use memory::MemoryVectorStore;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    config::VectorConfig,
    error::PipelineError,
    types::{Document, DocumentChunk},
};

/// Provenance carried with every vector, enough to render a match without
/// the text store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub id: String,
    pub name: String,
    pub path: String,
}

impl From<&Document> for DocumentInfo {
    fn from(document: &Document) -> Self {
        Self {
            id: document.id.clone(),
            name: document.name.clone(),
            path: document.path.clone(),
        }
    }
}

/// Metadata stored alongside each vector. Chunk adjacency is carried as
/// plain id fields so consumers can scroll without cyclic references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMetadata {
    pub chunk_id: String,
    pub text: String,
    pub document: DocumentInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_chunk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_chunk_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_chunk_id: Option<String>,
}

/// A vector plus metadata, ready for upload.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub metadata: VectorMetadata,
}

impl VectorRecord {
    /// Build an uploadable record from an embedded chunk; fails when the
    /// embedding stage has not run.
    pub fn from_chunk(chunk: &DocumentChunk) -> Result<Self, PipelineError> {
        let vector = chunk.embedding.clone().ok_or_else(|| {
            PipelineError::Store(format!("chunk {} has no embedding", chunk.id))
        })?;
        Ok(Self {
            chunk_id: chunk.id.clone(),
            vector,
            metadata: VectorMetadata {
                chunk_id: chunk.id.clone(),
                text: chunk.text.clone(),
                document: DocumentInfo::from(&chunk.document),
                type_chunk: chunk.type_chunk.clone(),
                prev_chunk_id: None,
                next_chunk_id: None,
            },
        })
    }

    pub fn with_neighbors(
        mut self,
        prev_chunk_id: Option<String>,
        next_chunk_id: Option<String>,
    ) -> Self {
        self.metadata.prev_chunk_id = prev_chunk_id;
        self.metadata.next_chunk_id = next_chunk_id;
        self
    }
}

/// Equality constraints applied over the serialised metadata record.
pub type MetadataFilter = HashMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMatch {
    pub id: String,
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<VectorMetadata>,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    fn provider(&self) -> &'static str;

    /// Durable write, idempotent on chunk id: a repeat upload overwrites.
    async fn upload(&self, record: VectorRecord) -> Result<(), PipelineError>;

    /// Metadata lookup by chunk id; a missing id is `None`, never an error.
    async fn retrieve_from_id(&self, id: &str) -> Result<Option<VectorMetadata>, PipelineError>;

    /// Top-k by cosine similarity, strictly descending, deterministic
    /// tie-break; deleted entries never surface.
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        include_metadata: bool,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<QueryMatch>, PipelineError>;

    async fn delete(&self, ids: &[String]) -> Result<usize, PipelineError>;

    async fn clear(&self) -> Result<(), PipelineError>;

    async fn count(&self) -> Result<usize, PipelineError>;
}

/// Resolve the configured provider. Unknown names fall back to the local
/// flat index with a warning; dry runs always get the in-memory store.
pub async fn build_vector_store(
    config: &VectorConfig,
    dry_run: bool,
) -> Result<Arc<dyn VectorStore>, PipelineError> {
    if dry_run {
        return Ok(Arc::new(MemoryVectorStore::new(config.dimension)));
    }

    match config.provider.as_str() {
        "flat" | "faiss" => Ok(Arc::new(FlatVectorStore::open(config).await?)),
        other => {
            warn!(
                provider = other,
                "Unknown vector storage provider; falling back to the flat local index"
            );
            Ok(Arc::new(FlatVectorStore::open(config).await?))
        }
    }
}
