//! Text storage: full chunk text and document provenance, keyed by chunk id.

mod file;
mod memory;
mod postgres;
mod s3;
mod sqlite;

pub use file::FileTextStore;
pub use memory::MemoryTextStore;
pub use postgres::PostgresTextStore;
pub use s3::S3TextStore;
pub use sqlite::SqliteTextStore;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    config::{TextStoreClient, TextStoreConfig},
    error::PipelineError,
    types::DocumentChunk,
};

/// One stored record: the chunk text plus serialised provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl StoredDocument {
    /// Flatten a chunk into its stored form.
    pub fn from_chunk(chunk: &DocumentChunk) -> Result<Self, PipelineError> {
        Ok(Self {
            id: chunk.id.clone(),
            text: chunk.text.clone(),
            document_data: Some(serde_json::to_value(&chunk.document)?),
            embedding: chunk.embedding.clone(),
            created_at: None,
        })
    }
}

/// Key-value persistence of chunk text. All operations are upsert-by-id and
/// atomic at the single-record level.
#[async_trait]
pub trait TextStore: Send + Sync {
    fn client(&self) -> &'static str;

    async fn store_document(&self, record: StoredDocument) -> Result<(), PipelineError>;

    async fn store_document_chunk(&self, chunk: &DocumentChunk) -> Result<(), PipelineError> {
        self.store_document(StoredDocument::from_chunk(chunk)?).await
    }

    async fn retrieve_document(&self, id: &str) -> Result<Option<StoredDocument>, PipelineError>;

    async fn retrieve_documents(
        &self,
        ids: &[String],
    ) -> Result<Vec<StoredDocument>, PipelineError>;

    async fn delete_document(&self, id: &str) -> Result<bool, PipelineError>;

    async fn get_document_count(&self) -> Result<usize, PipelineError>;

    async fn clear_all(&self) -> Result<(), PipelineError>;
}

/// Resolve the configured client; dry runs always get the in-memory store.
pub async fn build_text_store(
    config: &TextStoreConfig,
    dry_run: bool,
) -> Result<Arc<dyn TextStore>, PipelineError> {
    if dry_run {
        return Ok(Arc::new(MemoryTextStore::new()));
    }

    match config.client {
        TextStoreClient::Sqlite => Ok(Arc::new(SqliteTextStore::connect(&config.path).await?)),
        TextStoreClient::Postgres => Ok(Arc::new(PostgresTextStore::connect(config).await?)),
        TextStoreClient::File => Ok(Arc::new(FileTextStore::new(&config.base_path)?)),
        TextStoreClient::S3 => Ok(Arc::new(S3TextStore::connect(config)?)),
    }
}
