//! In-memory vector store with the same semantics as the flat index;
//! backs dry runs and tests, persists nothing.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::PipelineError;

use super::{index::IndexCore, MetadataFilter, QueryMatch, VectorMetadata, VectorRecord, VectorStore};

pub struct MemoryVectorStore {
    core: Mutex<IndexCore>,
}

impl MemoryVectorStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            core: Mutex::new(IndexCore::new(dimension)),
        }
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    fn provider(&self) -> &'static str {
        "memory"
    }

    async fn upload(&self, record: VectorRecord) -> Result<(), PipelineError> {
        self.core.lock().await.upsert(record);
        Ok(())
    }

    async fn retrieve_from_id(&self, id: &str) -> Result<Option<VectorMetadata>, PipelineError> {
        Ok(self.core.lock().await.get(id).map(|entry| entry.metadata.clone()))
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        include_metadata: bool,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<QueryMatch>, PipelineError> {
        Ok(self
            .core
            .lock()
            .await
            .query(vector, top_k, include_metadata, filter))
    }

    async fn delete(&self, ids: &[String]) -> Result<usize, PipelineError> {
        Ok(self.core.lock().await.delete(ids))
    }

    async fn clear(&self) -> Result<(), PipelineError> {
        self.core.lock().await.clear();
        Ok(())
    }

    async fn count(&self) -> Result<usize, PipelineError> {
        Ok(self.core.lock().await.live_count())
    }
}
