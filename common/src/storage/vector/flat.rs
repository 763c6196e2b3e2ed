//! Flat on-disk vector index: an exact cosine index persisted as an index
//! file plus a sibling `.metadata` file holding the ordered per-vector
//! records.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{config::VectorConfig, error::PipelineError};

use super::{
    index::{IndexCore, IndexEntry},
    MetadataFilter, QueryMatch, VectorMetadata, VectorRecord, VectorStore,
};

#[derive(Serialize, Deserialize)]
struct PersistedIndex {
    dimension: usize,
    vectors: Vec<Vec<f32>>,
}

#[derive(Serialize, Deserialize)]
struct PersistedMetadata {
    metadata: VectorMetadata,
    deleted: bool,
}

pub struct FlatVectorStore {
    index_path: PathBuf,
    metadata_path: PathBuf,
    core: Mutex<IndexCore>,
}

impl FlatVectorStore {
    /// Load the index at the configured path, or create a fresh one.
    pub async fn open(config: &VectorConfig) -> Result<Self, PipelineError> {
        let index_path = PathBuf::from(config.index_path());
        let metadata_path = index_path.with_extension("metadata");
        if let Some(parent) = index_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let core = if index_path.exists() && metadata_path.exists() {
            match Self::load(&index_path, &metadata_path).await {
                Ok(core) => {
                    info!(
                        path = %index_path.display(),
                        vectors = core.entries.len(),
                        "Loaded existing vector index"
                    );
                    core
                }
                Err(err) => {
                    warn!(error = %err, "Failed to load existing index; creating a new one");
                    IndexCore::new(config.dimension)
                }
            }
        } else {
            info!(
                path = %index_path.display(),
                dimension = config.dimension,
                "Creating new vector index"
            );
            IndexCore::new(config.dimension)
        };

        let store = Self {
            index_path,
            metadata_path,
            core: Mutex::new(core),
        };
        store.save(&*store.core.lock().await).await?;
        Ok(store)
    }

    async fn load(
        index_path: &PathBuf,
        metadata_path: &PathBuf,
    ) -> Result<IndexCore, PipelineError> {
        let raw_index = tokio::fs::read_to_string(index_path).await?;
        let persisted: PersistedIndex = serde_json::from_str(&raw_index)?;

        let raw_metadata = tokio::fs::read_to_string(metadata_path).await?;
        let records: Vec<PersistedMetadata> = serde_json::from_str(&raw_metadata)?;

        if persisted.vectors.len() != records.len() {
            return Err(PipelineError::Store(format!(
                "index holds {} vectors but metadata lists {} records",
                persisted.vectors.len(),
                records.len()
            )));
        }

        let mut core = IndexCore::new(persisted.dimension);
        core.entries = persisted
            .vectors
            .into_iter()
            .zip(records)
            .map(|(vector, record)| IndexEntry {
                vector,
                metadata: record.metadata,
                deleted: record.deleted,
            })
            .collect();
        core.rebuild_lookup();
        Ok(core)
    }

    async fn save(&self, core: &IndexCore) -> Result<(), PipelineError> {
        let persisted = PersistedIndex {
            dimension: core.dimension,
            vectors: core.entries.iter().map(|entry| entry.vector.clone()).collect(),
        };
        let records: Vec<PersistedMetadata> = core
            .entries
            .iter()
            .map(|entry| PersistedMetadata {
                metadata: entry.metadata.clone(),
                deleted: entry.deleted,
            })
            .collect();

        tokio::fs::write(&self.index_path, serde_json::to_vec(&persisted)?).await?;
        tokio::fs::write(&self.metadata_path, serde_json::to_vec(&records)?).await?;
        Ok(())
    }
}

#[async_trait]
impl VectorStore for FlatVectorStore {
    fn provider(&self) -> &'static str {
        "flat"
    }

    async fn upload(&self, record: VectorRecord) -> Result<(), PipelineError> {
        let mut core = self.core.lock().await;
        core.upsert(record);
        self.save(&core).await
    }

    async fn retrieve_from_id(&self, id: &str) -> Result<Option<VectorMetadata>, PipelineError> {
        let core = self.core.lock().await;
        Ok(core.get(id).map(|entry| entry.metadata.clone()))
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        include_metadata: bool,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<QueryMatch>, PipelineError> {
        let core = self.core.lock().await;
        Ok(core.query(vector, top_k, include_metadata, filter))
    }

    async fn delete(&self, ids: &[String]) -> Result<usize, PipelineError> {
        let mut core = self.core.lock().await;
        let deleted = core.delete(ids);
        self.save(&core).await?;
        info!(deleted, "Marked vectors as deleted");
        Ok(deleted)
    }

    async fn clear(&self) -> Result<(), PipelineError> {
        let mut core = self.core.lock().await;
        core.clear();
        self.save(&core).await?;
        info!("Cleared vector index");
        Ok(())
    }

    async fn count(&self) -> Result<usize, PipelineError> {
        let core = self.core.lock().await;
        Ok(core.live_count())
    }
}
