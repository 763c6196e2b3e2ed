//! In-memory text store for dry runs and tests.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::PipelineError;

use super::{StoredDocument, TextStore};

#[derive(Default)]
pub struct MemoryTextStore {
    entries: RwLock<HashMap<String, StoredDocument>>,
}

impl MemoryTextStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_poisoned() -> PipelineError {
        PipelineError::Internal("memory text store lock poisoned".to_string())
    }
}

#[async_trait]
impl TextStore for MemoryTextStore {
    fn client(&self) -> &'static str {
        "memory"
    }

    async fn store_document(&self, mut record: StoredDocument) -> Result<(), PipelineError> {
        if record.created_at.is_none() {
            record.created_at = Some(Utc::now().to_rfc3339());
        }
        self.entries
            .write()
            .map_err(|_| Self::lock_poisoned())?
            .insert(record.id.clone(), record);
        Ok(())
    }

    async fn retrieve_document(&self, id: &str) -> Result<Option<StoredDocument>, PipelineError> {
        Ok(self
            .entries
            .read()
            .map_err(|_| Self::lock_poisoned())?
            .get(id)
            .cloned())
    }

    async fn retrieve_documents(
        &self,
        ids: &[String],
    ) -> Result<Vec<StoredDocument>, PipelineError> {
        let entries = self.entries.read().map_err(|_| Self::lock_poisoned())?;
        Ok(ids.iter().filter_map(|id| entries.get(id).cloned()).collect())
    }

    async fn delete_document(&self, id: &str) -> Result<bool, PipelineError> {
        Ok(self
            .entries
            .write()
            .map_err(|_| Self::lock_poisoned())?
            .remove(id)
            .is_some())
    }

    async fn get_document_count(&self) -> Result<usize, PipelineError> {
        Ok(self.entries.read().map_err(|_| Self::lock_poisoned())?.len())
    }

    async fn clear_all(&self) -> Result<(), PipelineError> {
        self.entries
            .write()
            .map_err(|_| Self::lock_poisoned())?
            .clear();
        Ok(())
    }
}
