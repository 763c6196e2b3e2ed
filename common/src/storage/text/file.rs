//! Filesystem text store: one JSON file per chunk under a base directory.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::PipelineError;

use super::{StoredDocument, TextStore};

pub struct FileTextStore {
    base_path: PathBuf,
}

impl FileTextStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    fn record_path(&self, id: &str) -> PathBuf {
        // Chunk ids are uuids/hashes, but sanitise anyway so a hostile id
        // cannot escape the base directory.
        let safe: String = id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.base_path.join(format!("{safe}.json"))
    }
}

#[async_trait]
impl TextStore for FileTextStore {
    fn client(&self) -> &'static str {
        "file"
    }

    async fn store_document(&self, mut record: StoredDocument) -> Result<(), PipelineError> {
        if record.created_at.is_none() {
            record.created_at = Some(Utc::now().to_rfc3339());
        }
        let path = self.record_path(&record.id);
        tokio::fs::write(&path, serde_json::to_vec(&record)?).await?;
        Ok(())
    }

    async fn retrieve_document(&self, id: &str) -> Result<Option<StoredDocument>, PipelineError> {
        let path = self.record_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let raw = tokio::fs::read_to_string(&path).await?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    async fn retrieve_documents(
        &self,
        ids: &[String],
    ) -> Result<Vec<StoredDocument>, PipelineError> {
        let mut documents = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(document) = self.retrieve_document(id).await? {
                documents.push(document);
            }
        }
        Ok(documents)
    }

    async fn delete_document(&self, id: &str) -> Result<bool, PipelineError> {
        let path = self.record_path(id);
        if !path.exists() {
            return Ok(false);
        }
        tokio::fs::remove_file(&path).await?;
        Ok(true)
    }

    async fn get_document_count(&self) -> Result<usize, PipelineError> {
        let mut entries = tokio::fs::read_dir(&self.base_path).await?;
        let mut count = 0;
        while let Some(entry) = entries.next_entry().await? {
            if entry.path().extension().is_some_and(|ext| ext == "json") {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn clear_all(&self) -> Result<(), PipelineError> {
        let mut entries = tokio::fs::read_dir(&self.base_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.path().extension().is_some_and(|ext| ext == "json") {
                tokio::fs::remove_file(entry.path()).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTextStore::new(dir.path()).unwrap();

        let record = StoredDocument {
            id: "chunk-1".to_string(),
            text: "hello".to_string(),
            document_data: None,
            embedding: None,
            created_at: None,
        };
        store.store_document(record).await.unwrap();

        let stored = store.retrieve_document("chunk-1").await.unwrap().unwrap();
        assert_eq!(stored.text, "hello");
        assert!(stored.created_at.is_some());
        assert_eq!(store.get_document_count().await.unwrap(), 1);

        store.clear_all().await.unwrap();
        assert_eq!(store.get_document_count().await.unwrap(), 0);
    }
}
