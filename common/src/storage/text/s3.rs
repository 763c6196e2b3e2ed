//! S3 text store: one JSON object per chunk under a key prefix. AWS
//! credentials come from the standard environment variables.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::TryStreamExt;
use object_store::{aws::AmazonS3Builder, path::Path as ObjectPath, ObjectStore, PutPayload};
use tracing::info;

use crate::{config::TextStoreConfig, error::PipelineError};

use super::{StoredDocument, TextStore};

pub struct S3TextStore {
    store: Box<dyn ObjectStore>,
    prefix: String,
}

impl S3TextStore {
    pub fn connect(config: &TextStoreConfig) -> Result<Self, PipelineError> {
        let store = AmazonS3Builder::from_env()
            .with_bucket_name(&config.bucket_name)
            .with_region(&config.region)
            .build()?;

        info!(
            bucket = config.bucket_name.as_str(),
            prefix = config.prefix.as_str(),
            "S3 text store ready"
        );

        Ok(Self {
            store: Box::new(store),
            prefix: config.prefix.clone(),
        })
    }

    fn object_path(&self, id: &str) -> ObjectPath {
        ObjectPath::from(format!("{}{}.json", self.prefix, id))
    }
}

#[async_trait]
impl TextStore for S3TextStore {
    fn client(&self) -> &'static str {
        "s3"
    }

    async fn store_document(&self, mut record: StoredDocument) -> Result<(), PipelineError> {
        if record.created_at.is_none() {
            record.created_at = Some(Utc::now().to_rfc3339());
        }
        let payload = PutPayload::from(Bytes::from(serde_json::to_vec(&record)?));
        self.store
            .put(&self.object_path(&record.id), payload)
            .await?;
        Ok(())
    }

    async fn retrieve_document(&self, id: &str) -> Result<Option<StoredDocument>, PipelineError> {
        match self.store.get(&self.object_path(id)).await {
            Ok(result) => {
                let raw = result.bytes().await?;
                Ok(Some(serde_json::from_slice(&raw)?))
            }
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(err) => Err(err.into()),
        }
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
        match self.store.delete(&self.object_path(id)).await {
            Ok(()) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn get_document_count(&self) -> Result<usize, PipelineError> {
        let prefix = ObjectPath::from(self.prefix.trim_end_matches('/').to_string());
        let objects: Vec<_> = self
            .store
            .list(Some(&prefix))
            .try_collect()
            .await?;
        Ok(objects.len())
    }

    async fn clear_all(&self) -> Result<(), PipelineError> {
        let prefix = ObjectPath::from(self.prefix.trim_end_matches('/').to_string());
        let objects: Vec<_> = self
            .store
            .list(Some(&prefix))
            .try_collect()
            .await?;
        for object in objects {
            self.store.delete(&object.location).await?;
        }
        Ok(())
    }
}
