//! SQLite text store, the default client.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool},
    Row,
};
use tracing::info;

use crate::error::PipelineError;

use super::{StoredDocument, TextStore};

pub struct SqliteTextStore {
    pool: SqlitePool,
}

impl SqliteTextStore {
    pub async fn connect(path: &str) -> Result<Self, PipelineError> {
        if let Some(parent) = Path::new(path).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))
            .map_err(PipelineError::Database)?
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                document_data TEXT,
                embedding TEXT,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_id ON documents(id)")
            .execute(&pool)
            .await?;

        info!(path, "SQLite text store ready");
        Ok(Self { pool })
    }

    fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> Result<StoredDocument, PipelineError> {
        let document_data: Option<String> = row.try_get("document_data")?;
        let embedding: Option<String> = row.try_get("embedding")?;
        Ok(StoredDocument {
            id: row.try_get("id")?,
            text: row.try_get("text")?,
            document_data: document_data
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            embedding: embedding.as_deref().map(serde_json::from_str).transpose()?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl TextStore for SqliteTextStore {
    fn client(&self) -> &'static str {
        "sqlite"
    }

    async fn store_document(&self, record: StoredDocument) -> Result<(), PipelineError> {
        let document_data = record
            .document_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let embedding = record
            .embedding
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO documents (id, text, document_data, embedding)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                text = excluded.text,
                document_data = excluded.document_data,
                embedding = excluded.embedding
            "#,
        )
        .bind(&record.id)
        .bind(&record.text)
        .bind(document_data)
        .bind(embedding)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn retrieve_document(&self, id: &str) -> Result<Option<StoredDocument>, PipelineError> {
        let row = sqlx::query("SELECT id, text, document_data, embedding, CAST(created_at AS TEXT) AS created_at FROM documents WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_document).transpose()
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
        let result = sqlx::query("DELETE FROM documents WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_document_count(&self) -> Result<usize, PipelineError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM documents")
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get("count")?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    async fn clear_all(&self) -> Result<(), PipelineError> {
        sqlx::query("DELETE FROM documents")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Document, DocumentChunk};

    async fn store() -> (tempfile::TempDir, SqliteTextStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunks.db");
        let store = SqliteTextStore::connect(&path.to_string_lossy())
            .await
            .unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn chunk_round_trips_with_document_data() {
        let (_dir, store) = store().await;

        let document = Document::new("a.txt", "data/a.txt", "full document text");
        let chunk = DocumentChunk::new("the chunk body", document.clone())
            .with_embedding(vec![0.25, -0.5]);

        store.store_document_chunk(&chunk).await.unwrap();

        let stored = store.retrieve_document(&chunk.id).await.unwrap().unwrap();
        assert_eq!(stored.text, "the chunk body");
        assert_eq!(stored.embedding, Some(vec![0.25, -0.5]));
        let data = stored.document_data.unwrap();
        assert_eq!(data.get("name").and_then(|v| v.as_str()), Some("a.txt"));
        assert_eq!(
            data.get("id").and_then(|v| v.as_str()),
            Some(document.id.as_str())
        );
    }

    #[tokio::test]
    async fn repeat_store_upserts_by_id() {
        let (_dir, store) = store().await;
        let document = Document::new("a.txt", "data/a.txt", "text");
        let mut chunk = DocumentChunk::new("first version", document);

        store.store_document_chunk(&chunk).await.unwrap();
        chunk.text = "second version".to_string();
        store.store_document_chunk(&chunk).await.unwrap();

        assert_eq!(store.get_document_count().await.unwrap(), 1);
        let stored = store.retrieve_document(&chunk.id).await.unwrap().unwrap();
        assert_eq!(stored.text, "second version");
    }

    #[tokio::test]
    async fn delete_and_count_and_clear() {
        let (_dir, store) = store().await;
        let document = Document::new("a.txt", "data/a.txt", "text");
        let first = DocumentChunk::new("one", document.clone());
        let second = DocumentChunk::new("two", document);

        store.store_document_chunk(&first).await.unwrap();
        store.store_document_chunk(&second).await.unwrap();
        assert_eq!(store.get_document_count().await.unwrap(), 2);

        assert!(store.delete_document(&first.id).await.unwrap());
        assert!(!store.delete_document(&first.id).await.unwrap());
        assert_eq!(store.get_document_count().await.unwrap(), 1);

        store.clear_all().await.unwrap();
        assert_eq!(store.get_document_count().await.unwrap(), 0);
        assert!(store.retrieve_document(&second.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn retrieve_documents_skips_missing_ids() {
        let (_dir, store) = store().await;
        let document = Document::new("a.txt", "data/a.txt", "text");
        let chunk = DocumentChunk::new("present", document);
        store.store_document_chunk(&chunk).await.unwrap();

        let found = store
            .retrieve_documents(&[chunk.id.clone(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, chunk.id);
    }
}
