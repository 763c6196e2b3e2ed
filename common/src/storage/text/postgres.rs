//! PostgreSQL text store; same schema as the SQLite default.

use async_trait::async_trait;
use sqlx::{
    postgres::{PgConnectOptions, PgPool},
    Row,
};
use tracing::info;

use crate::{config::TextStoreConfig, error::PipelineError};

use super::{StoredDocument, TextStore};

pub struct PostgresTextStore {
    pool: PgPool,
}

impl PostgresTextStore {
    pub async fn connect(config: &TextStoreConfig) -> Result<Self, PipelineError> {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .username(&config.user)
            .password(&config.password);
        let pool = PgPool::connect_with(options).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                document_data TEXT,
                embedding TEXT,
                created_at TIMESTAMPTZ DEFAULT now()
            )
            "#,
        )
        .execute(&pool)
        .await?;

        info!(
            host = config.host.as_str(),
            database = config.database.as_str(),
            "PostgreSQL text store ready"
        );
        Ok(Self { pool })
    }

    fn row_to_document(row: &sqlx::postgres::PgRow) -> Result<StoredDocument, PipelineError> {
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
impl TextStore for PostgresTextStore {
    fn client(&self) -> &'static str {
        "postgres"
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
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET
                text = EXCLUDED.text,
                document_data = EXCLUDED.document_data,
                embedding = EXCLUDED.embedding
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
        let row = sqlx::query(
            "SELECT id, text, document_data, embedding, created_at::text AS created_at FROM documents WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_document).transpose()
    }

    async fn retrieve_documents(
        &self,
        ids: &[String],
    ) -> Result<Vec<StoredDocument>, PipelineError> {
        let rows = sqlx::query(
            "SELECT id, text, document_data, embedding, created_at::text AS created_at FROM documents WHERE id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_document).collect()
    }

    async fn delete_document(&self, id: &str) -> Result<bool, PipelineError> {
        let result = sqlx::query("DELETE FROM documents WHERE id = $1")
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
