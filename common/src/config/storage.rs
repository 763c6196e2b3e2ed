//! Storage configuration: vector index and text store.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorConfig {
    /// Vector storage provider; unknown names fall back to the local flat
    /// index with a warning.
    #[serde(default = "default_vector_provider")]
    pub provider: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub index: Option<String>,
    #[serde(default)]
    pub index_name: Option<String>,
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    /// Wipe the index before the first write of the run.
    #[serde(default)]
    pub clear: bool,
    #[serde(default)]
    pub upload: bool,
}

fn default_vector_provider() -> String {
    "flat".to_string()
}

fn default_dimension() -> usize {
    768
}

impl VectorConfig {
    /// The first of `path`, `index`, `index_name` names the on-disk index.
    pub fn index_path(&self) -> String {
        self.path
            .clone()
            .or_else(|| self.index.clone())
            .or_else(|| self.index_name.clone())
            .unwrap_or_else(|| "data/.faiss/index".to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextStoreClient {
    Sqlite,
    Postgres,
    S3,
    File,
}

impl Default for TextStoreClient {
    fn default() -> Self {
        Self::Sqlite
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextStoreConfig {
    #[serde(default)]
    pub client: TextStoreClient,
    #[serde(default)]
    pub upload: bool,

    // SQLite
    #[serde(default = "default_sqlite_path")]
    pub path: String,

    // PostgreSQL
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,

    // S3
    #[serde(default = "default_bucket")]
    pub bucket_name: String,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default = "default_region")]
    pub region: String,

    // File store
    #[serde(default = "default_base_path")]
    pub base_path: String,
}

fn default_sqlite_path() -> String {
    "data/.sql/chunks.db".to_string()
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_database() -> String {
    "sondera".to_string()
}

fn default_user() -> String {
    "postgres".to_string()
}

fn default_bucket() -> String {
    "sondera-documents".to_string()
}

fn default_prefix() -> String {
    "documents/".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_base_path() -> String {
    "data/documents".to_string()
}

impl Default for TextStoreConfig {
    fn default() -> Self {
        Self {
            client: TextStoreClient::default(),
            upload: false,
            path: default_sqlite_path(),
            host: default_host(),
            port: default_port(),
            database: default_database(),
            user: default_user(),
            password: String::new(),
            bucket_name: default_bucket(),
            prefix: default_prefix(),
            region: default_region(),
            base_path: default_base_path(),
        }
    }
}

/// Either, both, or neither backend may be configured; an absent section
/// disables the corresponding writes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub vector: Option<VectorConfig>,
    #[serde(default)]
    pub text_store: Option<TextStoreConfig>,
}
