//! Dataset enumeration into `Document` values.

use std::collections::HashSet;
use std::path::Path;

use futures::TryStreamExt;
use object_store::{aws::AmazonS3Builder, path::Path as ObjectPath, ObjectStore};
use tracing::{info, warn};
use walkdir::WalkDir;

use common::{
    config::{DatasetConfig, DatasetProvider},
    error::PipelineError,
    types::Document,
};

pub struct DatasetLoader {
    config: DatasetConfig,
}

impl DatasetLoader {
    pub fn new(config: DatasetConfig) -> Self {
        Self { config }
    }

    /// Enumerate the dataset in a stable order (lexicographic by full path)
    /// so downstream content-derived ids are reproducible.
    pub async fn load(&self) -> Result<Vec<Document>, PipelineError> {
        let documents = match self.config.provider {
            DatasetProvider::Local => self.load_local()?,
            DatasetProvider::S3 => self.load_s3().await?,
        };
        info!(
            documents = documents.len(),
            path = self.config.path.as_str(),
            "Dataset loaded"
        );
        Ok(documents)
    }

    fn allowed_extensions(&self) -> HashSet<String> {
        self.config
            .allowed_types
            .iter()
            .map(|ext| ext.trim_start_matches('.').to_lowercase())
            .collect()
    }

    fn load_local(&self) -> Result<Vec<Document>, PipelineError> {
        let base = Path::new(&self.config.path);
        if !base.exists() {
            return Err(PipelineError::PathNotFound(self.config.path.clone()));
        }

        let allowed = self.allowed_extensions();
        let mut documents = Vec::new();

        if base.is_file() {
            if extension_allowed(base, &allowed) {
                if let Some(document) = read_document(base) {
                    documents.push(document);
                }
            }
            return Ok(documents);
        }

        let mut paths: Vec<_> = WalkDir::new(base)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) if entry.file_type().is_file() => Some(entry.into_path()),
                Ok(_) => None,
                Err(err) => {
                    warn!(error = %err, "Skipping unreadable directory entry");
                    None
                }
            })
            .filter(|path| extension_allowed(path, &allowed))
            .collect();
        paths.sort();

        for path in paths {
            if let Some(document) = read_document(&path) {
                documents.push(document);
            }
        }
        Ok(documents)
    }

    async fn load_s3(&self) -> Result<Vec<Document>, PipelineError> {
        let (bucket, prefix) = split_bucket_path(&self.config.path);
        let store = AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .build()?;

        let prefix_path = ObjectPath::from(prefix.trim_end_matches('/').to_string());
        let mut objects: Vec<_> = store.list(Some(&prefix_path)).try_collect().await?;
        objects.sort_by(|a, b| a.location.as_ref().cmp(b.location.as_ref()));

        let allowed = self.allowed_extensions();
        let mut documents = Vec::new();
        for object in objects {
            let key = object.location.as_ref();
            if !extension_allowed(Path::new(key), &allowed) {
                continue;
            }
            match store.get(&object.location).await {
                Ok(result) => {
                    let bytes = result.bytes().await?;
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    let name = key.rsplit('/').next().unwrap_or(key).to_string();
                    documents.push(Document::new(name, key.to_string(), text));
                }
                Err(err) => {
                    // Per-object failures are non-fatal, mirroring local reads.
                    warn!(key, error = %err, "Skipping unreadable object");
                }
            }
        }
        Ok(documents)
    }
}

fn extension_allowed(path: &Path, allowed: &HashSet<String>) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| allowed.contains(&ext.to_lowercase()))
        .unwrap_or(false)
}

/// Read a file as UTF-8 with lossy replacement; unreadable files are logged
/// and skipped.
fn read_document(path: &Path) -> Option<Document> {
    match std::fs::read(path) {
        Ok(bytes) => {
            let text = String::from_utf8_lossy(&bytes).into_owned();
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            Some(Document::new(name, path.display().to_string(), text))
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "Path unreadable; skipping file");
            None
        }
    }
}

fn split_bucket_path(path: &str) -> (&str, &str) {
    let trimmed = path.strip_prefix("s3://").unwrap_or(path);
    match trimmed.split_once('/') {
        Some((bucket, prefix)) => (bucket, prefix),
        None => (trimmed, ""),
    }
}
