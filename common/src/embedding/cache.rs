//! Process-local embedding cache, keyed by input text.
//!
//! Values for a given key are deterministic, so the cache is append-only
//! within a run: single writer, many readers. When a spill directory is
//! configured, entries also land on disk under the SHA-256 of their text so
//! repeat runs skip the provider entirely.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::RwLock,
};

use sha2::{Digest, Sha256};
use tracing::debug;

pub struct EmbeddingCache {
    entries: RwLock<HashMap<String, Vec<f32>>>,
    spill_dir: Option<PathBuf>,
}

impl EmbeddingCache {
    /// In-memory cache only; used by dry runs and tests.
    pub fn in_memory() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            spill_dir: None,
        }
    }

    /// Cache with a disk spill directory (`data/.cache` by default).
    pub fn with_spill_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            spill_dir: Some(dir.into()),
        }
    }

    pub fn get(&self, text: &str) -> Option<Vec<f32>> {
        if let Some(hit) = self
            .entries
            .read()
            .ok()
            .and_then(|entries| entries.get(text).cloned())
        {
            return Some(hit);
        }

        let path = self.spill_path(text)?;
        let raw = std::fs::read_to_string(path).ok()?;
        let vector: Vec<f32> = serde_json::from_str(&raw).ok()?;
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(text.to_string(), vector.clone());
        }
        Some(vector)
    }

    pub fn insert(&self, text: &str, vector: Vec<f32>) {
        if let Some(path) = self.spill_path(text) {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            match serde_json::to_string(&vector) {
                Ok(raw) => {
                    if let Err(err) = std::fs::write(&path, raw) {
                        debug!(path = %path.display(), error = %err, "embedding cache spill failed");
                    }
                }
                Err(err) => debug!(error = %err, "embedding cache serialisation failed"),
            }
        }
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(text.to_string(), vector);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn spill_path(&self, text: &str) -> Option<PathBuf> {
        let dir = self.spill_dir.as_ref()?;
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        Some(dir.join(format!("{:x}.json", hasher.finalize())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_cache_round_trips() {
        let cache = EmbeddingCache::in_memory();
        assert!(cache.get("hello").is_none());
        cache.insert("hello", vec![0.1, 0.2]);
        assert_eq!(cache.get("hello"), Some(vec![0.1, 0.2]));
    }

    #[test]
    fn spill_cache_survives_a_fresh_instance() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = EmbeddingCache::with_spill_dir(dir.path());
            cache.insert("persisted", vec![1.0, -1.0]);
        }
        let fresh = EmbeddingCache::with_spill_dir(dir.path());
        assert_eq!(fresh.get("persisted"), Some(vec![1.0, -1.0]));
    }
}
