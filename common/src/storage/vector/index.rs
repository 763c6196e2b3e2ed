//! In-memory exact index shared by the flat and memory stores.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

use super::{MetadataFilter, QueryMatch, VectorMetadata, VectorRecord};
use crate::embedding::pooling::l2_normalize;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct IndexEntry {
    pub vector: Vec<f32>,
    pub metadata: VectorMetadata,
    pub deleted: bool,
}

/// Exact cosine index. Vectors are L2-normalised at insert so similarity is
/// a plain dot product; entry order is insertion order, which doubles as the
/// deterministic tie-break.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct IndexCore {
    pub dimension: usize,
    pub entries: Vec<IndexEntry>,
    #[serde(skip)]
    id_to_slot: HashMap<String, usize>,
}

impl IndexCore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            entries: Vec::new(),
            id_to_slot: HashMap::new(),
        }
    }

    /// Rebuild the id lookup after deserialisation.
    pub fn rebuild_lookup(&mut self) {
        self.id_to_slot = self
            .entries
            .iter()
            .enumerate()
            .map(|(slot, entry)| (entry.metadata.chunk_id.clone(), slot))
            .collect();
    }

    /// Upsert by chunk id. A dimension mismatch resets the index at the new
    /// dimension (`IndexReset`), mirroring the reference store's behaviour.
    pub fn upsert(&mut self, record: VectorRecord) {
        if record.vector.len() != self.dimension {
            warn!(
                expected = self.dimension,
                got = record.vector.len(),
                "IndexReset: dimension mismatch, recreating index"
            );
            self.dimension = record.vector.len();
            self.entries.clear();
            self.id_to_slot.clear();
        }

        let entry = IndexEntry {
            vector: l2_normalize(record.vector),
            metadata: record.metadata,
            deleted: false,
        };

        match self.id_to_slot.get(&record.chunk_id) {
            Some(&slot) => self.entries[slot] = entry,
            None => {
                self.id_to_slot
                    .insert(record.chunk_id.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&IndexEntry> {
        self.id_to_slot
            .get(id)
            .map(|&slot| &self.entries[slot])
            .filter(|entry| !entry.deleted)
    }

    pub fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        include_metadata: bool,
        filter: Option<&MetadataFilter>,
    ) -> Vec<QueryMatch> {
        let query = l2_normalize(vector.to_vec());

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| !entry.deleted && entry.vector.len() == query.len())
            .filter(|(_, entry)| {
                filter
                    .map(|filter| metadata_matches(&entry.metadata, filter))
                    .unwrap_or(true)
            })
            .map(|(slot, entry)| {
                let score: f32 = entry
                    .vector
                    .iter()
                    .zip(&query)
                    .map(|(a, b)| a * b)
                    .sum();
                (slot, score)
            })
            .collect();

        // Descending score; insertion order breaks ties deterministically.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        scored
            .into_iter()
            .map(|(slot, score)| QueryMatch {
                id: self.entries[slot].metadata.chunk_id.clone(),
                score,
                metadata: include_metadata.then(|| self.entries[slot].metadata.clone()),
            })
            .collect()
    }

    pub fn delete(&mut self, ids: &[String]) -> usize {
        let mut deleted = 0;
        for id in ids {
            if let Some(&slot) = self.id_to_slot.get(id) {
                if !self.entries[slot].deleted {
                    self.entries[slot].deleted = true;
                    deleted += 1;
                }
            }
        }
        deleted
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.id_to_slot.clear();
    }

    pub fn live_count(&self) -> usize {
        self.entries.iter().filter(|entry| !entry.deleted).count()
    }
}

/// Flat equality filter over the serialised metadata record.
fn metadata_matches(metadata: &VectorMetadata, filter: &MetadataFilter) -> bool {
    let value = match serde_json::to_value(metadata) {
        Ok(value) => value,
        Err(_) => return false,
    };
    filter.iter().all(|(key, expected)| {
        value
            .get(key)
            .and_then(|field| field.as_str())
            .map(|field| field == expected)
            .unwrap_or(false)
    })
}
