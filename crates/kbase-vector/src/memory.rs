//! In-memory collection store.
//!
//! Brute-force cosine search over every stored chunk. Useful for tests and
//! for pipelines that do not need persistence.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use kbase_core::types::validate_collection_name;
use kbase_core::{Chunk, ChunkId, Error, MetadataFilter, Result, SearchHit, VectorIndex};

use crate::records::check_chunks;

#[derive(Debug, Clone)]
struct StoredChunk {
    id: ChunkId,
    chunk: Chunk,
}

#[derive(Default)]
pub struct MemoryIndex {
    collections: RwLock<BTreeMap<String, Vec<StoredChunk>>>,
}

impl MemoryIndex {
    pub fn new() -> Self { Self::default() }

    fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            return 1.0;
        }
        1.0 - dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn upsert(&self, collection: &str, chunks: Vec<Chunk>) -> Result<Vec<ChunkId>> {
        validate_collection_name(collection)?;
        if chunks.is_empty() {
            return Ok(Vec::new());
        }
        let dim = check_chunks(&chunks)?;
        let mut collections = self.collections.write().await;
        let stored = collections.entry(collection.to_string()).or_default();
        if let Some(existing) = stored.first().map(|s| s.chunk.vector.len()) {
            if existing != dim {
                return Err(Error::DimensionMismatch { expected: existing, actual: dim });
            }
        }
        // Only preset ids can collide with stored rows; fresh UUIDs skip the scan.
        let replaced: HashSet<&str> = chunks.iter().filter_map(|c| c.id.as_deref()).collect();
        if !replaced.is_empty() {
            stored.retain(|s| !replaced.contains(s.id.as_str()));
        }
        let mut ids = Vec::with_capacity(chunks.len());
        for mut chunk in chunks {
            let id = chunk.id.take().unwrap_or_else(|| Uuid::new_v4().to_string());
            stored.push(StoredChunk { id: id.clone(), chunk });
            ids.push(id);
        }
        debug!(collection, count = ids.len(), "upserted chunks");
        Ok(ids)
    }

    async fn search(&self, collection: &str, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        validate_collection_name(collection)?;
        let collections = self.collections.read().await;
        let Some(stored) = collections.get(collection).filter(|s| !s.is_empty()) else {
            return Ok(Vec::new());
        };
        let dim = stored[0].chunk.vector.len();
        if dim != query.len() {
            return Err(Error::DimensionMismatch { expected: dim, actual: query.len() });
        }
        let mut hits: Vec<SearchHit> = stored
            .iter()
            .map(|s| SearchHit {
                id: s.id.clone(),
                text: s.chunk.text.clone(),
                metadata: s.chunk.metadata.clone(),
                distance: Self::cosine_distance(query, &s.chunk.vector),
            })
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(k);
        Ok(hits)
    }

    async fn delete(&self, collection: &str, ids: &[ChunkId]) -> Result<()> {
        validate_collection_name(collection)?;
        if let Some(stored) = self.collections.write().await.get_mut(collection) {
            stored.retain(|s| !ids.contains(&s.id));
        }
        Ok(())
    }

    async fn delete_where(&self, collection: &str, filter: &MetadataFilter) -> Result<usize> {
        validate_collection_name(collection)?;
        if filter.is_empty() {
            return Err(Error::InvalidInput("refusing to delete with an empty filter".to_string()));
        }
        let mut collections = self.collections.write().await;
        let Some(stored) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = stored.len();
        stored.retain(|s| !s.chunk.metadata.matches(filter));
        Ok(before - stored.len())
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        validate_collection_name(collection)?;
        Ok(self.collections.read().await.get(collection).map_or(0, Vec::len))
    }

    async fn list_collections(&self) -> Result<BTreeSet<String>> {
        Ok(self.collections.read().await.keys().cloned().collect())
    }

    async fn list_sources(&self, collection: &str) -> Result<BTreeSet<String>> {
        validate_collection_name(collection)?;
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .map(|stored| stored.iter().map(|s| s.chunk.metadata.source_file.clone()).collect())
            .unwrap_or_default())
    }

    async fn clear_collection(&self, collection: &str) -> Result<usize> {
        validate_collection_name(collection)?;
        let mut collections = self.collections.write().await;
        Ok(collections.get_mut(collection).map_or(0, |stored| std::mem::take(stored).len()))
    }

    async fn drop_collection(&self, collection: &str) -> Result<()> {
        self.clear_collection(collection).await.map(|_| ())
    }

    async fn reset_all(&self) -> Result<()> {
        self.collections.write().await.clear();
        Ok(())
    }
}
