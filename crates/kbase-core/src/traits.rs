use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::types::{Chunk, ChunkId, MetadataFilter, SearchHit};

/// Maps text to fixed-length vectors.
///
/// Implementations must be deterministic for identical text and model
/// configuration, and `dim()` never changes for one instance.
pub trait Embedder: Send + Sync {
    /// Identifies the model and its configuration, e.g. for logs.
    fn model_id(&self) -> &str;
    fn dim(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])?
            .pop()
            .ok_or_else(|| Error::embedding("embedder returned no vector"))
    }
}

/// Named collections of chunks with nearest-neighbour search.
///
/// Collections are created implicitly by the first `upsert`. A collection's
/// vector dimension is fixed by the chunks it holds; an empty collection
/// accepts any dimension.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Stores the chunks durably, assigning ids to those without one, and
    /// returns the ids in input order.
    async fn upsert(&self, collection: &str, chunks: Vec<Chunk>) -> Result<Vec<ChunkId>>;

    /// Up to `k` nearest chunks, nearest first. A missing or empty collection
    /// yields an empty result.
    async fn search(&self, collection: &str, query: &[f32], k: usize) -> Result<Vec<SearchHit>>;

    /// Removes chunks by id. Unknown ids are ignored.
    async fn delete(&self, collection: &str, ids: &[ChunkId]) -> Result<()>;

    /// Removes every chunk whose metadata matches `filter` and returns how many went.
    async fn delete_where(&self, collection: &str, filter: &MetadataFilter) -> Result<usize>;

    async fn count(&self, collection: &str) -> Result<usize>;

    /// Empty when the storage root does not exist yet.
    async fn list_collections(&self) -> Result<BTreeSet<String>>;

    /// Distinct `source_file` values stored in the collection.
    async fn list_sources(&self, collection: &str) -> Result<BTreeSet<String>>;

    /// Removes every chunk but keeps the collection. Returns the removed count.
    async fn clear_collection(&self, collection: &str) -> Result<usize>;

    /// Deletes the collection's contents and recreates it empty.
    async fn drop_collection(&self, collection: &str) -> Result<()>;

    /// Wipes the storage root and reinitialises it empty.
    async fn reset_all(&self) -> Result<()>;
}
