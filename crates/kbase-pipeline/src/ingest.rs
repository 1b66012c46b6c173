//! Ingestion pipeline: load, chunk, tag, embed, store.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::{SecondsFormat, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use kbase_core::{CancelFlag, Chunk, ChunkMetadata, Error, LoadedDocument, Result};

use crate::knowledge_base::KnowledgeBase;
use crate::retry::{retry, with_timeout};

/// The human-facing name of a file: its last path component.
pub fn display_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().to_string()).filter(|n| !n.trim().is_empty())
}

impl KnowledgeBase {
    /// Ingests one document and returns how many chunks were stored.
    ///
    /// `display_name` defaults to the file name. Re-ingesting a file adds a
    /// second copy of its chunks; use [`KnowledgeBase::delete_by_source`] first
    /// to replace it.
    pub async fn ingest(&self, path: &Path, collection: Option<&str>, display_name: Option<&str>) -> Result<usize> {
        self.ingest_with_cancel(path, collection, display_name, &CancelFlag::new()).await
    }

    /// Like [`KnowledgeBase::ingest`], checking `cancel` before loading and
    /// before each stored batch. A cancelled run keeps the batches already
    /// committed and reports them in [`Error::Cancelled`].
    pub async fn ingest_with_cancel(
        &self,
        path: &Path,
        collection: Option<&str>,
        display_name: Option<&str>,
        cancel: &CancelFlag,
    ) -> Result<usize> {
        let collection = self.resolve_collection(collection)?;
        let source_file = match display_name {
            Some(name) if name.trim().is_empty() => {
                return Err(Error::InvalidInput("display name must not be blank".to_string()));
            }
            Some(name) => name.trim().to_string(),
            None => self::display_name(path)
                .ok_or_else(|| Error::InvalidInput(format!("{} has no file name", path.display())))?,
        };
        if cancel.is_cancelled() {
            return Err(Error::Cancelled { committed: 0 });
        }

        let start = Instant::now();
        let document = self.load(path).await?;
        let chunks = self.tag_chunks(&document, &source_file);
        if chunks.is_empty() {
            warn!(path = %path.display(), "document has no text, nothing stored");
            return Ok(0);
        }
        let total = chunks.len();
        debug!(source_file, total, "chunked document");

        let mut batches = Vec::new();
        let mut pending = chunks.into_iter().peekable();
        while pending.peek().is_some() {
            batches.push(pending.by_ref().take(self.batch_size).collect::<Vec<_>>());
        }

        let mut embedded = stream::iter(batches).map(|batch| self.embed_chunks(batch)).buffered(self.max_concurrency);
        let mut committed = 0;
        while let Some(batch) = embedded.next().await {
            let batch = batch?;
            if cancel.is_cancelled() {
                info!(source_file, committed, total, "ingestion cancelled");
                return Err(Error::Cancelled { committed });
            }
            let stored = batch.len();
            with_timeout("upsert", self.timeouts.storage(), self.index.upsert(&collection, batch)).await?;
            committed += stored;
            debug!(source_file, committed, total, "stored batch");
        }

        info!(source_file, collection, chunks = committed, elapsed = ?start.elapsed(), "ingested document");
        Ok(committed)
    }

    async fn load(&self, path: &Path) -> Result<LoadedDocument> {
        let loader = Arc::clone(&self.loader);
        let owned = path.to_path_buf();
        tokio::task::spawn_blocking(move || loader.load(&owned))
            .await
            .map_err(|e| Error::load(path, format!("loader task failed: {e}")))?
    }

    /// One chunk per piece of every segment, with provenance attached.
    /// Vectors are filled in later.
    fn tag_chunks(&self, document: &LoadedDocument, source_file: &str) -> Vec<Chunk> {
        let pieces: Vec<(String, Option<u32>)> = document
            .segments
            .iter()
            .flat_map(|seg| self.chunker.split(&seg.text).into_iter().map(move |text| (text, seg.page)))
            .collect();
        let total = pieces.len();
        let ingested_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        pieces
            .into_iter()
            .enumerate()
            .map(|(index, (text, page))| {
                let mut metadata = ChunkMetadata::new(source_file)
                    .with("chunk_index", index)
                    .with("total_chunks", total)
                    .with("ingested_at", ingested_at.as_str());
                if let Some(page) = page {
                    metadata.insert("page", page);
                }
                Chunk::new(text, Vec::new(), metadata)
            })
            .collect()
    }

    async fn embed_chunks(&self, mut batch: Vec<Chunk>) -> Result<Vec<Chunk>> {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embed_texts(texts).await?;
        for (chunk, vector) in batch.iter_mut().zip(vectors) {
            chunk.vector = vector;
        }
        Ok(batch)
    }

    /// Embeds on the blocking pool with timeout and retry, and checks the
    /// provider returned one vector of the advertised width per text.
    pub(crate) async fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let expected = texts.len();
        let dim = self.embedder.dim();
        let (embedder, texts, after) = (&self.embedder, &texts, self.timeouts.embed());
        let vectors = retry(&self.retry, "embed", move || {
            let embedder = Arc::clone(embedder);
            let texts = texts.clone();
            with_timeout("embed", after, async move {
                tokio::task::spawn_blocking(move || embedder.embed_batch(&texts))
                    .await
                    .map_err(|e| Error::embedding(format!("embedding task failed: {e}")))?
            })
        })
        .await?;
        if vectors.len() != expected {
            return Err(Error::embedding(format!("embedder returned {} vectors for {expected} texts", vectors.len())));
        }
        if let Some(v) = vectors.iter().find(|v| v.len() != dim) {
            return Err(Error::DimensionMismatch { expected: dim, actual: v.len() });
        }
        Ok(vectors)
    }
}
