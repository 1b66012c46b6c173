//! LanceDB-backed collection store: one Lance table per collection under a
//! single storage root.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};

use arrow_array::{RecordBatchIterator, RecordBatchReader};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::database::CreateTableMode;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::{connect, Connection, DistanceType, Table};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use kbase_core::types::validate_collection_name;
use kbase_core::{Chunk, ChunkId, Error, MetadataFilter, Result, SearchHit, VectorIndex};

use crate::filter::{id_predicate, source_predicate, ID_BATCH};
use crate::records::{check_chunks, chunks_to_batch, hits_from_batch, rows_from_batch, source_files};
use crate::schema::{chunk_schema, vector_dim, ID, METADATA, SOURCE_FILE};

trait StorageContext<T> {
    fn storage(self, what: impl FnOnce() -> String) -> Result<T>;
}

impl<T, E: std::fmt::Display> StorageContext<T> for std::result::Result<T, E> {
    fn storage(self, what: impl FnOnce() -> String) -> Result<T> {
        self.map_err(|e| Error::storage(format!("{}: {e}", what())))
    }
}

/// Writes to one collection are serialised by a per-collection lock; a
/// storage reset excludes every other operation.
pub struct LanceCollectionStore {
    root: PathBuf,
    connection: RwLock<Option<Connection>>,
    lifecycle: RwLock<()>,
    writers: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LanceCollectionStore {
    /// Nothing touches the disk until the first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            connection: RwLock::new(None),
            lifecycle: RwLock::new(()),
            writers: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path { &self.root }

    async fn get_connection(&self) -> Result<Connection> {
        {
            let conn = self.connection.read().await;
            if let Some(ref c) = *conn {
                return Ok(c.clone());
            }
        }

        let mut conn = self.connection.write().await;
        if let Some(ref c) = *conn {
            return Ok(c.clone());
        }
        tokio::fs::create_dir_all(&self.root)
            .await
            .storage(|| format!("creating storage root {}", self.root.display()))?;
        let uri = self.root.to_string_lossy().to_string();
        let new_conn = connect(&uri).execute().await.storage(|| format!("connecting to {uri}"))?;
        debug!(root = %uri, "opened lancedb connection");
        *conn = Some(new_conn.clone());
        Ok(new_conn)
    }

    async fn root_exists(&self) -> bool { tokio::fs::try_exists(&self.root).await.unwrap_or(false) }

    /// `None` when the storage root or the collection does not exist. Never
    /// creates anything.
    async fn open_table(&self, collection: &str) -> Result<Option<Table>> {
        if !self.root_exists().await {
            return Ok(None);
        }
        let conn = self.get_connection().await?;
        let names = conn.table_names().execute().await.storage(|| "listing collections".to_string())?;
        if !names.iter().any(|n| n == collection) {
            return Ok(None);
        }
        let table = conn
            .open_table(collection)
            .execute()
            .await
            .storage(|| format!("opening collection {collection}"))?;
        Ok(Some(table))
    }

    fn writer_lock(&self, collection: &str) -> Arc<Mutex<()>> {
        let mut writers = self.writers.lock().unwrap_or_else(PoisonError::into_inner);
        writers.entry(collection.to_string()).or_default().clone()
    }

    async fn table_dim(table: &Table, collection: &str) -> Result<Option<usize>> {
        let schema = table.schema().await.storage(|| format!("reading schema of {collection}"))?;
        Ok(vector_dim(&schema))
    }

    async fn count_rows(table: &Table, collection: &str, predicate: Option<String>) -> Result<usize> {
        table.count_rows(predicate).await.storage(|| format!("counting rows of {collection}"))
    }

    async fn delete_ids(table: &Table, collection: &str, ids: &[ChunkId]) -> Result<()> {
        for batch in ids.chunks(ID_BATCH) {
            table
                .delete(&id_predicate(batch))
                .await
                .storage(|| format!("deleting from {collection}"))?;
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for LanceCollectionStore {
    async fn upsert(&self, collection: &str, chunks: Vec<Chunk>) -> Result<Vec<ChunkId>> {
        validate_collection_name(collection)?;
        if chunks.is_empty() {
            return Ok(Vec::new());
        }
        let dim = check_chunks(&chunks)?;
        let replaces_ids = chunks.iter().any(|c| c.id.is_some());
        let ids: Vec<ChunkId> = chunks
            .iter()
            .map(|c| c.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string()))
            .collect();

        let _life = self.lifecycle.read().await;
        let lock = self.writer_lock(collection);
        let _writer = lock.lock().await;

        let schema = chunk_schema(dim)?;
        let batch = chunks_to_batch(&ids, &chunks, dim)?;
        let reader: Box<dyn RecordBatchReader + Send> =
            Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
        let conn = self.get_connection().await?;

        match self.open_table(collection).await? {
            None => {
                conn.create_table(collection, reader)
                    .execute()
                    .await
                    .storage(|| format!("creating collection {collection}"))?;
                info!(collection, dim, "created collection");
            }
            Some(table) => {
                let existing = Self::table_dim(&table, collection).await?;
                if existing != Some(dim) {
                    let rows = Self::count_rows(&table, collection, None).await?;
                    if rows > 0 {
                        return Err(Error::DimensionMismatch { expected: existing.unwrap_or(0), actual: dim });
                    }
                    // Empty collection: adopt the new dimension.
                    conn.create_table(collection, reader)
                        .mode(CreateTableMode::Overwrite)
                        .execute()
                        .await
                        .storage(|| format!("recreating collection {collection}"))?;
                    info!(collection, dim, "recreated empty collection with new dimension");
                } else if replaces_ids {
                    let mut mi = table.merge_insert(&[ID]);
                    mi.when_matched_update_all(None).when_not_matched_insert_all();
                    let _ = mi.execute(reader).await.storage(|| format!("merging into {collection}"))?;
                } else {
                    table.add(reader).execute().await.storage(|| format!("appending to {collection}"))?;
                }
            }
        }
        debug!(collection, count = ids.len(), "upserted chunks");
        Ok(ids)
    }

    async fn search(&self, collection: &str, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        validate_collection_name(collection)?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let _life = self.lifecycle.read().await;
        let Some(table) = self.open_table(collection).await? else {
            return Ok(Vec::new());
        };
        if Self::count_rows(&table, collection, None).await? == 0 {
            return Ok(Vec::new());
        }
        if let Some(dim) = Self::table_dim(&table, collection).await? {
            if dim != query.len() {
                return Err(Error::DimensionMismatch { expected: dim, actual: query.len() });
            }
        }

        let mut results = table
            .vector_search(query.to_vec())
            .storage(|| format!("building search on {collection}"))?
            .distance_type(DistanceType::Cosine)
            .limit(k)
            .execute()
            .await
            .storage(|| format!("searching {collection}"))?;

        let mut hits = Vec::new();
        while let Some(batch) = results.try_next().await.storage(|| format!("reading results from {collection}"))? {
            hits.extend(hits_from_batch(&batch)?);
        }
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(k);
        debug!(collection, k, found = hits.len(), "vector search");
        Ok(hits)
    }

    async fn delete(&self, collection: &str, ids: &[ChunkId]) -> Result<()> {
        validate_collection_name(collection)?;
        if ids.is_empty() {
            return Ok(());
        }
        let _life = self.lifecycle.read().await;
        let lock = self.writer_lock(collection);
        let _writer = lock.lock().await;
        let Some(table) = self.open_table(collection).await? else {
            return Ok(());
        };
        Self::delete_ids(&table, collection, ids).await
    }

    async fn delete_where(&self, collection: &str, filter: &MetadataFilter) -> Result<usize> {
        validate_collection_name(collection)?;
        if filter.is_empty() {
            return Err(Error::InvalidInput("refusing to delete with an empty filter".to_string()));
        }
        let _life = self.lifecycle.read().await;
        let lock = self.writer_lock(collection);
        let _writer = lock.lock().await;
        let Some(table) = self.open_table(collection).await? else {
            return Ok(0);
        };

        // Source-only filters run as a SQL predicate; anything else is matched
        // against the decoded metadata column.
        if let Some(predicate) = source_predicate(filter) {
            let removed = Self::count_rows(&table, collection, Some(predicate.clone())).await?;
            if removed > 0 {
                table.delete(&predicate).await.storage(|| format!("deleting from {collection}"))?;
            }
            debug!(collection, removed, "deleted by source");
            return Ok(removed);
        }

        let mut stream = table
            .query()
            .select(Select::columns(&[ID, SOURCE_FILE, METADATA]))
            .execute()
            .await
            .storage(|| format!("scanning {collection}"))?;
        let mut doomed = Vec::new();
        while let Some(batch) = stream.try_next().await.storage(|| format!("scanning {collection}"))? {
            doomed.extend(rows_from_batch(&batch)?.into_iter().filter(|r| r.metadata.matches(filter)).map(|r| r.id));
        }
        Self::delete_ids(&table, collection, &doomed).await?;
        debug!(collection, removed = doomed.len(), "deleted by metadata filter");
        Ok(doomed.len())
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        validate_collection_name(collection)?;
        let _life = self.lifecycle.read().await;
        match self.open_table(collection).await? {
            Some(table) => Self::count_rows(&table, collection, None).await,
            None => Ok(0),
        }
    }

    async fn list_collections(&self) -> Result<BTreeSet<String>> {
        let _life = self.lifecycle.read().await;
        if !self.root_exists().await {
            return Ok(BTreeSet::new());
        }
        let conn = self.get_connection().await?;
        let names = conn.table_names().execute().await.storage(|| "listing collections".to_string())?;
        Ok(names.into_iter().collect())
    }

    async fn list_sources(&self, collection: &str) -> Result<BTreeSet<String>> {
        validate_collection_name(collection)?;
        let _life = self.lifecycle.read().await;
        let Some(table) = self.open_table(collection).await? else {
            return Ok(BTreeSet::new());
        };
        let mut stream = table
            .query()
            .select(Select::columns(&[SOURCE_FILE]))
            .execute()
            .await
            .storage(|| format!("scanning {collection}"))?;
        let mut sources = BTreeSet::new();
        while let Some(batch) = stream.try_next().await.storage(|| format!("scanning {collection}"))? {
            sources.extend(source_files(&batch)?);
        }
        Ok(sources)
    }

    async fn clear_collection(&self, collection: &str) -> Result<usize> {
        validate_collection_name(collection)?;
        let _life = self.lifecycle.read().await;
        let lock = self.writer_lock(collection);
        let _writer = lock.lock().await;
        let Some(table) = self.open_table(collection).await? else {
            return Ok(0);
        };
        let removed = Self::count_rows(&table, collection, None).await?;
        if removed > 0 {
            table
                .delete(&format!("{ID} IS NOT NULL"))
                .await
                .storage(|| format!("clearing {collection}"))?;
        }
        info!(collection, removed, "cleared collection");
        Ok(removed)
    }

    async fn drop_collection(&self, collection: &str) -> Result<()> {
        validate_collection_name(collection)?;
        let _life = self.lifecycle.read().await;
        let lock = self.writer_lock(collection);
        let _writer = lock.lock().await;
        let Some(table) = self.open_table(collection).await? else {
            return Ok(());
        };
        let schema = table.schema().await.storage(|| format!("reading schema of {collection}"))?;
        drop(table);
        // Recreate the table empty, keeping its schema
        let conn = self.get_connection().await?;
        let empty = RecordBatchIterator::new(vec![].into_iter(), schema);
        conn.create_table(collection, Box::new(empty))
            .mode(CreateTableMode::Overwrite)
            .execute()
            .await
            .storage(|| format!("recreating collection {collection}"))?;
        info!(collection, "dropped collection");
        Ok(())
    }

    async fn reset_all(&self) -> Result<()> {
        let _life = self.lifecycle.write().await;
        self.connection.write().await.take();
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::storage(format!("removing {}: {e}", self.root.display()))),
        }
        tokio::fs::create_dir_all(&self.root)
            .await
            .storage(|| format!("recreating storage root {}", self.root.display()))?;
        info!(root = %self.root.display(), "storage reset");
        Ok(())
    }
}
