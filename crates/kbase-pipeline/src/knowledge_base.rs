//! The `KnowledgeBase` facade: one embedder, one collection store, and the
//! settings both pipelines share. Administration lives here too.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::info;

use kbase_core::config::{RetrySettings, Settings, TimeoutSettings};
use kbase_core::types::validate_collection_name;
use kbase_core::{Chunker, DocumentLoader, Embedder, Error, MetadataFilter, Result, VectorIndex};
use kbase_embed::get_default_embedder;
use kbase_vector::LanceCollectionStore;

use crate::answer::{AnswerGenerator, ChatCompletionsAnswerer};
use crate::retry::{retry, with_timeout};

pub struct KnowledgeBase {
    pub(crate) embedder: Arc<dyn Embedder>,
    pub(crate) index: Arc<dyn VectorIndex>,
    pub(crate) loader: Arc<DocumentLoader>,
    pub(crate) chunker: Chunker,
    pub(crate) answerer: Option<Arc<dyn AnswerGenerator>>,
    pub(crate) default_collection: String,
    pub(crate) top_k: usize,
    pub(crate) batch_size: usize,
    pub(crate) max_concurrency: usize,
    pub(crate) timeouts: TimeoutSettings,
    pub(crate) retry: RetrySettings,
}

impl KnowledgeBase {
    pub fn new(settings: &Settings, embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Result<Self> {
        settings.validate()?;
        let answerer = ChatCompletionsAnswerer::from_settings(&settings.answer)
            .map(|a| Arc::new(a) as Arc<dyn AnswerGenerator>);
        Ok(Self {
            embedder,
            index,
            loader: Arc::new(DocumentLoader::from_settings(&settings.loader)?),
            chunker: Chunker::from_settings(&settings.chunking)?,
            answerer,
            default_collection: settings.default_collection.clone(),
            top_k: settings.top_k,
            batch_size: settings.embedding.batch_size,
            max_concurrency: settings.embedding.max_concurrency,
            timeouts: settings.timeouts.clone(),
            retry: settings.retry.clone(),
        })
    }

    /// The configured embedder over a LanceDB store at `storage_root`.
    pub fn open(settings: &Settings) -> Result<Self> {
        let embedder = get_default_embedder(&settings.embedding)?;
        info!(model = embedder.model_id(), root = %settings.storage_root.display(), "opening knowledge base");
        let index = Arc::new(LanceCollectionStore::new(settings.storage_root.clone()));
        Self::new(settings, embedder, index)
    }

    #[must_use]
    pub fn with_answerer(mut self, answerer: Arc<dyn AnswerGenerator>) -> Self {
        self.answerer = Some(answerer);
        self
    }

    pub fn default_collection(&self) -> &str { &self.default_collection }

    pub fn embedder(&self) -> &dyn Embedder { self.embedder.as_ref() }

    pub fn answerer(&self) -> Option<&dyn AnswerGenerator> { self.answerer.as_deref() }

    pub(crate) fn resolve_collection(&self, collection: Option<&str>) -> Result<String> {
        let name = collection.map_or(self.default_collection.as_str(), str::trim);
        validate_collection_name(name)?;
        Ok(name.to_string())
    }

    /// Removes every chunk ingested from `source_file`. Zero means nothing matched.
    pub async fn delete_by_source(&self, source_file: &str, collection: Option<&str>) -> Result<usize> {
        let collection = self.resolve_collection(collection)?;
        let source_file = source_file.trim();
        if source_file.is_empty() {
            return Err(Error::InvalidInput("source file name must not be blank".to_string()));
        }
        let filter = MetadataFilter::source_file(source_file);
        let removed = with_timeout("delete", self.timeouts.storage(), self.index.delete_where(&collection, &filter)).await?;
        info!(collection, source_file, removed, "deleted by source");
        Ok(removed)
    }

    pub async fn list_collections(&self) -> Result<BTreeSet<String>> {
        let index = &self.index;
        let after = self.timeouts.storage();
        retry(&self.retry, "list collections", move || with_timeout("list collections", after, index.list_collections())).await
    }

    pub async fn list_sources(&self, collection: Option<&str>) -> Result<BTreeSet<String>> {
        let collection = self.resolve_collection(collection)?;
        let (index, name, after) = (&self.index, collection.as_str(), self.timeouts.storage());
        retry(&self.retry, "list sources", move || with_timeout("list sources", after, index.list_sources(name))).await
    }

    pub async fn count(&self, collection: Option<&str>) -> Result<usize> {
        let collection = self.resolve_collection(collection)?;
        let (index, name, after) = (&self.index, collection.as_str(), self.timeouts.storage());
        retry(&self.retry, "count", move || with_timeout("count", after, index.count(name))).await
    }

    /// Empties the collection but keeps it. Returns how many chunks went.
    pub async fn clear_collection(&self, collection: Option<&str>) -> Result<usize> {
        let collection = self.resolve_collection(collection)?;
        with_timeout("clear", self.timeouts.storage(), self.index.clear_collection(&collection)).await
    }

    /// Deletes the collection and recreates it empty.
    pub async fn drop_collection(&self, collection: Option<&str>) -> Result<()> {
        let collection = self.resolve_collection(collection)?;
        with_timeout("drop", self.timeouts.storage(), self.index.drop_collection(&collection)).await
    }

    /// Irrecoverably wipes every collection. Confirmation is the caller's job.
    pub async fn reset_storage(&self) -> Result<()> {
        with_timeout("reset", self.timeouts.storage(), self.index.reset_all()).await
    }
}
