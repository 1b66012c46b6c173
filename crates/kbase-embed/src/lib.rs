//! Embedding providers.
//!
//! [`BgeEmbedder`] runs a local XLM-RoBERTa sentence model with candle.
//! [`HashedEmbedder`] is a deterministic stand-in used by tests and by
//! setups without model files.

mod hashed;
mod model;
mod pool;
mod tokenize;

use std::sync::Arc;

use tracing::info;

use kbase_core::config::{EmbeddingProvider, EmbeddingSettings};
use kbase_core::{Embedder, Error};

pub use hashed::HashedEmbedder;
pub use model::{resolve_model_dir, select_device, BgeEmbedder};
pub use pool::masked_mean_l2;
pub use tokenize::tokenize_batch;

/// Builds the embedder the settings ask for.
pub fn get_default_embedder(settings: &EmbeddingSettings) -> kbase_core::Result<Arc<dyn Embedder>> {
    match settings.provider {
        EmbeddingProvider::Hashed => {
            info!(dim = settings.dim, "using hashed embedder");
            Ok(Arc::new(HashedEmbedder::new(settings.dim)?))
        }
        EmbeddingProvider::Local => {
            let dir = resolve_model_dir(settings.model_dir.as_deref()).map_err(|e| Error::InvalidConfig(format!("{e:#}")))?;
            let model = BgeEmbedder::load(&dir, settings.max_len).map_err(|e| Error::embedding(format!("{e:#}")))?;
            Ok(Arc::new(model))
        }
    }
}
