//! Core building blocks of the knowledge base: the data model, the error
//! taxonomy, configuration, the document loader and the chunker.
//!
//! Storage and embedding live in their own crates and plug in through the
//! traits in [`traits`].

pub mod cancel;
pub mod chunker;
pub mod config;
pub mod error;
pub mod loader;
pub mod traits;
pub mod types;

pub use cancel::CancelFlag;
pub use chunker::Chunker;
pub use config::Settings;
pub use error::{Error, Result};
pub use loader::{DocumentFormat, DocumentLoader, LoadedDocument, TextSegment};
pub use traits::{Embedder, VectorIndex};
pub use types::{Chunk, ChunkId, ChunkMetadata, MetaValue, MetadataFilter, SearchHit};
