//! Ingestion, query and administration pipelines over a pluggable embedder
//! and collection store.
//!
//! ```no_run
//! # async fn demo() -> kbase_core::Result<()> {
//! use kbase_core::config::Config;
//! use kbase_pipeline::KnowledgeBase;
//!
//! let settings = Config::load()?.settings()?;
//! let kb = KnowledgeBase::open(&settings)?;
//! kb.ingest(std::path::Path::new("notes/solar.md"), None, None).await?;
//! for hit in kb.query("battery sizing", None, Some(3)).await? {
//!     println!("{:.3} {}", hit.similarity(), hit.metadata.source_file);
//! }
//! # Ok(())
//! # }
//! ```

pub mod answer;
mod ingest;
mod knowledge_base;
mod query;
pub mod retry;

pub use answer::{excerpts_answer, format_context, AnswerGenerator, ChatCompletionsAnswerer};
pub use ingest::display_name;
pub use knowledge_base::KnowledgeBase;
pub use query::Answer;
