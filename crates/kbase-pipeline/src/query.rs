//! Query pipeline and answer synthesis.
//!
//! Queries are fail-soft towards storage: a collection that cannot be opened
//! or searched yields no hits. Embedding failures and dimension mismatches
//! still surface, since those mean the query itself cannot be answered.

use serde::Serialize;
use tracing::{debug, warn};

use kbase_core::{Error, Result, SearchHit};

use crate::answer::excerpts_answer;
use crate::knowledge_base::KnowledgeBase;
use crate::retry::{retry, with_timeout};

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<SearchHit>,
    /// False when `text` is the retrieved excerpts rather than model output.
    pub synthesized: bool,
}

impl KnowledgeBase {
    /// Up to `k` chunks nearest to `question`, nearest first. `k` defaults to
    /// the configured `top_k`.
    pub async fn query(&self, question: &str, collection: Option<&str>, k: Option<usize>) -> Result<Vec<SearchHit>> {
        let collection = self.resolve_collection(collection)?;
        let k = k.unwrap_or(self.top_k);
        if question.trim().is_empty() {
            return Err(Error::InvalidInput("question must not be blank".to_string()));
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let (index, name, after) = (&self.index, collection.as_str(), self.timeouts.storage());
        match retry(&self.retry, "count", move || with_timeout("count", after, index.count(name))).await {
            Ok(0) => {
                debug!(collection, "collection is empty or missing");
                return Ok(Vec::new());
            }
            Ok(_) => {}
            Err(e) => {
                warn!(collection, error = %e, "collection unavailable, returning no results");
                return Ok(Vec::new());
            }
        }

        let vector = self
            .embed_texts(vec![question.to_string()])
            .await?
            .pop()
            .ok_or_else(|| Error::embedding("embedder returned no vector"))?;

        let query = vector.as_slice();
        match retry(&self.retry, "search", move || with_timeout("search", after, index.search(name, query, k))).await {
            Ok(hits) => {
                debug!(collection, k, found = hits.len(), "query answered");
                Ok(hits)
            }
            Err(e @ Error::DimensionMismatch { .. }) => Err(e),
            Err(e) => {
                warn!(collection, error = %e, "search failed, returning no results");
                Ok(Vec::new())
            }
        }
    }

    /// Retrieves context for `question` and, when a model is configured,
    /// asks it for an answer. Otherwise the excerpts themselves are returned.
    pub async fn ask(&self, question: &str, collection: Option<&str>, k: Option<usize>) -> Result<Answer> {
        let hits = self.query(question, collection, k).await?;
        let Some(answerer) = self.answerer.as_deref().filter(|_| !hits.is_empty()) else {
            return Ok(Answer { text: excerpts_answer(&hits), sources: hits, synthesized: false });
        };
        let (context, after) = (hits.as_slice(), self.timeouts.answer());
        let text = retry(&self.retry, "answer", move || with_timeout("answer", after, answerer.answer(question, context)))
            .await?;
        Ok(Answer { text, sources: hits, synthesized: true })
    }
}
