//! Semantic retrieval over indexed episodes.
//!
//! [`Retriever`] pairs an embedder with a vector store and answers the two
//! retrieval questions the pipeline asks: "what is relevant to this free
//! text?" and "what is similar to this episode?" (excluding the episode
//! itself).

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::store::{ContextChunk, SearchOptions, VectorStore};

/// High-level retrieval over episode embeddings.
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>) -> Self {
        Self { embedder, store }
    }

    /// Retrieve top-K context for a free-text query.
    pub async fn retrieve_context_for_query(
        &self,
        ctx: &CancellationToken,
        query: &str,
        top_k: usize,
        opts: &SearchOptions,
    ) -> Result<Vec<ContextChunk>> {
        if query.trim().is_empty() {
            return Err(Error::InvalidInput("query cannot be empty".to_string()));
        }
        if top_k == 0 {
            return Err(Error::InvalidInput("top_k must be positive".to_string()));
        }

        let records = self.embedder.embed(ctx, &[query.to_string()]).await?;
        let record = records
            .into_iter()
            .next()
            .ok_or_else(|| Error::EmbeddingFailed("no embedding generated for query".to_string()))?;

        self.store.search(ctx, &record.embedding, top_k, opts).await
    }

    /// Retrieve the top-K episodes most similar to the given one, excluding
    /// the episode itself.
    ///
    /// Fails with [`Error::NotFound`] when the episode has no record in the
    /// store.
    pub async fn retrieve_context_for_episode(
        &self,
        ctx: &CancellationToken,
        episode_id: &str,
        top_k: usize,
        opts: &SearchOptions,
    ) -> Result<Vec<ContextChunk>> {
        if episode_id.is_empty() {
            return Err(Error::InvalidInput("episode id cannot be empty".to_string()));
        }
        if top_k == 0 {
            return Err(Error::InvalidInput("top_k must be positive".to_string()));
        }

        let existence = self.store.query(ctx, &[episode_id.to_string()]).await?;
        if !existence.get(episode_id).copied().unwrap_or(false) {
            return Err(Error::NotFound(episode_id.to_string()));
        }

        // Read the stored summary text back to use as the query.
        let own_filter = SearchOptions {
            episode_ids: vec![episode_id.to_string()],
        };
        let own_chunks = self.store.search(ctx, &[], 1, &own_filter).await?;
        let own = own_chunks
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound(episode_id.to_string()))?;

        let records = self.embedder.embed(ctx, &[own.text]).await?;
        let record = records.into_iter().next().ok_or_else(|| {
            Error::EmbeddingFailed("no embedding generated for episode text".to_string())
        })?;

        // The search must not be re-filtered to the target episode; one
        // extra result covers the episode matching itself.
        let search_opts = SearchOptions {
            episode_ids: opts
                .episode_ids
                .iter()
                .filter(|id| id.as_str() != episode_id)
                .cloned()
                .collect(),
        };
        let chunks = self
            .store
            .search(ctx, &record.embedding, top_k + 1, &search_opts)
            .await?;

        let mut filtered = Vec::with_capacity(top_k);
        for chunk in chunks {
            if chunk.episode_id == episode_id {
                continue;
            }
            filtered.push(chunk);
            if filtered.len() >= top_k {
                break;
            }
        }
        Ok(filtered)
    }

    /// Convenience wrapper: query retrieval restricted to a set of episode
    /// identities.
    pub async fn retrieve_context_for_query_with_filters(
        &self,
        ctx: &CancellationToken,
        query: &str,
        top_k: usize,
        episode_ids: &[String],
    ) -> Result<Vec<ContextChunk>> {
        let opts = SearchOptions {
            episode_ids: episode_ids.to_vec(),
        };
        self.retrieve_context_for_query(ctx, query, top_k, &opts).await
    }

    /// Retrieve context for several episodes. A failure for one identity
    /// records an empty list and moves on; cancellation propagates.
    pub async fn retrieve_multiple_episodes(
        &self,
        ctx: &CancellationToken,
        episode_ids: &[String],
        top_k: usize,
        opts: &SearchOptions,
    ) -> Result<HashMap<String, Vec<ContextChunk>>> {
        let mut results = HashMap::with_capacity(episode_ids.len());
        for episode_id in episode_ids {
            match self
                .retrieve_context_for_episode(ctx, episode_id, top_k, opts)
                .await
            {
                Ok(chunks) => {
                    results.insert(episode_id.clone(), chunks);
                }
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) => {
                    debug!(episode_id = %episode_id, error = %err, "episode retrieval failed");
                    results.insert(episode_id.clone(), Vec::new());
                }
            }
        }
        Ok(results)
    }
}
