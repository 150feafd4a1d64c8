//! Episode indexing.
//!
//! Embeds episode summaries in batches and stores them in the vector
//! store. Re-index behavior is controlled by [`IndexOptions`]:
//! `force_reindex` deletes the batch's identities first, `skip_existing`
//! filters already-present episodes out (and conservatively proceeds with
//! all of them when the existence query itself fails).

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::store::{EpisodeRecord, VectorStore};
use crate::summarizer::EpisodeSummary;

/// Configuration for [`index_episodes`].
#[derive(Debug, Clone, Copy)]
pub struct IndexOptions {
    /// How many summaries to embed per API call.
    pub batch_size: usize,
    /// Delete and re-insert episodes even if they exist.
    pub force_reindex: bool,
    /// Skip episodes that already have a record.
    pub skip_existing: bool,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            batch_size: 10,
            force_reindex: false,
            skip_existing: true,
        }
    }
}

/// Embed and store episode summaries with at-most-once semantics.
pub async fn index_episodes(
    ctx: &CancellationToken,
    episodes: &[EpisodeSummary],
    embedder: &dyn Embedder,
    store: &dyn VectorStore,
    opts: &IndexOptions,
) -> Result<()> {
    if episodes.is_empty() {
        return Ok(());
    }

    let all_ids: Vec<String> = episodes.iter().map(|e| e.episode_id.clone()).collect();

    if opts.force_reindex {
        debug!(count = all_ids.len(), "force reindex: deleting existing records");
        store.delete(ctx, &all_ids).await?;
    }

    let mut to_index: Vec<&EpisodeSummary> = episodes.iter().collect();
    if opts.skip_existing && !opts.force_reindex {
        match store.query(ctx, &all_ids).await {
            Ok(existence) => {
                to_index.retain(|e| !existence.get(&e.episode_id).copied().unwrap_or(false));
            }
            Err(err) if err.is_cancelled() => return Err(err),
            Err(err) => {
                // Existence is unknown; index everything rather than drop.
                warn!(error = %err, "existence query failed, indexing all episodes");
            }
        }
    }

    if to_index.is_empty() {
        info!("all episodes already indexed");
        return Ok(());
    }

    let batch_size = opts.batch_size.max(1);
    let mut batch_start = 0;
    while batch_start < to_index.len() {
        let batch_end = (batch_start + batch_size).min(to_index.len());
        let batch = &to_index[batch_start..batch_end];

        let texts: Vec<String> = batch.iter().map(|e| e.summary.clone()).collect();
        let embeddings = embedder
            .embed(ctx, &texts)
            .await
            .map_err(|e| wrap_batch_error(e, batch_start))?;

        let records: Vec<EpisodeRecord> = batch
            .iter()
            .zip(embeddings)
            .map(|(episode, record)| EpisodeRecord {
                episode_id: episode.episode_id.clone(),
                text: record.text,
                embedding: record.embedding,
                start_date: episode.start_date,
                end_date: episode.end_date,
                authors: episode.authors.clone(),
                commit_count: episode.commit_count,
                file_count: episode.file_count,
            })
            .collect();

        store
            .insert(ctx, &records)
            .await
            .map_err(|e| wrap_batch_error(e, batch_start))?;
        store
            .flush(ctx)
            .await
            .map_err(|e| wrap_batch_error(e, batch_start))?;

        batch_start = batch_end;
    }

    info!(count = to_index.len(), "indexed episodes");
    Ok(())
}

/// Attach the offending batch's start index; cancellation passes through
/// untouched so it stays detectable.
fn wrap_batch_error(err: Error, batch_start: usize) -> Error {
    match err {
        Error::Cancelled(stage) => Error::Cancelled(stage),
        Error::EmbeddingFailed(m) => {
            Error::EmbeddingFailed(format!("batch starting at {batch_start}: {m}"))
        }
        Error::InsertFailed(m) => {
            Error::InsertFailed(format!("batch starting at {batch_start}: {m}"))
        }
        other => Error::InsertFailed(format!("batch starting at {batch_start}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use crate::store::SearchOptions;
    use crate::testutil::MockEmbedder;
    use async_trait::async_trait;
    use std::collections::HashMap;

    fn summary(id: &str, text: &str) -> EpisodeSummary {
        EpisodeSummary {
            episode_id: id.to_string(),
            title: text.to_string(),
            summary: text.to_string(),
            start_date: None,
            end_date: None,
            authors: vec!["alice".to_string()],
            commit_count: 2,
            file_count: 3,
        }
    }

    fn ctx() -> CancellationToken {
        CancellationToken::new()
    }

    #[tokio::test]
    async fn empty_input_is_a_noop() {
        let store = InMemoryStore::new(4);
        let embedder = MockEmbedder::new(4);
        index_episodes(&ctx(), &[], &embedder, &store, &IndexOptions::default())
            .await
            .unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn indexes_summaries_with_metadata() {
        let store = InMemoryStore::new(4);
        let embedder = MockEmbedder::new(4);
        let episodes = vec![summary("E1", "auth work"), summary("E2", "parser work")];

        index_episodes(&ctx(), &episodes, &embedder, &store, &IndexOptions::default())
            .await
            .unwrap();
        assert_eq!(store.len(), 2);

        let opts = SearchOptions {
            episode_ids: vec!["E1".to_string()],
        };
        let chunks = store.search(&ctx(), &[], 1, &opts).await.unwrap();
        assert_eq!(chunks[0].text, "auth work");
        assert_eq!(chunks[0].commit_count, 2);
        assert_eq!(chunks[0].file_count, 3);
        assert_eq!(chunks[0].authors, vec!["alice"]);
    }

    #[tokio::test]
    async fn skip_existing_filters_present_episodes() {
        let store = InMemoryStore::new(4);
        let embedder = MockEmbedder::new(4);
        let episodes = vec![summary("E1", "first")];

        index_episodes(&ctx(), &episodes, &embedder, &store, &IndexOptions::default())
            .await
            .unwrap();
        index_episodes(&ctx(), &episodes, &embedder, &store, &IndexOptions::default())
            .await
            .unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn force_reindex_replaces_records() {
        let store = InMemoryStore::new(4);
        let embedder = MockEmbedder::new(4);

        index_episodes(
            &ctx(),
            &[summary("E1", "old text")],
            &embedder,
            &store,
            &IndexOptions::default(),
        )
        .await
        .unwrap();

        let opts = IndexOptions {
            force_reindex: true,
            ..IndexOptions::default()
        };
        index_episodes(&ctx(), &[summary("E1", "new text")], &embedder, &store, &opts)
            .await
            .unwrap();

        assert_eq!(store.len(), 1);
        let filter = SearchOptions {
            episode_ids: vec!["E1".to_string()],
        };
        let chunks = store.search(&ctx(), &[], 1, &filter).await.unwrap();
        assert_eq!(chunks[0].text, "new text");
    }

    /// Store whose existence query always fails but otherwise delegates.
    struct FlakyQueryStore(InMemoryStore);

    #[async_trait]
    impl VectorStore for FlakyQueryStore {
        async fn insert(&self, ctx: &CancellationToken, records: &[EpisodeRecord]) -> crate::error::Result<()> {
            self.0.insert(ctx, records).await
        }
        async fn flush(&self, ctx: &CancellationToken) -> crate::error::Result<()> {
            self.0.flush(ctx).await
        }
        async fn search(
            &self,
            ctx: &CancellationToken,
            query_vector: &[f32],
            top_k: usize,
            opts: &SearchOptions,
        ) -> crate::error::Result<Vec<crate::store::ContextChunk>> {
            self.0.search(ctx, query_vector, top_k, opts).await
        }
        async fn query(
            &self,
            _ctx: &CancellationToken,
            _episode_ids: &[String],
        ) -> crate::error::Result<HashMap<String, bool>> {
            Err(Error::SearchFailed("query endpoint down".to_string()))
        }
        async fn delete(&self, ctx: &CancellationToken, episode_ids: &[String]) -> crate::error::Result<()> {
            self.0.delete(ctx, episode_ids).await
        }
        async fn stats(
            &self,
            ctx: &CancellationToken,
        ) -> crate::error::Result<HashMap<String, i64>> {
            self.0.stats(ctx).await
        }
        async fn close(&self) -> crate::error::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn query_failure_proceeds_with_all_episodes() {
        let store = FlakyQueryStore(InMemoryStore::new(4));
        let embedder = MockEmbedder::new(4);
        let episodes = vec![summary("E1", "a"), summary("E2", "b")];

        index_episodes(&ctx(), &episodes, &embedder, &store, &IndexOptions::default())
            .await
            .unwrap();
        assert_eq!(store.0.len(), 2);
    }

    #[tokio::test]
    async fn batches_split_by_batch_size() {
        let store = InMemoryStore::new(4);
        let embedder = MockEmbedder::new(4);
        let episodes: Vec<EpisodeSummary> = (0..25)
            .map(|i| summary(&format!("E{i}"), &format!("work {i}")))
            .collect();

        let opts = IndexOptions {
            batch_size: 10,
            ..IndexOptions::default()
        };
        index_episodes(&ctx(), &episodes, &embedder, &store, &opts)
            .await
            .unwrap();
        assert_eq!(store.len(), 25);
        assert_eq!(embedder.calls(), 3);
    }

    #[tokio::test]
    async fn embed_failure_names_batch_start() {
        let store = InMemoryStore::new(4);
        let embedder = MockEmbedder::failing(4, 1);
        let episodes: Vec<EpisodeSummary> = (0..15)
            .map(|i| summary(&format!("E{i}"), &format!("work {i}")))
            .collect();

        let err = index_episodes(&ctx(), &episodes, &embedder, &store, &IndexOptions::default())
            .await
            .unwrap_err();
        match err {
            Error::EmbeddingFailed(message) => assert!(message.contains("batch starting at 10")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
