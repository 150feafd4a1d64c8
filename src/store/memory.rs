//! In-memory [`VectorStore`] implementation.
//!
//! Records live in a `Vec` behind `std::sync::RwLock`; search is
//! brute-force cosine similarity over all stored vectors. Used by the CLI
//! (each run indexes the episodes it just built) and by tests.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::embedding::cosine_similarity;
use crate::error::{Error, Result};

use super::{ContextChunk, EpisodeRecord, SearchOptions, VectorStore};

/// Brute-force in-memory episode store.
pub struct InMemoryStore {
    dimension: usize,
    records: RwLock<Vec<EpisodeRecord>>,
}

impl InMemoryStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            records: RwLock::new(Vec::new()),
        }
    }

    /// Number of stored records, for tests and diagnostics.
    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn check_cancelled(ctx: &CancellationToken, stage: &'static str) -> Result<()> {
    if ctx.is_cancelled() {
        return Err(Error::Cancelled(stage));
    }
    Ok(())
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn insert(&self, ctx: &CancellationToken, records: &[EpisodeRecord]) -> Result<()> {
        check_cancelled(ctx, "vector-store insert")?;
        if records.is_empty() {
            return Ok(());
        }
        for record in records {
            if record.embedding.len() != self.dimension {
                return Err(Error::InsertFailed(format!(
                    "dimension mismatch: expected {}, got {}",
                    self.dimension,
                    record.embedding.len()
                )));
            }
        }
        self.records.write().unwrap().extend_from_slice(records);
        Ok(())
    }

    async fn flush(&self, ctx: &CancellationToken) -> Result<()> {
        // Inserts are immediately visible; flush only honors cancellation.
        check_cancelled(ctx, "vector-store flush")
    }

    async fn search(
        &self,
        ctx: &CancellationToken,
        query_vector: &[f32],
        top_k: usize,
        opts: &SearchOptions,
    ) -> Result<Vec<ContextChunk>> {
        check_cancelled(ctx, "vector-store search")?;
        if top_k == 0 {
            return Err(Error::InvalidInput("top_k must be at least 1".to_string()));
        }
        if !query_vector.is_empty() && query_vector.len() != self.dimension {
            return Err(Error::InvalidInput(format!(
                "query vector dimension mismatch: expected {}, got {}",
                self.dimension,
                query_vector.len()
            )));
        }

        let records = self.records.read().unwrap();
        let mut chunks: Vec<ContextChunk> = records
            .iter()
            .filter(|r| opts.episode_ids.is_empty() || opts.episode_ids.contains(&r.episode_id))
            .map(|r| ContextChunk {
                episode_id: r.episode_id.clone(),
                text: r.text.clone(),
                score: if query_vector.is_empty() {
                    0.0
                } else {
                    cosine_similarity(query_vector, &r.embedding)
                },
                start_date: r.start_date,
                end_date: r.end_date,
                authors: r.authors.clone(),
                commit_count: r.commit_count,
                file_count: r.file_count,
            })
            .collect();

        chunks.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        chunks.truncate(top_k);
        Ok(chunks)
    }

    async fn query(
        &self,
        ctx: &CancellationToken,
        episode_ids: &[String],
    ) -> Result<HashMap<String, bool>> {
        check_cancelled(ctx, "vector-store query")?;
        let records = self.records.read().unwrap();
        let mut existence: HashMap<String, bool> = episode_ids
            .iter()
            .map(|id| (id.clone(), false))
            .collect();
        for record in records.iter() {
            if let Some(entry) = existence.get_mut(&record.episode_id) {
                *entry = true;
            }
        }
        Ok(existence)
    }

    async fn delete(&self, ctx: &CancellationToken, episode_ids: &[String]) -> Result<()> {
        check_cancelled(ctx, "vector-store delete")?;
        if episode_ids.is_empty() {
            return Ok(());
        }
        self.records
            .write()
            .unwrap()
            .retain(|r| !episode_ids.contains(&r.episode_id));
        Ok(())
    }

    async fn stats(&self, ctx: &CancellationToken) -> Result<HashMap<String, i64>> {
        check_cancelled(ctx, "vector-store stats")?;
        let mut stats = HashMap::new();
        stats.insert("row_count".to_string(), self.len() as i64);
        Ok(stats)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
