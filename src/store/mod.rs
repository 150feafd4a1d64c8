//! Vector store abstraction.
//!
//! One collection keyed by episode identity, holding one record per
//! (episode, text) pair with aggregate metadata. The contract:
//!
//! | Operation | Semantics |
//! |-----------|-----------|
//! | `insert` | persist records; duplicates per episode allowed; empty input is a no-op |
//! | `flush` | after return, searches observe all prior inserts |
//! | `search` | cosine ANN, `top_k ≥ 1`, optional episode-id disjunction filter, descending score |
//! | `query` | existence map per episode id; missing ids map to false |
//! | `delete` | remove all records for the given ids; empty input is a no-op |
//! | `close` | release the connection; stores are closed on every exit path |
//!
//! An empty query vector is a metadata fetch: with a filter set it returns
//! the matching records unscored, which the retriever uses to read an
//! episode's stored text back.
//!
//! [`MilvusConfig`] documents the persistent collection layout and reads
//! the `MILVUS_*` environment. The gRPC driver itself is an external
//! collaborator; [`memory::InMemoryStore`] is the in-tree implementation.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// One persisted record: an episode's summary text, its embedding, and the
/// aggregate metadata stored alongside.
#[derive(Debug, Clone)]
pub struct EpisodeRecord {
    pub episode_id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub authors: Vec<String>,
    pub commit_count: usize,
    pub file_count: usize,
}

/// A record returned by similarity search, with its score.
#[derive(Debug, Clone)]
pub struct ContextChunk {
    pub episode_id: String,
    pub text: String,
    /// Cosine similarity to the query vector.
    pub score: f32,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub authors: Vec<String>,
    pub commit_count: usize,
    pub file_count: usize,
}

/// Filtering options for search.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Restrict results to this disjunction of episode identities.
    pub episode_ids: Vec<String>,
}

/// Storage and similarity search for episode embeddings.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Persist records. Empty input is a no-op.
    async fn insert(&self, ctx: &CancellationToken, records: &[EpisodeRecord]) -> Result<()>;

    /// Make all prior inserts visible to subsequent searches.
    async fn flush(&self, ctx: &CancellationToken) -> Result<()>;

    /// Top-K cosine similarity search. The query vector's dimension must
    /// match the collection's; an empty query vector performs an unscored
    /// metadata fetch.
    async fn search(
        &self,
        ctx: &CancellationToken,
        query_vector: &[f32],
        top_k: usize,
        opts: &SearchOptions,
    ) -> Result<Vec<ContextChunk>>;

    /// Which of the given episode identities have at least one record.
    async fn query(
        &self,
        ctx: &CancellationToken,
        episode_ids: &[String],
    ) -> Result<std::collections::HashMap<String, bool>>;

    /// Remove all records for the given identities. Empty input is a no-op.
    async fn delete(&self, ctx: &CancellationToken, episode_ids: &[String]) -> Result<()>;

    /// Collection statistics; at least `row_count`.
    async fn stats(
        &self,
        ctx: &CancellationToken,
    ) -> Result<std::collections::HashMap<String, i64>>;

    /// Release the underlying connection.
    async fn close(&self) -> Result<()>;
}

/// Connection and collection parameters for a Milvus-backed store.
///
/// The collection schema is: auto-id `id` (int64 primary key),
/// `episode_id` (varchar 64), `text` (varchar 65535), `embedding` (float
/// vector of `dimension`), `start_date`/`end_date` (int64 unix seconds),
/// `authors` (varchar 1024, comma-joined), `commit_count`/`file_count`
/// (int64), with an HNSW index on `embedding` under cosine similarity.
#[derive(Debug, Clone)]
pub struct MilvusConfig {
    /// Server address, e.g. `"localhost:19530"`.
    pub address: String,
    pub collection_name: String,
    /// Vector dimension (e.g. 3072 for `text-embedding-3-large`).
    pub dimension: usize,
    pub index_type: String,
    pub metric_type: String,
    /// HNSW graph degree.
    pub m: usize,
    /// HNSW construction beam width.
    pub ef_construction: usize,
}

impl MilvusConfig {
    /// Defaults from the environment: `MILVUS_ADDRESS` (default
    /// `localhost:19530`) and `MILVUS_COLLECTION` (default
    /// `thunk_episodes`).
    pub fn from_env() -> Self {
        let address = std::env::var("MILVUS_ADDRESS")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "localhost:19530".to_string());
        let collection_name = std::env::var("MILVUS_COLLECTION")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "thunk_episodes".to_string());

        Self {
            address,
            collection_name,
            dimension: 3072,
            index_type: "HNSW".to_string(),
            metric_type: "COSINE".to_string(),
            m: 16,
            ef_construction: 256,
        }
    }
}
