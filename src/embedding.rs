//! Embedding provider abstraction and the OpenAI implementation.
//!
//! The [`Embedder`] trait is the seam between the pipeline and whatever
//! produces vectors. The OpenAI backend batches texts into a single API
//! call and retries transient failures with exponential backoff:
//!
//! - HTTP 429 and 5xx → retry
//! - other 4xx → fail immediately
//! - network errors → retry
//! - backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped)

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";
const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// A single text embedding with provenance.
#[derive(Debug, Clone)]
pub struct EmbeddingRecord {
    /// The source text that was embedded.
    pub text: String,
    pub embedding: Vec<f32>,
    /// Position of `text` in the request batch.
    pub index: usize,
    /// Model identifier that produced the vector.
    pub model: String,
}

/// Produces fixed-dimensional embeddings for batches of text.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of non-empty texts, returning one record per input in
    /// input order. Empty input fails with [`Error::EmptyInput`].
    async fn embed(
        &self,
        ctx: &CancellationToken,
        texts: &[String],
    ) -> Result<Vec<EmbeddingRecord>>;

    /// Model identifier (e.g. `"text-embedding-3-large"`).
    fn model_name(&self) -> &str;

    /// Embedding dimensionality (e.g. `3072`).
    fn dims(&self) -> usize;
}

/// Embedding provider backed by the OpenAI embeddings API.
pub struct OpenAiEmbedder {
    http: reqwest::Client,
    api_key: String,
    model: String,
    dims: usize,
    max_retries: u32,
}

impl OpenAiEmbedder {
    /// Create a provider reading `OPENAI_API_KEY` from the environment.
    pub fn new(model: impl Into<String>, dims: usize) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or(Error::MissingCredentials("OPENAI_API_KEY"))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::EmbeddingFailed(e.to_string()))?;

        Ok(Self {
            http,
            api_key,
            model: model.into(),
            dims,
            max_retries: DEFAULT_MAX_RETRIES,
        })
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingsDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsDatum {
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(
        &self,
        ctx: &CancellationToken,
        texts: &[String],
    ) -> Result<Vec<EmbeddingRecord>> {
        if texts.is_empty() {
            return Err(Error::EmptyInput("texts"));
        }

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
            "dimensions": self.dims,
            "encoding_format": "float",
        });

        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if ctx.is_cancelled() {
                return Err(Error::Cancelled("embedding"));
            }
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                debug!(attempt, ?delay, "retrying embedding request");
                tokio::select! {
                    _ = ctx.cancelled() => return Err(Error::Cancelled("embedding")),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let request = self
                .http
                .post(OPENAI_EMBEDDINGS_URL)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send();

            let response = tokio::select! {
                _ = ctx.cancelled() => return Err(Error::Cancelled("embedding")),
                response = request => response,
            };

            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let parsed: EmbeddingsResponse = response
                            .json()
                            .await
                            .map_err(|e| Error::EmbeddingFailed(e.to_string()))?;
                        return build_records(texts, parsed, &self.model);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_error = Some(Error::EmbeddingFailed(format!(
                            "provider error {status}: {body_text}"
                        )));
                        continue;
                    }
                    return Err(Error::EmbeddingFailed(format!(
                        "provider error {status}: {body_text}"
                    )));
                }
                Err(e) => {
                    last_error = Some(Error::EmbeddingFailed(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| Error::EmbeddingFailed("retries exhausted".to_string())))
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

fn build_records(
    texts: &[String],
    response: EmbeddingsResponse,
    model: &str,
) -> Result<Vec<EmbeddingRecord>> {
    let mut records: Vec<EmbeddingRecord> = Vec::with_capacity(response.data.len());
    for datum in response.data {
        let text = texts.get(datum.index).cloned().ok_or_else(|| {
            Error::EmbeddingFailed(format!(
                "provider returned index {} for a batch of {}",
                datum.index,
                texts.len()
            ))
        })?;
        records.push(EmbeddingRecord {
            text,
            embedding: datum.embedding,
            index: datum.index,
            model: model.to_string(),
        });
    }
    // Provider order matches input order, but keep it explicit.
    records.sort_by_key(|r| r.index);
    Ok(records)
}

/// Cosine similarity between two vectors; 0 for mismatched or empty input.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}
