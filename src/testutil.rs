//! Deterministic test doubles shared by unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::embedding::{Embedder, EmbeddingRecord};
use crate::error::{Error, Result};

/// Offline embedder: hashes character bigrams into a fixed number of
/// buckets, so identical texts get identical vectors and overlapping texts
/// get correlated ones.
pub(crate) struct MockEmbedder {
    dims: usize,
    calls: AtomicUsize,
    /// When set, the n-th `embed` call (0-based) fails.
    fail_on_call: Option<usize>,
}

impl MockEmbedder {
    pub(crate) fn new(dims: usize) -> Self {
        Self {
            dims,
            calls: AtomicUsize::new(0),
            fail_on_call: None,
        }
    }

    /// An embedder that fails on the given (0-based) call number.
    pub(crate) fn failing(dims: usize, fail_on_call: usize) -> Self {
        Self {
            dims,
            calls: AtomicUsize::new(0),
            fail_on_call: Some(fail_on_call),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];
        let bytes = text.as_bytes();
        for window in bytes.windows(2) {
            let bucket = (usize::from(window[0]) * 31 + usize::from(window[1])) % self.dims;
            vector[bucket] += 1.0;
        }
        if bytes.len() < 2 && !bytes.is_empty() {
            vector[usize::from(bytes[0]) % self.dims] += 1.0;
        }
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(
        &self,
        ctx: &CancellationToken,
        texts: &[String],
    ) -> Result<Vec<EmbeddingRecord>> {
        if ctx.is_cancelled() {
            return Err(Error::Cancelled("embedding"));
        }
        if texts.is_empty() {
            return Err(Error::EmptyInput("texts"));
        }

        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on_call == Some(call) {
            return Err(Error::EmbeddingFailed("mock failure".to_string()));
        }

        Ok(texts
            .iter()
            .enumerate()
            .map(|(index, text)| EmbeddingRecord {
                text: text.clone(),
                embedding: self.vector_for(text),
                index,
                model: "mock-embedder".to_string(),
            })
            .collect())
    }

    fn model_name(&self) -> &str {
        "mock-embedder"
    }

    fn dims(&self) -> usize {
        self.dims
    }
}
