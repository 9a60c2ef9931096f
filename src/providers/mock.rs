//! Mock embedding provider for testing.
//!
//! Vectors are derived from a hash of the input text, so the same text
//! always maps to the same unit-length vector and no network is needed.
//! Failures can be queued to exercise retry paths.

use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::{Result, VectorSearchError};
use crate::traits::{EmbeddingBatch, EmbeddingProvider};

/// Deterministic embedding provider.
#[derive(Debug, Clone)]
pub struct MockEmbedder {
    dimension: usize,
    calls: Arc<Mutex<Vec<Vec<String>>>>,
    call_count: Arc<AtomicUsize>,
    failures: Arc<Mutex<VecDeque<VectorSearchError>>>,
}

impl MockEmbedder {
    /// Create a mock producing vectors of `dimension` components.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            calls: Arc::new(Mutex::new(Vec::new())),
            call_count: Arc::new(AtomicUsize::new(0)),
            failures: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Queue an error returned by the next call (before any success).
    pub async fn fail_next(&self, error: VectorSearchError) {
        self.failures.lock().await.push_back(error);
    }

    /// Number of `embed` calls made, including failed ones.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Inputs of every successful call, in order.
    pub async fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().await.clone()
    }

    /// The vector this mock returns for `text`.
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let mut state = hasher.finish() | 1;

        // xorshift64
        let mut raw: Vec<f32> = (0..self.dimension)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                (state % 2000) as f32 / 1000.0 - 1.0
            })
            .collect();

        let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            raw.iter_mut().for_each(|x| *x /= norm);
        }
        raw
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new(8)
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-embedding"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn max_tokens(&self) -> usize {
        8191
    }

    async fn embed(&self, texts: &[String]) -> Result<EmbeddingBatch> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failures.lock().await.pop_front() {
            return Err(error);
        }

        self.calls.lock().await.push(texts.to_vec());
        let vectors = texts.iter().map(|t| self.vector_for(t)).collect();
        // whitespace word count stands in for tokens
        let tokens = texts.iter().map(|t| t.split_whitespace().count() as u64).sum();
        Ok(EmbeddingBatch::new(vectors, tokens))
    }
}
