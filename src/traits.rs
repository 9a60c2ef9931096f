//! Embedding provider trait.
//!
//! The workflows only ever need one thing from an AI service: turn a batch
//! of strings into vectors. Providers report the prompt tokens the service
//! billed so callers can estimate cost.

use async_trait::async_trait;

use crate::error::{Result, VectorSearchError};

/// Vectors returned for one embedding request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddingBatch {
    /// One vector per input text, in input order.
    pub vectors: Vec<Vec<f32>>,
    /// Prompt tokens reported by the service (0 when unknown).
    pub prompt_tokens: u64,
}

impl EmbeddingBatch {
    pub fn new(vectors: Vec<Vec<f32>>, prompt_tokens: u64) -> Self {
        Self {
            vectors,
            prompt_tokens,
        }
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Dimension of the first vector, if any.
    pub fn dimension(&self) -> Option<usize> {
        self.vectors.first().map(Vec::len)
    }
}

/// Trait for embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Get the name of this provider.
    fn name(&self) -> &str;

    /// Get the embedding model (deployment name for Azure).
    fn model(&self) -> &str;

    /// Get the expected dimension of the embeddings.
    fn dimension(&self) -> usize;

    /// Get the maximum number of tokens per input.
    fn max_tokens(&self) -> usize;

    /// Generate embeddings for a batch of texts.
    async fn embed(&self, texts: &[String]) -> Result<EmbeddingBatch>;

    /// Generate the embedding for a single text.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let batch = self.embed(&[text.to_string()]).await?;
        batch
            .vectors
            .into_iter()
            .next()
            .ok_or_else(|| VectorSearchError::ApiError("Empty embedding result".to_string()))
    }
}
