//! Embedding creation pipeline.
//!
//! Reads raw hotel documents, embeds one text field in fixed-size batches
//! and writes the documents back out with a vector field added.

use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::Settings;
use crate::cost_tracker::SessionCostTracker;
use crate::documents::{document_label, read_documents, text_field, write_documents, JsonDocument};
use crate::error::Result;
use crate::retry::RetryExecutor;
use crate::traits::EmbeddingProvider;

/// Pause between embedding batches.
pub const BATCH_DELAY: Duration = Duration::from_secs(1);

/// Outcome of one embedding run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddingRunSummary {
    /// Documents read.
    pub total: usize,
    /// Documents that received a vector.
    pub embedded: usize,
    /// Documents skipped because the text field was missing or empty.
    pub skipped: usize,
    /// Batches processed.
    pub batches: usize,
    /// Length of the produced vectors.
    pub dimensions: Option<usize>,
    /// Prompt tokens billed by the service.
    pub prompt_tokens: u64,
    /// Estimated cost in USD.
    pub estimated_cost: f64,
}

/// Batching loop around an [`EmbeddingProvider`].
pub struct EmbeddingPipeline<'a> {
    provider: &'a dyn EmbeddingProvider,
    field_to_embed: String,
    embedded_field: String,
    batch_size: usize,
    batch_delay: Duration,
    retry: RetryExecutor,
}

impl<'a> EmbeddingPipeline<'a> {
    pub fn new(
        provider: &'a dyn EmbeddingProvider,
        field_to_embed: impl Into<String>,
        embedded_field: impl Into<String>,
        batch_size: usize,
    ) -> Self {
        Self {
            provider,
            field_to_embed: field_to_embed.into(),
            embedded_field: embedded_field.into(),
            batch_size: batch_size.max(1),
            batch_delay: BATCH_DELAY,
            retry: RetryExecutor::new(),
        }
    }

    /// Pipeline configured from the data and embedding settings.
    pub fn from_settings(provider: &'a dyn EmbeddingProvider, settings: &Settings) -> Self {
        Self::new(
            provider,
            settings.data.field_to_embed.clone(),
            settings.data.embedded_field.clone(),
            settings.embedding.batch_size,
        )
    }

    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = delay;
        self
    }

    /// Embed the text field of every document in place, recording each
    /// batch's tokens in `costs`.
    pub async fn embed_documents(
        &self,
        data: &mut [JsonDocument],
        costs: &mut SessionCostTracker,
    ) -> Result<EmbeddingRunSummary> {
        let total_batches = data.len().div_ceil(self.batch_size);
        let mut summary = EmbeddingRunSummary {
            total: data.len(),
            ..Default::default()
        };

        info!(
            documents = data.len(),
            batches = total_batches,
            "Processing documents"
        );

        for (batch_index, batch) in data.chunks_mut(self.batch_size).enumerate() {
            let batch_num = batch_index + 1;
            info!("Processing batch {}/{} ({} documents)", batch_num, total_batches, batch.len());

            let (embedded, tokens) = self.embed_batch(batch).await?;
            summary.embedded += embedded;
            summary.skipped += batch.len() - embedded;
            summary.prompt_tokens += tokens;
            summary.batches += 1;
            if tokens > 0 {
                summary.estimated_cost +=
                    costs.record_embedding(self.provider.model(), "create-embeddings", tokens);
            }

            if batch_num < total_batches {
                sleep(self.batch_delay).await;
            }
        }

        summary.dimensions = data
            .iter()
            .find_map(|doc| doc.get(&self.embedded_field))
            .and_then(|v| v.as_array())
            .map(Vec::len);

        Ok(summary)
    }

    /// Returns the number of documents embedded and the tokens billed.
    async fn embed_batch(&self, batch: &mut [JsonDocument]) -> Result<(usize, u64)> {
        let mut texts = Vec::new();
        let mut positions = Vec::new();

        for (i, doc) in batch.iter().enumerate() {
            match text_field(doc, &self.field_to_embed) {
                Some(text) => {
                    texts.push(text.to_string());
                    positions.push(i);
                }
                None => warn!(
                    "Document {} missing {} field",
                    document_label(doc),
                    self.field_to_embed
                ),
            }
        }

        if texts.is_empty() {
            info!("No texts found to embed in this batch");
            return Ok((0, 0));
        }

        let provider = self.provider;
        let texts = &texts;
        let result = self.retry.execute_auto(|| provider.embed(texts)).await?;

        for (pos, vector) in positions.iter().zip(result.vectors) {
            batch[*pos].insert(self.embedded_field.clone(), serde_json::json!(vector));
        }

        info!("Added embeddings to {} documents in batch", positions.len());
        Ok((positions.len(), result.prompt_tokens))
    }
}

/// Read the input file, embed it and write the output file.
pub async fn create_embeddings(
    provider: &dyn EmbeddingProvider,
    settings: &Settings,
    costs: &mut SessionCostTracker,
) -> Result<EmbeddingRunSummary> {
    let input = &settings.data.input_file;
    info!(path = %input.display(), "Reading input data");
    let mut data = read_documents(input)?;
    info!("Loaded {} documents", data.len());

    let summary = EmbeddingPipeline::from_settings(provider, settings)
        .embed_documents(&mut data, costs)
        .await?;

    write_documents(&data, &settings.data.output_file)?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VectorSearchError;
    use crate::providers::MockEmbedder;
    use serde_json::{json, Value};

    fn docs(n: usize) -> Vec<JsonDocument> {
        (0..n)
            .map(|i| {
                match json!({"HotelId": i.to_string(), "Description": format!("hotel {}", i)}) {
                    Value::Object(map) => map,
                    _ => unreachable!(),
                }
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_and_delays() {
        let mock = MockEmbedder::new(4);
        let pipeline = EmbeddingPipeline::new(&mock, "Description", "DescriptionVector", 2);
        let mut data = docs(5);
        let started = tokio::time::Instant::now();

        let summary = pipeline
            .embed_documents(&mut data, &mut SessionCostTracker::new())
            .await
            .unwrap();

        assert_eq!(summary.total, 5);
        assert_eq!(summary.embedded, 5);
        assert_eq!(summary.batches, 3);
        assert_eq!(summary.dimensions, Some(4));
        assert_eq!(summary.prompt_tokens, 10);
        assert_eq!(mock.call_count(), 3);
        // two pauses, none after the last batch
        assert_eq!(started.elapsed(), Duration::from_secs(2));
        assert_eq!(
            data[3]["DescriptionVector"],
            json!(mock.vector_for("hotel 3"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_text_is_skipped() {
        let mock = MockEmbedder::new(3);
        let pipeline = EmbeddingPipeline::new(&mock, "Description", "DescriptionVector", 10);
        let mut data = docs(3);
        data[1].insert("Description".to_string(), json!(""));
        data[2].remove("Description");

        let summary = pipeline
            .embed_documents(&mut data, &mut SessionCostTracker::new())
            .await
            .unwrap();

        assert_eq!(summary.embedded, 1);
        assert_eq!(summary.skipped, 2);
        assert!(data[0].contains_key("DescriptionVector"));
        assert!(!data[1].contains_key("DescriptionVector"));
        assert_eq!(mock.calls().await, vec![vec!["hotel 0".to_string()]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_without_text_makes_no_call() {
        let mock = MockEmbedder::new(3);
        let pipeline = EmbeddingPipeline::new(&mock, "Missing", "Vec", 16);
        let mut data = docs(4);

        let summary = pipeline
            .embed_documents(&mut data, &mut SessionCostTracker::new())
            .await
            .unwrap();

        assert_eq!(summary.embedded, 0);
        assert_eq!(summary.dimensions, None);
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried() {
        let mock = MockEmbedder::new(3);
        mock.fail_next(VectorSearchError::NetworkError("reset".to_string()))
            .await;
        let pipeline = EmbeddingPipeline::new(&mock, "Description", "DescriptionVector", 16);
        let mut data = docs(2);

        let summary = pipeline
            .embed_documents(&mut data, &mut SessionCostTracker::new())
            .await
            .unwrap();

        assert_eq!(summary.embedded, 2);
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_permanent_failure_aborts() {
        let mock = MockEmbedder::new(3);
        mock.fail_next(VectorSearchError::AuthError("401".to_string()))
            .await;
        let pipeline = EmbeddingPipeline::new(&mock, "Description", "DescriptionVector", 16);
        let mut data = docs(2);

        let err = pipeline
            .embed_documents(&mut data, &mut SessionCostTracker::new())
            .await
            .unwrap_err();
        assert!(matches!(err, VectorSearchError::AuthError(_)));
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_cost_uses_model_pricing() {
        let mock = MockEmbedder::new(2);
        let pipeline = EmbeddingPipeline::new(&mock, "Description", "v", 16)
            .with_batch_delay(Duration::ZERO);
        let mut data = docs(2);
        let mut costs = SessionCostTracker::new();

        let summary = pipeline.embed_documents(&mut data, &mut costs).await.unwrap();
        // 4 words at the ada-002 fallback price
        assert!((summary.estimated_cost - 4.0 * 0.10 / 1_000_000.0).abs() < 1e-12);
        let totals = costs.summary();
        assert_eq!(totals.total_tokens, 4);
        assert_eq!(totals.call_count, 1);
        assert!((totals.by_operation["create-embeddings"] - summary.estimated_cost).abs() < 1e-12);
    }
}
