//! Index demonstration workflows.
//!
//! Each demo loads the vectors file into a fresh collection, builds one
//! kind of vector index and runs a few sample queries against it.

use mongodb::bson::Document;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::Settings;
use crate::cost_tracker::SessionCostTracker;
use crate::documents::{documents_with_vectors, read_documents, vector_field, JsonDocument};
use crate::error::{Result, VectorSearchError};
use crate::index::{SearchParams, VectorIndexKind, VectorIndexSpec, DEFAULT_PROJECTION};
use crate::retry::RetryExecutor;
use crate::store::{InsertStats, VectorStore};
use crate::traits::EmbeddingProvider;

/// One sample query and the parameter sets it is run with.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchScenario {
    pub query: &'static str,
    pub description: &'static str,
    pub params: Vec<SearchParams>,
    pub top_k: usize,
}

impl SearchScenario {
    fn new(
        query: &'static str,
        description: &'static str,
        params: Vec<SearchParams>,
        top_k: usize,
    ) -> Self {
        Self {
            query,
            description,
            params,
            top_k,
        }
    }
}

/// Sample queries run after building an index of `kind`.
pub fn scenarios(kind: &VectorIndexKind) -> Vec<SearchScenario> {
    let ivf = |probes: &[u32]| {
        probes
            .iter()
            .map(|&n_probes| SearchParams::Ivf { n_probes })
            .collect::<Vec<_>>()
    };

    match kind {
        VectorIndexKind::Ivf { .. } => vec![
            SearchScenario::new(
                "hotel with pool and spa amenities",
                "Luxury amenities search",
                ivf(&[5, 10, 20]),
                3,
            ),
            SearchScenario::new(
                "budget accommodation with basic facilities",
                "Economy hotel search",
                ivf(&[5, 10]),
                3,
            ),
            SearchScenario::new(
                "extended stay hotel with kitchen facilities",
                "Long-term accommodation",
                ivf(&[10, 15]),
                3,
            ),
        ],
        VectorIndexKind::Hnsw { .. } => vec![SearchScenario::new(
            "quintessential lodging near running trails, eateries, retail",
            "Neighbourhood search",
            vec![SearchParams::Hnsw { ef_search: 16 }],
            5,
        )],
        VectorIndexKind::DiskAnn { .. } => [
            "luxury hotel with pool and spa",
            "budget accommodation downtown",
            "hotel near airport with free parking",
        ]
        .into_iter()
        .map(|query| SearchScenario::new(query, "Sample search", vec![SearchParams::Default], 3))
        .collect(),
    }
}

/// Time given to the service to build the index before querying.
pub fn index_build_wait(kind: &VectorIndexKind) -> Duration {
    match kind {
        VectorIndexKind::Ivf { .. } => Duration::from_secs(3),
        _ => Duration::from_secs(2),
    }
}

/// Results of one query run.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub query: String,
    pub description: String,
    pub params: SearchParams,
    pub top_k: usize,
    pub results: Vec<Document>,
}

/// Everything an index demo produced.
#[derive(Debug, Clone)]
pub struct DemoReport {
    pub index_name: String,
    pub stats: InsertStats,
    pub outcomes: Vec<QueryOutcome>,
    pub query_tokens: u64,
}

/// Load the documents that carry vectors, warning about unexpected sizes.
pub fn load_vector_documents(settings: &Settings) -> Result<Vec<JsonDocument>> {
    let path = &settings.data.output_file;
    let field = &settings.data.embedded_field;
    let data = read_documents(path)?;
    info!("Loaded {} documents from {}", data.len(), path.display());

    let docs = documents_with_vectors(data, field);
    if docs.is_empty() {
        return Err(VectorSearchError::NoData(format!(
            "No documents found with embeddings in field '{}'",
            field
        )));
    }

    let expected = settings.embedding.dimensions;
    let mismatched = docs
        .iter()
        .filter(|d| vector_field(d, field).is_some_and(|v| v.len() != expected))
        .count();
    if mismatched > 0 {
        warn!(
            "{} documents have vectors whose length differs from EMBEDDING_DIMENSIONS ({})",
            mismatched, expected
        );
    }

    info!("Found {} documents with embeddings", docs.len());
    Ok(docs)
}

/// Embed one query with retries, recording its tokens in `costs`.
pub async fn embed_query(
    provider: &dyn EmbeddingProvider,
    query: &str,
    costs: &mut SessionCostTracker,
) -> Result<(Vec<f32>, u64)> {
    let texts = [query.to_string()];
    let texts = &texts;
    let batch = RetryExecutor::new()
        .execute_auto(|| provider.embed(texts))
        .await?;
    costs.record_embedding(provider.model(), "query", batch.prompt_tokens);

    let tokens = batch.prompt_tokens;
    match batch.vectors.into_iter().next() {
        Some(vector) => Ok((vector, tokens)),
        None => Err(VectorSearchError::ApiError("Empty embedding result".to_string())),
    }
}

/// Load, index and query with one index kind.
pub async fn run_index_demo(
    store: &VectorStore,
    provider: &dyn EmbeddingProvider,
    settings: &Settings,
    kind: VectorIndexKind,
    costs: &mut SessionCostTracker,
) -> Result<DemoReport> {
    let docs = load_vector_documents(settings)?;

    store.clear().await?;
    let stats = store
        .insert_data(&docs, settings.data.load_batch_size, &[])
        .await?;
    if stats.inserted == 0 {
        return Err(VectorSearchError::NoData(
            "No documents were inserted successfully".to_string(),
        ));
    }

    let spec = VectorIndexSpec::new(
        kind,
        settings.data.embedded_field.clone(),
        settings.embedding.dimensions,
    );
    store.create_vector_index(&spec).await?;

    let wait = index_build_wait(&kind);
    info!("Waiting {:?} for the index to be ready", wait);
    sleep(wait).await;

    let mut outcomes = Vec::new();
    let mut query_tokens = 0;
    for scenario in scenarios(&kind) {
        let (vector, tokens) = embed_query(provider, scenario.query, costs).await?;
        query_tokens += tokens;

        for params in &scenario.params {
            let results = store
                .vector_search(&vector, &spec.field, scenario.top_k, *params, DEFAULT_PROJECTION)
                .await?;
            info!(
                query = scenario.query,
                params = %params,
                "Search returned {} results",
                results.len()
            );
            outcomes.push(QueryOutcome {
                query: scenario.query.to_string(),
                description: scenario.description.to_string(),
                params: *params,
                top_k: scenario.top_k,
                results,
            });
        }
    }

    Ok(DemoReport {
        index_name: spec.index_name(),
        stats,
        outcomes,
        query_tokens,
    })
}

/// Embed `query` and search the existing index.
pub async fn run_search(
    store: &VectorStore,
    provider: &dyn EmbeddingProvider,
    field: &str,
    query: &str,
    params: SearchParams,
    k: usize,
    costs: &mut SessionCostTracker,
) -> Result<Vec<Document>> {
    let (vector, _) = embed_query(provider, query, costs).await?;
    store
        .vector_search(&vector, field, k, params, DEFAULT_PROJECTION)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::write_documents;
    use crate::providers::MockEmbedder;
    use serde_json::json;
    use tempfile::tempdir;

    fn settings_with(path: &std::path::Path, dims: &str) -> Settings {
        let path = path.to_string_lossy().to_string();
        let dims = dims.to_string();
        Settings::from_lookup(move |key| match key {
            "DATA_FILE_WITH_VECTORS" => Some(path.clone()),
            "EMBEDDING_DIMENSIONS" => Some(dims.clone()),
            _ => None,
        })
        .unwrap()
    }

    fn object(value: serde_json::Value) -> JsonDocument {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_ivf_scenarios() {
        let scenarios = scenarios(&VectorIndexKind::ivf());
        assert_eq!(scenarios.len(), 3);
        assert_eq!(
            scenarios[0].params,
            vec![
                SearchParams::Ivf { n_probes: 5 },
                SearchParams::Ivf { n_probes: 10 },
                SearchParams::Ivf { n_probes: 20 },
            ]
        );
        assert!(scenarios.iter().all(|s| s.top_k == 3));
        assert_eq!(index_build_wait(&VectorIndexKind::ivf()), Duration::from_secs(3));
    }

    #[test]
    fn test_hnsw_and_diskann_scenarios() {
        let hnsw = scenarios(&VectorIndexKind::hnsw());
        assert_eq!(hnsw.len(), 1);
        assert_eq!(hnsw[0].top_k, 5);
        assert_eq!(hnsw[0].params, vec![SearchParams::Hnsw { ef_search: 16 }]);

        let diskann = scenarios(&VectorIndexKind::diskann());
        assert_eq!(diskann.len(), 3);
        assert_eq!(diskann[2].query, "hotel near airport with free parking");
        assert_eq!(index_build_wait(&VectorIndexKind::diskann()), Duration::from_secs(2));
    }

    #[test]
    fn test_load_vector_documents_filters() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vectors.json");
        write_documents(
            &[
                object(json!({"HotelId": "1", "DescriptionVector": [0.1, 0.2]})),
                object(json!({"HotelId": "2"})),
            ],
            &path,
        )
        .unwrap();

        let docs = load_vector_documents(&settings_with(&path, "2")).unwrap();
        assert_eq!(docs.len(), 1);
    }

    #[test]
    fn test_load_vector_documents_without_vectors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vectors.json");
        write_documents(&[object(json!({"HotelId": "1"}))], &path).unwrap();

        let err = load_vector_documents(&settings_with(&path, "2")).unwrap_err();
        assert!(matches!(err, VectorSearchError::NoData(_)));
        assert!(err.user_description().contains("create-embeddings"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_embedding_retries_and_records_tokens() {
        let mock = MockEmbedder::new(4);
        mock.fail_next(VectorSearchError::RateLimited {
            message: "429".to_string(),
            retry_after: Some(Duration::from_secs(1)),
        })
        .await;
        let mut costs = SessionCostTracker::new();

        let (vector, tokens) = embed_query(&mock, "pool and spa", &mut costs).await.unwrap();

        assert_eq!(vector, mock.vector_for("pool and spa"));
        assert_eq!(tokens, 3);
        assert_eq!(mock.call_count(), 2);
        assert_eq!(costs.summary().total_tokens, 3);
        assert!(costs.summary().by_operation.contains_key("query"));
    }

    #[tokio::test]
    async fn test_query_embedding_permanent_failure() {
        let mock = MockEmbedder::new(4);
        mock.fail_next(VectorSearchError::AuthError("401".to_string()))
            .await;
        let mut costs = SessionCostTracker::new();

        let err = embed_query(&mock, "pool", &mut costs).await.unwrap_err();
        assert!(matches!(err, VectorSearchError::AuthError(_)));
        assert!(costs.is_empty());
    }
}
