//! Cosmos Vector Search - Vector search workflows for Azure Cosmos DB
//!
//! Loads hotel documents, embeds a text field with Azure OpenAI, stores the
//! vectors in Azure Cosmos DB for MongoDB (vCore), builds IVF / HNSW /
//! DiskANN vector indexes and queries them.
//!
//! This crate provides:
//! - Configuration from environment variables ([`config`])
//! - API key or passwordless Entra ID authentication ([`credential`])
//! - Embedding providers ([`traits`], [`providers`])
//! - Batched embedding creation ([`pipeline`])
//! - Index definitions and search pipelines ([`index`])
//! - Collection load, index and search operations ([`store`])
//! - Index demos and listings ([`demo`], [`inspect`], [`report`])
//! - Offline cosine similarity ([`similarity`])
//! - Single-document inserts with retries and a circuit breaker ([`resilient`])
//! - Token and Request Unit cost estimates ([`cost_tracker`])
//!
//! # Workflows
//!
//! | Workflow | Needs Mongo | Needs Azure OpenAI |
//! |----------|-------------|--------------------|
//! | create-embeddings | | ✓ |
//! | ivf / hnsw / diskann | ✓ | ✓ |
//! | search | ✓ | ✓ |
//! | show-indexes | ✓ | |
//! | similarity | | optional |
//! | resilient-load | ✓ | |
//!
//! # Example
//!
//! ```ignore
//! use cosmos_vector_search::{AzureOpenAIEmbedder, Settings, pipeline::create_embeddings};
//!
//! let settings = Settings::from_env()?;
//! let embedder = AzureOpenAIEmbedder::from_settings(&settings.embedding, None)?;
//! let summary = create_embeddings(&embedder, &settings).await?;
//! println!("Embedded {} documents", summary.embedded);
//! ```

pub mod config;
pub mod cost_tracker;
pub mod credential;
pub mod demo;
pub mod documents;
pub mod error;
pub mod index;
pub mod inspect;
pub mod pipeline;
pub mod providers;
pub mod report;
pub mod resilient;
pub mod retry;
pub mod similarity;
pub mod store;
pub mod traits;

pub use config::{AuthMode, DataSettings, EmbeddingSettings, MongoSettings, PoolSettings, Settings};
pub use cost_tracker::{
    format_cost, format_count, CostEntry, CostSummary, EmbeddingPricing, RequestUnitPricing,
    SessionCostTracker,
};
pub use credential::{
    AccessToken, AzureCliCredential, DefaultAzureCredential, EnvironmentCredential,
    ManagedIdentityCredential, TokenCredential,
};
pub use documents::{read_documents, write_documents, JsonDocument};
pub use error::{Result, RetryStrategy, VectorSearchError};
pub use index::{SearchParams, Similarity, VectorIndexKind, VectorIndexSpec};
pub use pipeline::{EmbeddingPipeline, EmbeddingRunSummary};
pub use providers::{AzureOpenAIEmbedder, EmbeddingAuth, MockEmbedder};
pub use resilient::{
    BackoffPolicy, CircuitBreaker, CircuitState, CostEstimate, DocumentSink, InsertMetrics,
    InsertReceipt, InsertReport, ResilienceConfig, ResilientInserter,
};
pub use retry::RetryExecutor;
pub use store::{connect, InsertStats, MongoDocumentSink, VectorStore};
pub use traits::{EmbeddingBatch, EmbeddingProvider};
