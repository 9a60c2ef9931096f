//! Embedding provider implementations.

pub mod azure_openai;
pub use azure_openai::{AzureOpenAIEmbedder, EmbeddingAuth};

pub mod mock;
pub use mock::MockEmbedder;
