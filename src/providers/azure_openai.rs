//! Azure OpenAI embedding provider.
//!
//! Supports Azure OpenAI Service endpoints with API key or Entra ID
//! authentication.
//!
//! # Environment Variables
//! - `AZURE_OPENAI_EMBEDDING_ENDPOINT`: endpoint (e.g., `https://myresource.openai.azure.com`)
//! - `AZURE_OPENAI_EMBEDDING_KEY`: API key (not needed with Entra ID)
//! - `AZURE_OPENAI_EMBEDDING_MODEL`: deployment name of the embedding model
//! - `AZURE_OPENAI_EMBEDDING_API_VERSION`: API version (default: 2024-02-01)

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::config::{EmbeddingSettings, DEFAULT_API_VERSION};
use crate::credential::{TokenCredential, COGNITIVE_SERVICES_SCOPE};
use crate::error::{Result, VectorSearchError};
use crate::traits::{EmbeddingBatch, EmbeddingProvider};

/// How requests are authenticated.
#[derive(Clone)]
pub enum EmbeddingAuth {
    /// `api-key` header.
    ApiKey(String),
    /// `Authorization: Bearer` with an Entra ID token.
    EntraId(Arc<dyn TokenCredential>),
}

impl fmt::Debug for EmbeddingAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmbeddingAuth::ApiKey(_) => write!(f, "ApiKey(<redacted>)"),
            EmbeddingAuth::EntraId(credential) => write!(f, "EntraId({})", credential.name()),
        }
    }
}

/// Azure OpenAI embedding client.
#[derive(Debug, Clone)]
pub struct AzureOpenAIEmbedder {
    client: Client,
    endpoint: String,
    auth: EmbeddingAuth,
    deployment_name: String,
    api_version: String,
    embedding_dimension: usize,
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Clone, Deserialize)]
struct AzureErrorResponse {
    error: AzureError,
}

#[derive(Debug, Clone, Deserialize)]
struct AzureError {
    #[serde(default)]
    code: Option<String>,
    message: String,
}

// ============================================================================
// AzureOpenAIEmbedder Implementation
// ============================================================================

impl AzureOpenAIEmbedder {
    /// Create a new embedder.
    ///
    /// # Arguments
    /// * `endpoint` - Azure OpenAI endpoint (e.g., `https://myresource.openai.azure.com`)
    /// * `auth` - API key or Entra ID credential
    /// * `deployment_name` - Deployment name of the embedding model
    pub fn new(
        endpoint: impl Into<String>,
        auth: EmbeddingAuth,
        deployment_name: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_else(|_| Client::new()),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            auth,
            deployment_name: deployment_name.into(),
            api_version: DEFAULT_API_VERSION.to_string(),
            embedding_dimension: 1536, // text-embedding-ada-002
        }
    }

    /// Create an embedder from settings.
    ///
    /// With a credential, requests use Entra ID; otherwise the API key is
    /// required.
    pub fn from_settings(
        settings: &EmbeddingSettings,
        credential: Option<Arc<dyn TokenCredential>>,
    ) -> Result<Self> {
        let auth = match credential {
            Some(credential) => EmbeddingAuth::EntraId(credential),
            None => EmbeddingAuth::ApiKey(settings.api_key()?.to_string()),
        };
        Ok(Self::new(settings.endpoint()?, auth, settings.deployment.clone())
            .with_api_version(settings.api_version.clone())
            .with_embedding_dimension(settings.dimensions))
    }

    /// Set the API version.
    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    /// Set the expected embedding dimension.
    pub fn with_embedding_dimension(mut self, dimension: usize) -> Self {
        self.embedding_dimension = dimension;
        self
    }

    fn embeddings_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/embeddings?api-version={}",
            self.endpoint, self.deployment_name, self.api_version
        )
    }

    async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        match &self.auth {
            EmbeddingAuth::ApiKey(key) => Ok(request.header("api-key", key)),
            EmbeddingAuth::EntraId(credential) => {
                let token = credential.get_token(COGNITIVE_SERVICES_SCOPE).await?;
                Ok(request.bearer_auth(token.token))
            }
        }
    }

    /// Map a non-success response to an error.
    fn error_for_status(
        &self,
        status: StatusCode,
        retry_after: Option<Duration>,
        body: &str,
    ) -> VectorSearchError {
        let message = match serde_json::from_str::<AzureErrorResponse>(body) {
            Ok(parsed) => match parsed.error.code {
                Some(code) => format!("{} ({})", parsed.error.message, code),
                None => parsed.error.message,
            },
            Err(_) => body.to_string(),
        };

        match status {
            StatusCode::TOO_MANY_REQUESTS => VectorSearchError::RateLimited {
                message,
                retry_after,
            },
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                VectorSearchError::AuthError(message)
            }
            StatusCode::NOT_FOUND => VectorSearchError::DeploymentNotFound(format!(
                "{}: {}",
                self.deployment_name, message
            )),
            StatusCode::BAD_REQUEST => VectorSearchError::InvalidRequest(message),
            _ => VectorSearchError::ApiError(format!(
                "Azure OpenAI error ({}): {}",
                status.as_u16(),
                message
            )),
        }
    }

    fn into_batch(response: EmbeddingResponse, expected: usize) -> Result<EmbeddingBatch> {
        if response.data.len() != expected {
            return Err(VectorSearchError::ApiError(format!(
                "Expected {} embeddings, received {}",
                expected,
                response.data.len()
            )));
        }
        let mut data = response.data;
        data.sort_by_key(|e| e.index);
        Ok(EmbeddingBatch::new(
            data.into_iter().map(|e| e.embedding).collect(),
            response.usage.prompt_tokens,
        ))
    }
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    if let Some(ms) = headers
        .get("retry-after-ms")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
    {
        return Some(Duration::from_millis(ms));
    }
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[async_trait]
impl EmbeddingProvider for AzureOpenAIEmbedder {
    fn name(&self) -> &str {
        "azure-openai"
    }

    fn model(&self) -> &str {
        &self.deployment_name
    }

    fn dimension(&self) -> usize {
        self.embedding_dimension
    }

    fn max_tokens(&self) -> usize {
        8191
    }

    #[instrument(
        skip(self, texts),
        fields(deployment = %self.deployment_name, count = texts.len())
    )]
    async fn embed(&self, texts: &[String]) -> Result<EmbeddingBatch> {
        if texts.is_empty() {
            return Ok(EmbeddingBatch::default());
        }

        let url = self.embeddings_url();
        debug!("Sending embedding request to Azure OpenAI: {}", url);

        let request = self
            .client
            .post(&url)
            .json(&EmbeddingRequest { input: texts });
        let response = self.authorize(request).await?.send().await?;

        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let text = response.text().await?;

        if !status.is_success() {
            return Err(self.error_for_status(status, retry_after, &text));
        }

        let parsed: EmbeddingResponse = serde_json::from_str(&text)?;
        let batch = Self::into_batch(parsed, texts.len())?;
        debug!(
            embeddings = batch.len(),
            prompt_tokens = batch.prompt_tokens,
            "Received embeddings"
        );
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue};

    fn embedder() -> AzureOpenAIEmbedder {
        AzureOpenAIEmbedder::new(
            "https://myresource.openai.azure.com/",
            EmbeddingAuth::ApiKey("test-key".to_string()),
            "text-embedding-ada-002",
        )
    }

    #[test]
    fn test_embedder_creation() {
        let embedder = embedder();
        assert_eq!(embedder.name(), "azure-openai");
        assert_eq!(embedder.model(), "text-embedding-ada-002");
        assert_eq!(embedder.dimension(), 1536);
        // Trailing slash should be stripped
        assert_eq!(embedder.endpoint, "https://myresource.openai.azure.com");
    }

    #[test]
    fn test_embeddings_url() {
        let url = embedder().with_api_version("2024-06-01").embeddings_url();
        assert_eq!(
            url,
            "https://myresource.openai.azure.com/openai/deployments/text-embedding-ada-002/embeddings?api-version=2024-06-01"
        );
    }

    #[test]
    fn test_default_api_version() {
        assert!(embedder().embeddings_url().ends_with("api-version=2024-02-01"));
    }

    #[test]
    fn test_debug_redacts_key() {
        let debug = format!("{:?}", embedder());
        assert!(!debug.contains("test-key"));
    }

    #[test]
    fn test_request_serialization() {
        let input = vec!["hello".to_string(), "world".to_string()];
        let json = serde_json::to_value(EmbeddingRequest { input: &input }).unwrap();
        assert_eq!(json, serde_json::json!({"input": ["hello", "world"]}));
    }

    #[test]
    fn test_response_reordered_by_index() {
        let response: EmbeddingResponse = serde_json::from_str(
            r#"{"object":"list","data":[
                {"object":"embedding","index":1,"embedding":[0.2,0.2]},
                {"object":"embedding","index":0,"embedding":[0.1,0.1]}
            ],"model":"ada","usage":{"prompt_tokens":9,"total_tokens":9}}"#,
        )
        .unwrap();
        let batch = AzureOpenAIEmbedder::into_batch(response, 2).unwrap();
        assert_eq!(batch.vectors[0], vec![0.1, 0.1]);
        assert_eq!(batch.vectors[1], vec![0.2, 0.2]);
        assert_eq!(batch.prompt_tokens, 9);
    }

    #[test]
    fn test_response_count_mismatch() {
        let response: EmbeddingResponse =
            serde_json::from_str(r#"{"data":[{"index":0,"embedding":[0.1]}]}"#).unwrap();
        let err = AzureOpenAIEmbedder::into_batch(response, 2).unwrap_err();
        assert!(matches!(err, VectorSearchError::ApiError(_)));
    }

    #[test]
    fn test_status_mapping() {
        let e = embedder();
        let body = r#"{"error":{"code":"429","message":"Requests exceeded"}}"#;
        let retry_after = Some(Duration::from_secs(3));
        match e.error_for_status(StatusCode::TOO_MANY_REQUESTS, retry_after, body) {
            VectorSearchError::RateLimited {
                message,
                retry_after,
            } => {
                assert!(message.contains("Requests exceeded"));
                assert_eq!(retry_after, Some(Duration::from_secs(3)));
            }
            other => panic!("unexpected {:?}", other),
        }

        assert!(matches!(
            e.error_for_status(StatusCode::UNAUTHORIZED, None, "denied"),
            VectorSearchError::AuthError(_)
        ));
        assert!(matches!(
            e.error_for_status(StatusCode::NOT_FOUND, None, "{}"),
            VectorSearchError::DeploymentNotFound(_)
        ));
        assert!(matches!(
            e.error_for_status(StatusCode::BAD_REQUEST, None, "too long"),
            VectorSearchError::InvalidRequest(_)
        ));

        let server = e.error_for_status(StatusCode::SERVICE_UNAVAILABLE, None, "busy");
        assert!(server.to_string().contains("503"));
        assert!(server.is_recoverable());
    }

    #[test]
    fn test_parse_retry_after_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert("retry-after", HeaderValue::from_static("4"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(4)));

        headers.insert("retry-after-ms", HeaderValue::from_static("250"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_millis(250)));
    }

    #[tokio::test]
    async fn test_empty_input_skips_request() {
        // unroutable endpoint: any request would fail
        let embedder = AzureOpenAIEmbedder::new(
            "http://127.0.0.1:9",
            EmbeddingAuth::ApiKey("k".to_string()),
            "ada",
        );
        let batch = embedder.embed(&[]).await.unwrap();
        assert!(batch.is_empty());
    }

    #[test]
    fn test_from_settings_requires_key_without_credential() {
        let settings = crate::config::Settings::from_lookup(|key| match key {
            "AZURE_OPENAI_EMBEDDING_ENDPOINT" => Some("https://x.openai.azure.com".to_string()),
            _ => None,
        })
        .unwrap();
        let err = AzureOpenAIEmbedder::from_settings(&settings.embedding, None).unwrap_err();
        assert!(err.to_string().contains("AZURE_OPENAI_EMBEDDING_KEY"));
    }
}
