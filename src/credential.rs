//! Microsoft Entra ID tokens for passwordless sign-in.
//!
//! Passwordless mode needs two tokens: one for Azure OpenAI
//! ([`COGNITIVE_SERVICES_SCOPE`]) sent as a bearer header, and one for
//! Cosmos DB for MongoDB ([`COSMOS_SCOPE`]) handed to the driver's
//! MONGODB-OIDC callback.
//!
//! [`DefaultAzureCredential`] tries, in order:
//! 1. [`EnvironmentCredential`] (service principal secret in env vars)
//! 2. [`ManagedIdentityCredential`] (App Service / IMDS)
//! 3. [`AzureCliCredential`] (`az login` on a developer machine)
//!
//! The first source that yields a token is remembered, and tokens are cached
//! per scope until shortly before they expire.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::error::{Result, VectorSearchError};

/// Scope for Azure OpenAI data-plane calls.
pub const COGNITIVE_SERVICES_SCOPE: &str = "https://cognitiveservices.azure.com/.default";

/// Scope for Cosmos DB for MongoDB vCore.
pub const COSMOS_SCOPE: &str = "https://cosmos.azure.com/.default";

const IMDS_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";
const REFRESH_MARGIN: Duration = Duration::from_secs(300);

/// A bearer token and its expiry.
#[derive(Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: SystemTime,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, expires_at: SystemTime) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    /// Token from a lifetime in seconds counted from now.
    pub fn expiring_in(token: impl Into<String>, seconds: u64) -> Self {
        Self::new(token, SystemTime::now() + Duration::from_secs(seconds))
    }

    /// Token from an absolute Unix timestamp.
    pub fn expiring_at_unix(token: impl Into<String>, unix_seconds: u64) -> Self {
        Self::new(token, UNIX_EPOCH + Duration::from_secs(unix_seconds))
    }

    /// True when the token expires within `margin` from now.
    pub fn is_expired_within(&self, margin: Duration) -> bool {
        match self.expires_at.duration_since(SystemTime::now()) {
            Ok(remaining) => remaining <= margin,
            Err(_) => true,
        }
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Source of Entra ID access tokens.
#[async_trait]
pub trait TokenCredential: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Acquire a token for `scope` (e.g. `https://cosmos.azure.com/.default`).
    async fn get_token(&self, scope: &str) -> Result<AccessToken>;
}

/// Convert a `.default` scope to the v1 `resource` form.
pub fn scope_to_resource(scope: &str) -> &str {
    scope.strip_suffix("/.default").unwrap_or(scope)
}

// ============================================================================
// Environment (client secret)
// ============================================================================

/// Service principal credential from `AZURE_TENANT_ID`, `AZURE_CLIENT_ID`
/// and `AZURE_CLIENT_SECRET`.
#[derive(Debug, Clone)]
pub struct EnvironmentCredential {
    client: Client,
    authority: String,
    tenant_id: String,
    client_id: String,
    client_secret: String,
}

#[derive(Debug, Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

impl EnvironmentCredential {
    pub fn new(
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            authority: DEFAULT_AUTHORITY.to_string(),
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Returns `None` when the service principal variables are not all set.
    pub fn from_env() -> Option<Self> {
        let tenant = std::env::var("AZURE_TENANT_ID").ok()?;
        let client_id = std::env::var("AZURE_CLIENT_ID").ok()?;
        let secret = std::env::var("AZURE_CLIENT_SECRET").ok()?;
        let mut credential = Self::new(tenant, client_id, secret);
        if let Ok(authority) = std::env::var("AZURE_AUTHORITY_HOST") {
            credential.authority = authority.trim_end_matches('/').to_string();
        }
        Some(credential)
    }

    fn token_url(&self) -> String {
        format!("{}/{}/oauth2/v2.0/token", self.authority, self.tenant_id)
    }
}

#[async_trait]
impl TokenCredential for EnvironmentCredential {
    fn name(&self) -> &str {
        "environment"
    }

    #[instrument(skip(self))]
    async fn get_token(&self, scope: &str) -> Result<AccessToken> {
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", scope),
        ];
        let response = self.client.post(self.token_url()).form(&params).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(VectorSearchError::CredentialError(format!(
                "token endpoint returned {}: {}",
                status, body
            )));
        }
        let parsed: OAuthTokenResponse = serde_json::from_str(&body)?;
        Ok(AccessToken::expiring_in(
            parsed.access_token,
            parsed.expires_in.unwrap_or(3600),
        ))
    }
}

// ============================================================================
// Managed identity
// ============================================================================

/// Managed identity credential (App Service identity endpoint or IMDS).
#[derive(Debug, Clone)]
pub struct ManagedIdentityCredential {
    client: Client,
    client_id: Option<String>,
    identity_endpoint: Option<(String, String)>,
}

#[derive(Debug, Deserialize)]
struct ManagedIdentityTokenResponse {
    access_token: String,
    // IMDS returns this as a string
    expires_on: serde_json::Value,
}

impl ManagedIdentityCredential {
    pub fn new() -> Self {
        let identity_endpoint = match (
            std::env::var("IDENTITY_ENDPOINT"),
            std::env::var("IDENTITY_HEADER"),
        ) {
            (Ok(endpoint), Ok(header)) => Some((endpoint, header)),
            _ => None,
        };
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(3))
                .build()
                .unwrap_or_else(|_| Client::new()),
            client_id: std::env::var("AZURE_CLIENT_ID").ok(),
            identity_endpoint,
        }
    }

    fn parse_expires_on(value: &serde_json::Value) -> Option<u64> {
        match value {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

impl Default for ManagedIdentityCredential {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenCredential for ManagedIdentityCredential {
    fn name(&self) -> &str {
        "managed-identity"
    }

    #[instrument(skip(self))]
    async fn get_token(&self, scope: &str) -> Result<AccessToken> {
        let resource = scope_to_resource(scope);
        let mut query: Vec<(&str, &str)> = vec![("resource", resource)];
        if let Some(client_id) = &self.client_id {
            query.push(("client_id", client_id.as_str()));
        }

        let request = match &self.identity_endpoint {
            Some((endpoint, header)) => {
                query.push(("api-version", "2019-08-01"));
                self.client
                    .get(endpoint)
                    .header("X-IDENTITY-HEADER", header)
                    .query(&query)
            }
            None => {
                query.push(("api-version", "2018-02-01"));
                self.client
                    .get(IMDS_ENDPOINT)
                    .header("Metadata", "true")
                    .query(&query)
            }
        };

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(VectorSearchError::CredentialError(format!(
                "managed identity endpoint returned {}: {}",
                status, body
            )));
        }
        let parsed: ManagedIdentityTokenResponse = serde_json::from_str(&body)?;
        let expires_on = Self::parse_expires_on(&parsed.expires_on).ok_or_else(|| {
            VectorSearchError::CredentialError("managed identity token has no expiry".to_string())
        })?;
        Ok(AccessToken::expiring_at_unix(parsed.access_token, expires_on))
    }
}

// ============================================================================
// Azure CLI
// ============================================================================

/// Token from the signed-in Azure CLI session.
#[derive(Debug, Clone, Default)]
pub struct AzureCliCredential;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliTokenResponse {
    access_token: String,
    #[serde(default)]
    expires_on: Option<String>,
    /// Unix timestamp, present on newer CLI versions.
    #[serde(default, rename = "expires_on")]
    expires_on_unix: Option<u64>,
}

impl AzureCliCredential {
    pub fn new() -> Self {
        Self
    }

    fn parse_output(stdout: &[u8]) -> Result<AccessToken> {
        let parsed: CliTokenResponse = serde_json::from_slice(stdout)?;
        if let Some(unix) = parsed.expires_on_unix {
            return Ok(AccessToken::expiring_at_unix(parsed.access_token, unix));
        }
        // older CLIs only print local time, e.g. "2024-05-01 10:15:00.000000"
        let expires = parsed
            .expires_on
            .as_deref()
            .and_then(|s| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").ok())
            .and_then(|naive| naive.and_local_timezone(chrono::Local).single())
            .map(|local| local.timestamp().max(0) as u64);
        match expires {
            Some(unix) => Ok(AccessToken::expiring_at_unix(parsed.access_token, unix)),
            None => Ok(AccessToken::expiring_in(parsed.access_token, 300)),
        }
    }
}

#[async_trait]
impl TokenCredential for AzureCliCredential {
    fn name(&self) -> &str {
        "azure-cli"
    }

    #[instrument(skip(self))]
    async fn get_token(&self, scope: &str) -> Result<AccessToken> {
        let program = if cfg!(windows) { "az.cmd" } else { "az" };
        let output = Command::new(program)
            .args([
                "account",
                "get-access-token",
                "--output",
                "json",
                "--resource",
                scope_to_resource(scope),
            ])
            .output()
            .await
            .map_err(|e| {
                VectorSearchError::CredentialError(format!("failed to run Azure CLI: {}", e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VectorSearchError::CredentialError(format!(
                "az account get-access-token failed: {}",
                stderr.trim()
            )));
        }
        Self::parse_output(&output.stdout)
    }
}

// ============================================================================
// Default chain with cache
// ============================================================================

/// Credential chain with per-scope token caching.
pub struct DefaultAzureCredential {
    sources: Vec<Arc<dyn TokenCredential>>,
    selected: Mutex<Option<usize>>,
    cache: Mutex<HashMap<String, AccessToken>>,
}

impl DefaultAzureCredential {
    /// Standard chain: environment, managed identity, Azure CLI.
    pub fn new() -> Self {
        let mut sources: Vec<Arc<dyn TokenCredential>> = Vec::new();
        if let Some(env) = EnvironmentCredential::from_env() {
            sources.push(Arc::new(env));
        }
        sources.push(Arc::new(ManagedIdentityCredential::new()));
        sources.push(Arc::new(AzureCliCredential::new()));
        Self::with_sources(sources)
    }

    /// Chain over explicit sources, tried in order.
    pub fn with_sources(sources: Vec<Arc<dyn TokenCredential>>) -> Self {
        Self {
            sources,
            selected: Mutex::new(None),
            cache: Mutex::new(HashMap::new()),
        }
    }

    async fn fetch(&self, scope: &str) -> Result<AccessToken> {
        let selected = *self.selected.lock().await;
        if let Some(index) = selected {
            return self.sources[index].get_token(scope).await;
        }

        let mut failures = Vec::new();
        for (index, source) in self.sources.iter().enumerate() {
            match source.get_token(scope).await {
                Ok(token) => {
                    debug!(source = source.name(), "Acquired Entra ID token");
                    *self.selected.lock().await = Some(index);
                    return Ok(token);
                }
                Err(e) => {
                    debug!(source = source.name(), error = %e, "Credential source unavailable");
                    failures.push(format!("{}: {}", source.name(), e));
                }
            }
        }
        warn!("No credential source produced a token");
        Err(VectorSearchError::CredentialError(failures.join("; ")))
    }
}

impl Default for DefaultAzureCredential {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenCredential for DefaultAzureCredential {
    fn name(&self) -> &str {
        "default"
    }

    async fn get_token(&self, scope: &str) -> Result<AccessToken> {
        if let Some(token) = self.cache.lock().await.get(scope) {
            if !token.is_expired_within(REFRESH_MARGIN) {
                return Ok(token.clone());
            }
        }
        let token = self.fetch(scope).await?;
        self.cache
            .lock()
            .await
            .insert(scope.to_string(), token.clone());
        Ok(token)
    }
}
