//! Environment-driven configuration.
//!
//! Every workflow reads the same set of variables (usually from a `.env`
//! file loaded by the binary). Required values are only checked by the
//! accessor that needs them, so `create-embeddings` runs without a Mongo
//! connection string and `show-indexes` runs without Azure OpenAI settings.
//!
//! # Environment Variables
//! - `MONGO_CONNECTION_STRING`: Cosmos DB for MongoDB vCore connection string
//! - `MONGO_CLUSTER_NAME`: cluster name, display only (default: `vectorSearch`)
//! - `MONGO_DATABASE` / `MONGO_COLLECTION`: target namespace
//! - `AZURE_OPENAI_EMBEDDING_ENDPOINT`, `AZURE_OPENAI_EMBEDDING_KEY`
//! - `AZURE_OPENAI_EMBEDDING_API_VERSION` (default: `2024-02-01`)
//! - `AZURE_OPENAI_EMBEDDING_MODEL`: deployment name (default: `text-embedding-ada-002`)
//! - `DATA_FILE_WITHOUT_VECTORS`, `DATA_FILE_WITH_VECTORS`
//! - `FIELD_TO_EMBED`, `EMBEDDED_FIELD`
//! - `EMBEDDING_SIZE_BATCH`, `EMBEDDING_DIMENSIONS`, `LOAD_SIZE_BATCH`
//! - `AZURE_USE_PASSWORDLESS`: use Entra ID instead of keys

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, VectorSearchError};

pub const DEFAULT_CLUSTER_NAME: &str = "vectorSearch";
pub const DEFAULT_DATABASE: &str = "vectorSearchDB";
pub const DEFAULT_COLLECTION: &str = "vectorSearchCollection";
pub const DEFAULT_API_VERSION: &str = "2024-02-01";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-ada-002";
pub const DEFAULT_INPUT_FILE: &str = "data/HotelsData_toCosmosDB_Vector.json";
pub const DEFAULT_OUTPUT_FILE: &str = "data/HotelsData_with_vectors.json";
pub const DEFAULT_FIELD_TO_EMBED: &str = "Description";
pub const DEFAULT_EMBEDDED_FIELD: &str = "DescriptionVector";
pub const DEFAULT_EMBEDDING_BATCH: usize = 16;
pub const DEFAULT_DIMENSIONS: usize = 1536;
pub const DEFAULT_LOAD_BATCH: usize = 100;

/// How the workflows authenticate against Azure services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMode {
    /// Connection string credentials and an Azure OpenAI API key.
    #[default]
    ApiKey,
    /// Microsoft Entra ID tokens (MONGODB-OIDC and bearer tokens).
    Passwordless,
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMode::ApiKey => write!(f, "api-key"),
            AuthMode::Passwordless => write!(f, "passwordless"),
        }
    }
}

/// MongoDB connection pool settings tuned for Cosmos DB.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolSettings {
    pub max_pool_size: u32,
    pub min_pool_size: u32,
    pub max_idle_time: Duration,
    pub server_selection_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_pool_size: 50,
            min_pool_size: 5,
            max_idle_time: Duration::from_secs(30),
            server_selection_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(20),
        }
    }
}

/// Mongo-side settings.
#[derive(Debug, Clone)]
pub struct MongoSettings {
    pub connection_string: Option<String>,
    pub cluster_name: String,
    pub database: String,
    pub collection: String,
    pub pool: PoolSettings,
}

impl MongoSettings {
    /// The connection string, or a configuration error naming the variable.
    pub fn connection_string(&self) -> Result<&str> {
        self.connection_string.as_deref().ok_or_else(|| {
            VectorSearchError::ConfigError(
                "MONGO_CONNECTION_STRING environment variable is required".to_string(),
            )
        })
    }
}

/// Azure OpenAI embedding settings.
#[derive(Debug, Clone)]
pub struct EmbeddingSettings {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub api_version: String,
    pub deployment: String,
    pub dimensions: usize,
    pub batch_size: usize,
}

impl EmbeddingSettings {
    pub fn endpoint(&self) -> Result<&str> {
        self.endpoint.as_deref().ok_or_else(|| {
            VectorSearchError::ConfigError(
                "AZURE_OPENAI_EMBEDDING_ENDPOINT environment variable is required".to_string(),
            )
        })
    }

    pub fn api_key(&self) -> Result<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            VectorSearchError::ConfigError(
                "AZURE_OPENAI_EMBEDDING_KEY environment variable is required (or use passwordless mode)"
                    .to_string(),
            )
        })
    }
}

/// Data files and field names.
#[derive(Debug, Clone)]
pub struct DataSettings {
    pub input_file: PathBuf,
    pub output_file: PathBuf,
    pub field_to_embed: String,
    pub embedded_field: String,
    pub load_batch_size: usize,
}

/// Complete configuration for every workflow.
#[derive(Debug, Clone)]
pub struct Settings {
    pub mongo: MongoSettings,
    pub embedding: EmbeddingSettings,
    pub data: DataSettings,
    pub auth: AuthMode,
}

impl Settings {
    /// Build settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let get_or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let mongo = MongoSettings {
            connection_string: get("MONGO_CONNECTION_STRING"),
            cluster_name: get_or("MONGO_CLUSTER_NAME", DEFAULT_CLUSTER_NAME),
            database: get_or("MONGO_DATABASE", DEFAULT_DATABASE),
            collection: get_or("MONGO_COLLECTION", DEFAULT_COLLECTION),
            pool: PoolSettings::default(),
        };

        let embedding = EmbeddingSettings {
            endpoint: get("AZURE_OPENAI_EMBEDDING_ENDPOINT"),
            api_key: get("AZURE_OPENAI_EMBEDDING_KEY"),
            api_version: get_or("AZURE_OPENAI_EMBEDDING_API_VERSION", DEFAULT_API_VERSION),
            deployment: get_or("AZURE_OPENAI_EMBEDDING_MODEL", DEFAULT_EMBEDDING_MODEL),
            dimensions: parse_positive(
                "EMBEDDING_DIMENSIONS",
                get("EMBEDDING_DIMENSIONS"),
                DEFAULT_DIMENSIONS,
            )?,
            batch_size: parse_positive(
                "EMBEDDING_SIZE_BATCH",
                get("EMBEDDING_SIZE_BATCH"),
                DEFAULT_EMBEDDING_BATCH,
            )?,
        };

        let data = DataSettings {
            input_file: PathBuf::from(get_or("DATA_FILE_WITHOUT_VECTORS", DEFAULT_INPUT_FILE)),
            output_file: PathBuf::from(get_or("DATA_FILE_WITH_VECTORS", DEFAULT_OUTPUT_FILE)),
            field_to_embed: get_or("FIELD_TO_EMBED", DEFAULT_FIELD_TO_EMBED),
            embedded_field: get_or("EMBEDDED_FIELD", DEFAULT_EMBEDDED_FIELD),
            load_batch_size: parse_positive(
                "LOAD_SIZE_BATCH",
                get("LOAD_SIZE_BATCH"),
                DEFAULT_LOAD_BATCH,
            )?,
        };

        let auth = match get("AZURE_USE_PASSWORDLESS") {
            None => AuthMode::ApiKey,
            Some(v) => match parse_bool(&v) {
                Some(true) => AuthMode::Passwordless,
                Some(false) => AuthMode::ApiKey,
                None => return Err(invalid("AZURE_USE_PASSWORDLESS", &v)),
            },
        };

        Ok(Self {
            mongo,
            embedding,
            data,
            auth,
        })
    }

    /// Override the authentication mode (e.g. from a CLI flag).
    pub fn with_auth(mut self, auth: AuthMode) -> Self {
        self.auth = auth;
        self
    }
}

fn invalid(key: &str, value: &str) -> VectorSearchError {
    VectorSearchError::ConfigError(format!("{} has an invalid value '{}'", key, value))
}

fn parse_positive(key: &str, value: Option<String>, default: usize) -> Result<usize> {
    match value {
        None => Ok(default),
        Some(raw) => match usize::from_str(raw.trim()) {
            Ok(0) | Err(_) => Err(invalid(key, &raw)),
            Ok(n) => Ok(n),
        },
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    fn settings_from(pairs: &[(&str, &str)]) -> Result<Settings> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let settings = settings_from(&[]).unwrap();
        assert_eq!(settings.mongo.database, "vectorSearchDB");
        assert_eq!(settings.mongo.collection, "vectorSearchCollection");
        assert_eq!(settings.mongo.cluster_name, "vectorSearch");
        assert_eq!(settings.embedding.deployment, "text-embedding-ada-002");
        assert_eq!(settings.embedding.api_version, "2024-02-01");
        assert_eq!(settings.embedding.dimensions, 1536);
        assert_eq!(settings.embedding.batch_size, 16);
        assert_eq!(settings.data.load_batch_size, 100);
        assert_eq!(settings.data.field_to_embed, "Description");
        assert_eq!(settings.data.embedded_field, "DescriptionVector");
        assert_eq!(
            settings.data.output_file,
            PathBuf::from("data/HotelsData_with_vectors.json")
        );
        assert_eq!(settings.auth, AuthMode::ApiKey);
    }

    #[test]
    fn test_overrides() {
        let settings = settings_from(&[
            ("EMBEDDING_SIZE_BATCH", "32"),
            ("EMBEDDING_DIMENSIONS", "3072"),
            ("EMBEDDED_FIELD", "vec"),
            ("AZURE_USE_PASSWORDLESS", "true"),
        ])
        .unwrap();
        assert_eq!(settings.embedding.batch_size, 32);
        assert_eq!(settings.embedding.dimensions, 3072);
        assert_eq!(settings.data.embedded_field, "vec");
        assert_eq!(settings.auth, AuthMode::Passwordless);
    }

    #[test]
    fn test_invalid_number_is_error() {
        let err = settings_from(&[("LOAD_SIZE_BATCH", "lots")]).unwrap_err();
        assert!(matches!(err, VectorSearchError::ConfigError(_)));
        assert!(err.to_string().contains("LOAD_SIZE_BATCH"));

        let err = settings_from(&[("EMBEDDING_SIZE_BATCH", "0")]).unwrap_err();
        assert!(err.to_string().contains("EMBEDDING_SIZE_BATCH"));
    }

    #[test]
    fn test_invalid_bool_is_error() {
        let err = settings_from(&[("AZURE_USE_PASSWORDLESS", "maybe")]).unwrap_err();
        assert!(err.to_string().contains("AZURE_USE_PASSWORDLESS"));
    }

    #[test]
    fn test_required_values_checked_lazily() {
        let settings = settings_from(&[]).unwrap();
        let err = settings.mongo.connection_string().unwrap_err();
        assert!(err.to_string().contains("MONGO_CONNECTION_STRING"));
        assert!(settings.embedding.endpoint().is_err());
        assert!(settings.embedding.api_key().is_err());
    }

    #[test]
    fn test_empty_values_are_unset() {
        let settings = settings_from(&[("MONGO_CONNECTION_STRING", "  ")]).unwrap();
        assert!(settings.mongo.connection_string.is_none());
    }

    #[test]
    fn test_pool_defaults() {
        let pool = PoolSettings::default();
        assert_eq!(pool.max_pool_size, 50);
        assert_eq!(pool.min_pool_size, 5);
        assert_eq!(pool.max_idle_time, Duration::from_secs(30));
        assert_eq!(pool.server_selection_timeout, Duration::from_secs(5));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        std::env::set_var("MONGO_DATABASE", "hotelsDB");
        let settings = Settings::from_env().unwrap();
        std::env::remove_var("MONGO_DATABASE");
        assert_eq!(settings.mongo.database, "hotelsDB");
    }
}
