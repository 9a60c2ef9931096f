//! Cosmos DB for MongoDB (vCore) access.
//!
//! [`connect`] builds a driver client with pooled connections and, in
//! passwordless mode, a MONGODB-OIDC callback backed by Entra ID.
//! [`VectorStore`] wraps one collection and provides the load, index and
//! search operations the workflows need.

use async_trait::async_trait;
use futures::{FutureExt, TryStreamExt};
use mongodb::bson::{doc, Bson, Document};
use mongodb::error::ErrorKind;
use mongodb::options::{oidc, AuthMechanism, ClientOptions, Credential};
use mongodb::{Client, Collection, Database, IndexModel};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use crate::config::MongoSettings;
use crate::credential::{TokenCredential, COSMOS_SCOPE};
use crate::documents::JsonDocument;
use crate::error::{Result, VectorSearchError};
use crate::index::{is_vector_index, search_pipeline, SearchParams, VectorIndexSpec};
use crate::resilient::{DocumentSink, InsertReceipt};

/// Pause between insert batches.
pub const INSERT_BATCH_DELAY: Duration = Duration::from_millis(100);

const TIER_NOT_ENABLED: &str = "not enabled for this cluster tier";

/// Build a client from settings.
///
/// With a credential the connection authenticates through MONGODB-OIDC using
/// Cosmos DB scoped Entra ID tokens.
pub async fn connect(
    settings: &MongoSettings,
    credential: Option<Arc<dyn TokenCredential>>,
) -> Result<Client> {
    let mut options = ClientOptions::parse(settings.connection_string()?).await?;
    options.app_name = Some("cosmos-vector-search".to_string());
    options.max_pool_size = Some(settings.pool.max_pool_size);
    options.min_pool_size = Some(settings.pool.min_pool_size);
    options.max_idle_time = Some(settings.pool.max_idle_time);
    options.server_selection_timeout = Some(settings.pool.server_selection_timeout);
    options.connect_timeout = Some(settings.pool.connect_timeout);

    if let Some(credential) = credential {
        debug!(source = credential.name(), "Using MONGODB-OIDC authentication");
        options.credential = Some(oidc_credential(credential));
    }

    Ok(Client::with_options(options)?)
}

fn oidc_credential(credential: Arc<dyn TokenCredential>) -> Credential {
    let callback = oidc::Callback::machine(move |_| {
        let credential = credential.clone();
        async move {
            let token = credential
                .get_token(COSMOS_SCOPE)
                .await
                .map_err(mongodb::error::Error::custom)?;
            Ok(oidc::IdpServerResponse::builder()
                .access_token(token.token)
                .build())
        }
        .boxed()
    });

    Credential::builder()
        .mechanism(AuthMechanism::MongoDbOidc)
        .oidc_callback(callback)
        .build()
}

/// Counts from a batched load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertStats {
    pub total: usize,
    pub inserted: usize,
    pub failed: usize,
}

/// One collection used for vector search.
#[derive(Clone)]
pub struct VectorStore {
    client: Client,
    database: Database,
    collection: Collection<Document>,
}

impl VectorStore {
    pub fn new(client: Client, database: &str, collection: &str) -> Self {
        let database = client.database(database);
        let collection = database.collection::<Document>(collection);
        Self {
            client,
            database,
            collection,
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn collection_name(&self) -> &str {
        self.collection.name()
    }

    /// Delete every document in the collection.
    pub async fn clear(&self) -> Result<u64> {
        let result = self.collection.delete_many(doc! {}).await?;
        info!(
            "Cleared {} existing documents from '{}'",
            result.deleted_count,
            self.collection_name()
        );
        Ok(result.deleted_count)
    }

    /// Insert documents in unordered batches.
    ///
    /// Plain indexes on `index_fields` are created first; failing to create
    /// one is logged and ignored.
    #[instrument(
        skip(self, data, index_fields),
        fields(collection = %self.collection_name(), documents = data.len())
    )]
    pub async fn insert_data(
        &self,
        data: &[JsonDocument],
        batch_size: usize,
        index_fields: &[String],
    ) -> Result<InsertStats> {
        let batch_size = batch_size.max(1);
        let mut stats = InsertStats {
            total: data.len(),
            ..Default::default()
        };

        for field in index_fields {
            let mut keys = Document::new();
            keys.insert(field.clone(), 1);
            let model = IndexModel::builder().keys(keys).build();
            match self.collection.create_index(model).await {
                Ok(_) => info!("Created index on field: {}", field),
                Err(e) => warn!("Could not create index on {}: {}", field, e),
            }
        }

        let total_batches = data.len().div_ceil(batch_size);
        info!("Starting batch insertion of {} documents", data.len());

        for (batch_index, batch) in data.chunks(batch_size).enumerate() {
            let batch_num = batch_index + 1;
            let docs = batch
                .iter()
                .map(mongodb::bson::to_document)
                .collect::<std::result::Result<Vec<_>, _>>()?;

            match self.collection.insert_many(docs).ordered(false).await {
                Ok(result) => {
                    stats.inserted += result.inserted_ids.len();
                    info!(
                        "Batch {}/{} completed: {} documents inserted",
                        batch_num,
                        total_batches,
                        result.inserted_ids.len()
                    );
                }
                Err(e) => match e.kind.as_ref() {
                    ErrorKind::InsertMany(failure) => {
                        let write_errors = failure.write_errors.as_deref().unwrap_or_default();
                        let (inserted, failed) = split_batch(batch.len(), write_errors.len());
                        stats.inserted += inserted;
                        stats.failed += failed;
                        warn!(
                            "Batch {}/{} had errors: {} inserted, {} failed",
                            batch_num, total_batches, inserted, failed
                        );
                        for error in write_errors {
                            warn!("  Error: {}", error.message);
                        }
                    }
                    _ => {
                        stats.failed += batch.len();
                        warn!("Batch {}/{} failed completely: {}", batch_num, total_batches, e);
                    }
                },
            }

            sleep(INSERT_BATCH_DELAY).await;
        }

        info!(
            total = stats.total,
            inserted = stats.inserted,
            failed = stats.failed,
            "Insertion completed"
        );
        Ok(stats)
    }

    /// Drop every vector index on `field`. Failures are logged, not returned.
    pub async fn drop_vector_indexes(&self, field: &str) -> usize {
        let indexes = match self.list_index_documents().await {
            Ok(indexes) => indexes,
            Err(e) => {
                warn!("Could not list indexes: {}", e);
                return 0;
            }
        };

        let mut dropped = 0;
        for index in indexes.iter().filter(|i| is_vector_index(i, field)) {
            let Ok(name) = index.get_str("name") else {
                continue;
            };
            info!("Dropping existing vector index: {}", name);
            match self.collection.drop_index(name).await {
                Ok(()) => dropped += 1,
                Err(e) => warn!("Could not drop index {}: {}", name, e),
            }
        }

        if dropped == 0 {
            debug!("No existing vector indexes found to drop");
        } else {
            info!("Dropped {} existing vector index(es)", dropped);
        }
        dropped
    }

    /// Replace any vector index on the field with `spec`.
    #[instrument(skip(self, spec), fields(index = %spec.index_name()))]
    pub async fn create_vector_index(&self, spec: &VectorIndexSpec) -> Result<Document> {
        self.drop_vector_indexes(&spec.field).await;

        let command = spec.create_indexes_command(self.collection_name());
        match self.database.run_command(command).await {
            Ok(result) => {
                info!(
                    "Created {} vector index '{}' ({} dimensions, {})",
                    spec.kind.display_name(),
                    spec.index_name(),
                    spec.dimensions,
                    spec.similarity
                );
                Ok(result)
            }
            Err(e) => Err(classify_index_error(spec, e.into())),
        }
    }

    /// Run a vector search and return the projected documents with `score`.
    #[instrument(skip(self, vector, projection))]
    pub async fn vector_search(
        &self,
        vector: &[f32],
        path: &str,
        k: usize,
        params: SearchParams,
        projection: &[&str],
    ) -> Result<Vec<Document>> {
        let pipeline = search_pipeline(vector, path, k, params, projection);
        let cursor = self.collection.aggregate(pipeline).await?;
        let results: Vec<Document> = cursor.try_collect().await?;
        debug!("Vector search returned {} results", results.len());
        Ok(results)
    }

    /// Raw index documents from `listIndexes`.
    pub async fn list_index_documents(&self) -> Result<Vec<Document>> {
        list_index_documents(&self.database, self.collection_name()).await
    }

    pub async fn document_count(&self) -> Result<u64> {
        Ok(self.collection.count_documents(doc! {}).await?)
    }
}

/// Raw index documents for `collection` in `database`.
///
/// Vector indexes carry `cosmosSearchOptions`, which typed index models drop.
pub async fn list_index_documents(database: &Database, collection: &str) -> Result<Vec<Document>> {
    let reply = database
        .run_command(doc! { "listIndexes": collection })
        .await?;
    let batch = reply
        .get_document("cursor")
        .and_then(|c| c.get_array("firstBatch"))
        .map_err(|e| {
            VectorSearchError::DatabaseError(format!("Unexpected listIndexes reply: {}", e))
        })?;

    Ok(batch
        .iter()
        .filter_map(|b| match b {
            Bson::Document(d) => Some(d.clone()),
            _ => None,
        })
        .collect())
}

/// Document count from `collStats`, if reported.
pub async fn collection_stats_count(database: &Database, collection: &str) -> Result<Option<i64>> {
    let stats = database
        .run_command(doc! { "collStats": collection })
        .await?;
    Ok(stats.get("count").and_then(bson_number))
}

/// Integer value of a numeric BSON field.
pub fn bson_number(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(v) => Some(*v as i64),
        Bson::Int64(v) => Some(*v),
        Bson::Double(v) if v.is_finite() => Some(*v as i64),
        _ => None,
    }
}

/// Split a partially failed batch into (inserted, failed).
fn split_batch(batch_len: usize, write_errors: usize) -> (usize, usize) {
    let failed = write_errors.min(batch_len);
    (batch_len - failed, failed)
}

fn classify_index_error(spec: &VectorIndexSpec, error: VectorSearchError) -> VectorSearchError {
    let message = error.to_string();
    if message.contains(TIER_NOT_ENABLED) {
        let alternatives: Vec<&str> = ["IVF", "HNSW", "DiskANN"]
            .into_iter()
            .filter(|k| *k != spec.kind.display_name())
            .collect();
        VectorSearchError::IndexNotSupported(format!(
            "{} vector index is {}. Try {} instead, or upgrade the cluster tier",
            spec.kind.display_name(),
            TIER_NOT_ENABLED,
            alternatives.join(" or ")
        ))
    } else {
        error
    }
}

/// [`DocumentSink`] inserting into a Mongo collection.
pub struct MongoDocumentSink {
    database: Database,
    collection: Collection<Document>,
    read_request_charge: bool,
}

impl MongoDocumentSink {
    pub fn new(store: &VectorStore) -> Self {
        Self {
            database: store.database.clone(),
            collection: store.collection.clone(),
            read_request_charge: false,
        }
    }

    /// Query `getLastRequestStatistics` after each insert for the RU charge.
    ///
    /// The statistics are per connection and the follow-up command may be
    /// checked out on a different pooled connection than the insert, so the
    /// charge is best-effort. Set `maxPoolSize=1` in the connection string
    /// for exact per-insert figures.
    pub fn with_request_charge(mut self, enabled: bool) -> Self {
        self.read_request_charge = enabled;
        self
    }

    async fn last_request_charge(&self) -> Option<f64> {
        match self
            .database
            .run_command(doc! { "getLastRequestStatistics": 1 })
            .await
        {
            Ok(stats) => request_charge(&stats),
            Err(e) => {
                debug!("getLastRequestStatistics unavailable: {}", e);
                None
            }
        }
    }
}

/// `RequestCharge` from a `getLastRequestStatistics` reply.
///
/// A missing or non-numeric field yields `None`, which the inserter counts
/// as an insert without a reported charge.
fn request_charge(stats: &Document) -> Option<f64> {
    match stats.get("RequestCharge")? {
        Bson::Double(ru) => Some(*ru),
        other => bson_number(other).map(|v| v as f64),
    }
}

#[async_trait]
impl DocumentSink for MongoDocumentSink {
    async fn insert(&self, document: &JsonDocument) -> Result<InsertReceipt> {
        let doc = mongodb::bson::to_document(document)?;
        self.collection.insert_one(doc).await?;

        let request_charge = if self.read_request_charge {
            self.last_request_charge().await
        } else {
            None
        };
        Ok(InsertReceipt { request_charge })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::VectorIndexKind;

    #[test]
    fn test_split_batch() {
        assert_eq!(split_batch(100, 3), (97, 3));
        assert_eq!(split_batch(10, 0), (10, 0));
        assert_eq!(split_batch(2, 5), (0, 2));
    }

    #[test]
    fn test_tier_error_becomes_index_not_supported() {
        let spec = VectorIndexSpec::new(VectorIndexKind::diskann(), "v", 1536);
        let err = classify_index_error(
            &spec,
            VectorSearchError::DatabaseError(
                "Command failed: vector-diskann is not enabled for this cluster tier".to_string(),
            ),
        );
        match err {
            VectorSearchError::IndexNotSupported(msg) => {
                assert!(msg.starts_with("DiskANN"));
                assert!(msg.contains("IVF or HNSW"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_other_index_errors_pass_through() {
        let spec = VectorIndexSpec::new(VectorIndexKind::ivf(), "v", 1536);
        let err = classify_index_error(
            &spec,
            VectorSearchError::DatabaseError("dimensions mismatch".to_string()),
        );
        assert!(matches!(err, VectorSearchError::DatabaseError(_)));
    }

    #[test]
    fn test_request_charge_from_statistics() {
        let stats = doc! { "CommandName": "insert", "RequestCharge": 10.29 };
        assert_eq!(request_charge(&stats), Some(10.29));
        assert_eq!(request_charge(&doc! { "RequestCharge": 7_i32 }), Some(7.0));
        assert_eq!(request_charge(&doc! { "CommandName": "find" }), None);
        assert_eq!(request_charge(&doc! { "RequestCharge": "n/a" }), None);
    }

    #[test]
    fn test_bson_number() {
        assert_eq!(bson_number(&Bson::Int32(4)), Some(4));
        assert_eq!(bson_number(&Bson::Int64(50)), Some(50));
        assert_eq!(bson_number(&Bson::Double(12.0)), Some(12));
        assert_eq!(bson_number(&Bson::String("1".to_string())), None);
    }
}
