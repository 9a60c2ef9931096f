//! cosmos-vector: vector search workflows for Azure Cosmos DB
//!
//! Usage:
//!   cosmos-vector create-embeddings           # embed the raw hotel file
//!   cosmos-vector ivf|hnsw|diskann            # load, index and run sample queries
//!   cosmos-vector search "pool and spa" --kind hnsw --ef-search 40
//!   cosmos-vector show-indexes                # list databases, collections and indexes
//!   cosmos-vector similarity --pairs 5        # offline cosine scan over the vectors file
//!   cosmos-vector resilient-load --clear      # single-document inserts with retries

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cosmos_vector_search::demo::{embed_query, run_index_demo, run_search};
use cosmos_vector_search::documents::{documents_with_vectors, read_documents, vector_field};
use cosmos_vector_search::inspect::show_indexes;
use cosmos_vector_search::pipeline::create_embeddings;
use cosmos_vector_search::report::{
    format_config, format_cost_summary, format_embedding_summary, format_index_info,
    format_insert_report, format_insert_stats, format_search_results,
};
use cosmos_vector_search::similarity::{most_similar_pairs, pairwise, top_k};
use cosmos_vector_search::{
    connect, AuthMode, AzureOpenAIEmbedder, DefaultAzureCredential, MongoDocumentSink,
    RequestUnitPricing, ResilienceConfig, ResilientInserter, SearchParams, SessionCostTracker,
    Settings, TokenCredential, VectorIndexKind, VectorSearchError, VectorStore,
};
use tracing::warn;

#[derive(Parser, Debug)]
#[command(
    name = "cosmos-vector",
    about = "Vector search workflows for Azure Cosmos DB for MongoDB vCore"
)]
struct Cli {
    /// Use Microsoft Entra ID instead of keys (overrides AZURE_USE_PASSWORDLESS).
    #[arg(long, global = true)]
    passwordless: bool,

    /// Warn when the estimated session cost approaches this many USD.
    #[arg(long, global = true)]
    budget: Option<f64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Embed the text field of the raw data file and write the vectors file.
    CreateEmbeddings,
    /// Load the vectors file, build an IVF index and run sample queries.
    Ivf,
    /// Load the vectors file, build an HNSW index and run a sample query.
    Hnsw,
    /// Load the vectors file, build a DiskANN index and run sample queries.
    Diskann,
    /// Run one query against the existing index.
    Search {
        query: String,
        /// Index kind the collection was built with.
        #[arg(long, value_enum, default_value = "hnsw")]
        kind: IndexArg,
        /// Number of results.
        #[arg(short, long, default_value = "5")]
        k: usize,
        /// IVF lists to probe.
        #[arg(long)]
        probes: Option<u32>,
        /// HNSW candidate list size.
        #[arg(long)]
        ef_search: Option<u32>,
        /// DiskANN search list size.
        #[arg(long)]
        l_search: Option<u32>,
    },
    /// List databases, collections and their indexes.
    ShowIndexes,
    /// Brute-force cosine similarity over the vectors file.
    Similarity {
        /// Rank documents against this query (calls Azure OpenAI).
        #[arg(long)]
        query: Option<String>,
        /// Number of results or pairs to show.
        #[arg(long, default_value = "5")]
        pairs: usize,
        /// Only show pairs scoring at least this much.
        #[arg(long)]
        threshold: Option<f32>,
    },
    /// Insert documents one at a time with retries and a circuit breaker.
    ResilientLoad {
        /// Documents to insert (defaults to the vectors file).
        #[arg(long)]
        file: Option<PathBuf>,
        /// Delete existing documents first.
        #[arg(long)]
        clear: bool,
        #[arg(long, default_value = "3")]
        max_retries: u32,
        #[arg(long, default_value = "5")]
        failure_threshold: u32,
        #[arg(long, default_value = "60")]
        cooldown_secs: u64,
        /// Serverless price per million RU.
        #[arg(long, default_value = "0.25")]
        ru_price: f64,
        /// Read the RU charge of every insert.
        #[arg(long)]
        request_charge: bool,
        /// Project the cost of loading this many documents.
        #[arg(long, default_value = "1000000")]
        project: u64,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum IndexArg {
    Ivf,
    Hnsw,
    Diskann,
}

impl IndexArg {
    fn params(
        self,
        probes: Option<u32>,
        ef_search: Option<u32>,
        l_search: Option<u32>,
    ) -> SearchParams {
        let params = match self {
            IndexArg::Ivf => probes.map(|n_probes| SearchParams::Ivf { n_probes }),
            IndexArg::Hnsw => ef_search.map(|ef_search| SearchParams::Hnsw { ef_search }),
            IndexArg::Diskann => l_search.map(|l_search| SearchParams::DiskAnn { l_search }),
        };
        params.unwrap_or(SearchParams::Default)
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cosmos_vector_search=info,cosmos_vector=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("\nError: {:#}", e);
        if let Some(err) = e.downcast_ref::<VectorSearchError>() {
            eprintln!("{}", err.user_description());
        }
        std::process::exit(1);
    }
}

fn credential_for(settings: &Settings) -> Option<Arc<dyn TokenCredential>> {
    match settings.auth {
        AuthMode::Passwordless => Some(Arc::new(DefaultAzureCredential::new())),
        AuthMode::ApiKey => None,
    }
}

async fn open_store(
    settings: &Settings,
    credential: Option<Arc<dyn TokenCredential>>,
) -> anyhow::Result<VectorStore> {
    let client = connect(&settings.mongo, credential)
        .await
        .context("Failed to create MongoDB client")?;
    Ok(VectorStore::new(
        client,
        &settings.mongo.database,
        &settings.mongo.collection,
    ))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut settings = Settings::from_env()?;
    if cli.passwordless {
        settings = settings.with_auth(AuthMode::Passwordless);
    }
    let credential = credential_for(&settings);
    let mut costs = cli
        .budget
        .map_or_else(SessionCostTracker::new, SessionCostTracker::with_budget);

    match cli.command {
        Command::CreateEmbeddings => {
            println!("{}", format_config(&settings));
            let embedder = AzureOpenAIEmbedder::from_settings(&settings.embedding, credential)?;
            let summary = create_embeddings(&embedder, &settings, &mut costs).await?;
            println!("\nEmbedding creation completed successfully!");
            println!("{}", format_embedding_summary(&summary));
        }

        Command::Ivf => {
            index_demo(&settings, credential, VectorIndexKind::ivf(), &mut costs).await?
        }
        Command::Hnsw => {
            index_demo(&settings, credential, VectorIndexKind::hnsw(), &mut costs).await?
        }
        Command::Diskann => {
            index_demo(&settings, credential, VectorIndexKind::diskann(), &mut costs).await?
        }

        Command::Search {
            query,
            kind,
            k,
            probes,
            ef_search,
            l_search,
        } => {
            let embedder =
                AzureOpenAIEmbedder::from_settings(&settings.embedding, credential.clone())?;
            let store = open_store(&settings, credential).await?;
            let params = kind.params(probes, ef_search, l_search);
            println!("Searching for '{}' ({:?}, {})", query, kind, params);
            let field = &settings.data.embedded_field;
            let results =
                run_search(&store, &embedder, field, &query, params, k, &mut costs).await?;
            println!("{}", format_search_results(&results, k, true));
            store.client().clone().shutdown().await;
        }

        Command::ShowIndexes => {
            println!("Vector Index Information Display");
            println!("{}", "=".repeat(50));
            println!("Cluster: {}", settings.mongo.cluster_name);
            println!("Default Database: {}", settings.mongo.database);
            println!("Default Collection: {}", settings.mongo.collection);

            let store = open_store(&settings, credential).await?;
            println!("{}", show_indexes(store.client(), &settings.mongo).await);
            store.client().clone().shutdown().await;
        }

        Command::Similarity {
            query,
            pairs,
            threshold,
        } => similarity(&settings, credential, query, pairs, threshold, &mut costs).await?,

        Command::ResilientLoad {
            file,
            clear,
            max_retries,
            failure_threshold,
            cooldown_secs,
            ru_price,
            request_charge,
            project,
        } => {
            let path = file.unwrap_or_else(|| settings.data.output_file.clone());
            let documents = read_documents(&path)?;
            println!("Loaded {} documents from {}", documents.len(), path.display());

            let store = open_store(&settings, credential).await?;
            if clear {
                store.clear().await?;
            }

            let config = ResilienceConfig {
                max_retries,
                failure_threshold,
                cooldown: Duration::from_secs(cooldown_secs),
                request_unit_price_per_million: ru_price,
                ..Default::default()
            };
            let sink = MongoDocumentSink::new(&store).with_request_charge(request_charge);
            let mut inserter = ResilientInserter::new(sink, config);
            let report = inserter.insert_all(&documents).await;
            println!("{}", format_insert_report(&report, project));
            if report.cost.is_measured() {
                costs.set_ru_pricing(RequestUnitPricing::new(ru_price));
                costs.record_request_units(
                    store.collection_name(),
                    "resilient-load",
                    report.metrics.total_request_units,
                );
            }
            store.client().clone().shutdown().await;
        }
    }

    if !costs.is_empty() {
        println!("\n{}", format_cost_summary(&costs));
    }
    if costs.is_over_budget() {
        warn!("Session cost is over the configured budget");
    } else if costs.is_near_budget() {
        warn!("Session cost is approaching the configured budget");
    }

    Ok(())
}

async fn index_demo(
    settings: &Settings,
    credential: Option<Arc<dyn TokenCredential>>,
    kind: VectorIndexKind,
    costs: &mut SessionCostTracker,
) -> anyhow::Result<()> {
    println!("{}", format_config(settings));
    let embedder = AzureOpenAIEmbedder::from_settings(&settings.embedding, credential.clone())?;
    let store = open_store(settings, credential).await?;

    let report = run_index_demo(&store, &embedder, settings, kind, costs).await?;
    println!("{}", format_insert_stats(&report.stats));
    println!("\nCreated {} index '{}'", kind.display_name(), report.index_name);

    let mut current_query = None;
    for outcome in &report.outcomes {
        if current_query.as_deref() != Some(outcome.query.as_str()) {
            println!("\n{}", "=".repeat(80));
            println!("SEARCH SCENARIO: {}", outcome.query);
            println!("Description: {}", outcome.description);
            println!("{}", "=".repeat(80));
            current_query = Some(outcome.query.clone());
        }
        println!("\n--- {} search ({}) ---", kind.display_name(), outcome.params);
        println!("{}", format_search_results(&outcome.results, outcome.top_k, true));
    }

    if let Ok(indexes) = store.list_index_documents().await {
        let created = indexes
            .iter()
            .filter(|i| i.get_str("name").ok() == Some(report.index_name.as_str()));
        for index in created {
            println!("\n{}", format_index_info(index));
        }
    }

    println!(
        "\n{} vector search demonstration completed successfully!",
        kind.display_name()
    );
    store.client().clone().shutdown().await;
    Ok(())
}

async fn similarity(
    settings: &Settings,
    credential: Option<Arc<dyn TokenCredential>>,
    query: Option<String>,
    count: usize,
    threshold: Option<f32>,
    costs: &mut SessionCostTracker,
) -> anyhow::Result<()> {
    let field = &settings.data.embedded_field;
    let documents = documents_with_vectors(read_documents(&settings.data.output_file)?, field);
    if documents.is_empty() {
        return Err(VectorSearchError::NoData(format!(
            "No documents found with embeddings in field '{}'",
            field
        ))
        .into());
    }

    let vectors: Vec<Vec<f32>> = documents
        .iter()
        .map(|d| vector_field(d, field).unwrap_or_default())
        .collect();
    let name = |i: usize| {
        documents[i]
            .get("HotelName")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string()
    };

    match query {
        Some(query) => {
            let embedder = AzureOpenAIEmbedder::from_settings(&settings.embedding, credential)?;
            let (query_vector, _) = embed_query(&embedder, &query, costs).await?;
            println!("Top {} documents for '{}':", count, query);
            for (rank, hit) in top_k(&query_vector, &vectors, count).iter().enumerate() {
                println!("  {}. {} ({:.4})", rank + 1, name(hit.index), hit.score);
            }
        }
        None => {
            let pairs = match threshold {
                Some(t) => {
                    let mut pairs = pairwise(&vectors, Some(t));
                    pairs.truncate(count);
                    pairs
                }
                None => most_similar_pairs(&vectors, count),
            };
            println!("Most similar document pairs:");
            for pair in &pairs {
                println!(
                    "  {:.4}  {}  <->  {}",
                    pair.score,
                    name(pair.first),
                    name(pair.second)
                );
            }
        }
    }
    Ok(())
}
