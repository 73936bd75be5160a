use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use docindex_core::stores::DEFAULT_COLLECTION;
use docindex_core::{
    ChannelQueue, ConsumerOptions, Document, DocumentApiClient, EmbeddingJob, FsObjectStorage,
    HttpObjectStorage, HubModelLoader, IngestionConsumer, IngestionOptions, IngestionWorker,
    MemoryDocumentStore, ModelKey, ModelManager, ModelManagerOptions, ObjectStorage,
    PointIdentity, QdrantStore, SearchCoordinator, SearchOptions, SearchParams,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "docindex", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Consume embedding jobs and index their chunks.
    Worker {
        /// JSON-lines file of embedding jobs, or `-` for stdin.
        #[arg(long, default_value = "-")]
        jobs: String,

        /// Qdrant base URL
        #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333")]
        qdrant_url: String,

        /// Qdrant collection
        #[arg(long, env = "QDRANT_COLLECTION", default_value = DEFAULT_COLLECTION)]
        qdrant_collection: String,

        /// Base URL of the document API receiving status callbacks.
        #[arg(long, env = "DOCUMENT_API_URL", default_value = "http://localhost:3000")]
        document_api_url: String,

        /// Bearer token for the document API.
        #[arg(long, env = "DOCUMENT_API_TOKEN")]
        document_api_token: Option<String>,

        /// Object storage endpoint (path-style buckets).
        #[arg(long, env = "OBJECT_STORAGE_URL", conflicts_with = "object_storage_dir")]
        object_storage_url: Option<String>,

        /// Local directory holding one sub-directory per bucket.
        #[arg(long, env = "OBJECT_STORAGE_DIR")]
        object_storage_dir: Option<String>,

        /// Bucket used when a job carries none.
        #[arg(long, env = "DEFAULT_BUCKET", default_value = "documents")]
        default_bucket: String,

        /// Local model cache directory.
        #[arg(long, env = "MODEL_CACHE_DIR", default_value = "./models")]
        model_cache_dir: String,

        /// Model hub base URL.
        #[arg(long, env = "MODEL_HUB_URL", default_value = "https://huggingface.co")]
        model_hub_url: String,

        /// Embedding model identifier.
        #[arg(long, env = "EMBEDDING_MODEL", default_value = "Xenova/bge-m3")]
        embedding_model: String,

        /// Maximum jobs processed concurrently.
        #[arg(long, env = "MAX_IN_FLIGHT", default_value = "4")]
        max_in_flight: usize,

        /// Derive point ids from document id and chunk index.
        #[arg(long, default_value_t = false)]
        deterministic_ids: bool,
    },
    /// Run the search cascade over a JSON array of documents.
    Search {
        /// JSON file with the documents to search.
        #[arg(long)]
        documents: String,
        /// Owner whose documents are searched.
        #[arg(long)]
        user: String,
        /// Search text; empty lists documents.
        #[arg(long, default_value = "")]
        query: String,
        #[arg(long, default_value = "1")]
        page: u32,
        #[arg(long, default_value = "20")]
        limit: u32,
        #[arg(long)]
        file_type: Option<String>,
        #[arg(long)]
        status: Option<String>,
        /// Repeat for several tags.
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// relevance, date, title, size, views or downloads.
        #[arg(long, default_value = "relevance")]
        sort_by: String,
        #[arg(long, default_value = "desc")]
        sort_dir: String,
        /// Per-strategy timeout in milliseconds.
        #[arg(long, default_value = "10000")]
        timeout_ms: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "docindex boot"
    );

    match cli.command {
        Command::Worker {
            jobs,
            qdrant_url,
            qdrant_collection,
            document_api_url,
            document_api_token,
            object_storage_url,
            object_storage_dir,
            default_bucket,
            model_cache_dir,
            model_hub_url,
            embedding_model,
            max_in_flight,
            deterministic_ids,
        } => {
            let settings = WorkerSettings {
                jobs,
                qdrant_url,
                qdrant_collection,
                document_api_url,
                document_api_token,
                model_cache_dir,
                model_hub_url,
                options: IngestionOptions {
                    model: ModelKey::new("feature-extraction", embedding_model),
                    point_ids: if deterministic_ids {
                        PointIdentity::Deterministic
                    } else {
                        PointIdentity::Random
                    },
                    ..IngestionOptions::default()
                },
                consumer: ConsumerOptions { max_in_flight },
            };

            match (object_storage_url, object_storage_dir) {
                (_, Some(dir)) => {
                    run_worker(settings, FsObjectStorage::new(dir, default_bucket)).await?
                }
                (Some(url), None) => {
                    let storage = HttpObjectStorage::new(&url, default_bucket)
                        .with_context(|| format!("invalid object storage url {url}"))?;
                    run_worker(settings, storage).await?
                }
                (None, None) => anyhow::bail!(
                    "either --object-storage-url or --object-storage-dir is required"
                ),
            }
        }
        Command::Search {
            documents,
            user,
            query,
            page,
            limit,
            file_type,
            status,
            tags,
            sort_by,
            sort_dir,
            timeout_ms,
        } => {
            let raw = tokio::fs::read(&documents)
                .await
                .with_context(|| format!("unable to read {documents}"))?;
            let documents: Vec<Document> = serde_json::from_slice(&raw)
                .with_context(|| format!("{documents} is not a JSON array of documents"))?;
            info!(document_count = documents.len(), "documents loaded");

            let coordinator = SearchCoordinator::with_options(
                MemoryDocumentStore::new(documents),
                SearchOptions {
                    strategy_timeout: Some(Duration::from_millis(timeout_ms)),
                    ..SearchOptions::default()
                },
            );
            let params = SearchParams {
                user_id: user,
                search: query,
                page,
                limit,
                file_type,
                status,
                tags,
                sort_by,
                sort_dir,
            };

            let result = coordinator
                .search(&params)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }

    Ok(())
}

struct WorkerSettings {
    jobs: String,
    qdrant_url: String,
    qdrant_collection: String,
    document_api_url: String,
    document_api_token: Option<String>,
    model_cache_dir: String,
    model_hub_url: String,
    options: IngestionOptions,
    consumer: ConsumerOptions,
}

async fn run_worker<S>(settings: WorkerSettings, storage: S) -> anyhow::Result<()>
where
    S: ObjectStorage + Send + Sync + 'static,
{
    let callbacks = DocumentApiClient::new(&settings.document_api_url, settings.document_api_token)
        .map_err(|error| anyhow::anyhow!(error.to_string()))?;
    let vector = QdrantStore::new(&settings.qdrant_url, &settings.qdrant_collection);
    let models = Arc::new(ModelManager::new(
        Arc::new(HubModelLoader::new(
            &settings.model_cache_dir,
            &settings.model_hub_url,
        )),
        ModelManagerOptions::default(),
    ));

    let worker = IngestionWorker::new(vector, storage, callbacks, models, settings.options)
        .map_err(|error| anyhow::anyhow!(error.to_string()))?;
    let dimensions = worker
        .prepare()
        .await
        .map_err(|error| anyhow::anyhow!(error.to_string()))?;
    info!(
        dimensions,
        collection = %settings.qdrant_collection,
        "vector collection ready"
    );

    let queue = Arc::new(ChannelQueue::default());
    let feeder = {
        let queue = Arc::clone(&queue);
        let source = settings.jobs.clone();
        tokio::spawn(async move { feed_jobs(&source, &queue).await })
    };

    let (stop, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, finishing in-flight jobs");
            let _ = stop.send(true);
        }
    });

    let consumer = IngestionConsumer::new(Arc::clone(&queue), settings.consumer);
    let report = consumer.run(Arc::new(worker), shutdown).await;
    feeder.abort();

    let dead_letters = queue.dead_letters();
    for job in &dead_letters {
        warn!(document_id = %job.document_id, "job dead-lettered");
    }

    println!(
        "{} jobs acked, {} nacked, {} dead-lettered at {}",
        report.acked,
        report.nacked,
        dead_letters.len(),
        Utc::now().to_rfc3339()
    );
    Ok(())
}

async fn feed_jobs(source: &str, queue: &ChannelQueue) -> anyhow::Result<usize> {
    let published = read_jobs(source, queue).await;
    queue.finish_input();
    if let Err(error) = &published {
        warn!(%source, error = %error, "job input failed");
    }
    published
}

async fn read_jobs(source: &str, queue: &ChannelQueue) -> anyhow::Result<usize> {
    if source == "-" {
        return publish_lines(BufReader::new(tokio::io::stdin()), queue).await;
    }
    let file = tokio::fs::File::open(source)
        .await
        .with_context(|| format!("unable to open job file {source}"))?;
    publish_lines(BufReader::new(file), queue).await
}

async fn publish_lines<R>(reader: R, queue: &ChannelQueue) -> anyhow::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut published = 0;
    let mut line_number = 0;

    while let Some(line) = lines.next_line().await? {
        line_number += 1;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<EmbeddingJob>(&line) {
            Ok(job) => {
                queue
                    .publish(job)
                    .map_err(|error| anyhow::anyhow!(error.to_string()))?;
                published += 1;
            }
            Err(error) => warn!(line = line_number, %error, "skipping malformed job"),
        }
    }

    info!(published, "job input finished");
    Ok(published)
}
