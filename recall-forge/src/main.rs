//! recall-forge - flashcard ingestion and review service
//!
//! Turns study material (web pages, YouTube videos, uploaded files) into
//! flashcards through a three-stage background pipeline and schedules reviews
//! with SM-2.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use recall_common::config::{load_toml_config, prepare_root_folder, resolve_root_folder};
use recall_common::events::EventBus;
use recall_forge::config::{migrate_key_to_database, resolve_gemini_api_key};
use recall_forge::services::{
    GeminiClient, GenerationAdapter, InMemoryVectorStore, QdrantStore, RoutingExtractor,
    UploadStore, VectorStore, WebExtractor, YoutubeExtractor,
};
use recall_forge::workflow::{
    ensure_dimensions_match, Orchestrator, PipelineConfig, TaskQueue, WorkerPool,
};
use recall_forge::AppState;

/// Broadcast capacity for pipeline and review events
const EVENT_BUS_CAPACITY: usize = 256;

/// Command-line arguments for recall-forge
#[derive(Parser, Debug)]
#[command(name = "recall-forge")]
#[command(about = "Flashcard generation and spaced-repetition service")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides the TOML port)
    #[arg(short, long, env = "RECALL_PORT")]
    port: Option<u16>,

    /// Root folder holding the database and uploads
    #[arg(short, long, env = "RECALL_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// Path to the TOML config file
    #[arg(short, long, env = "RECALL_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config first so the TOML log level can seed the filter
    let toml_config = load_toml_config(args.config.as_deref())
        .context("Failed to load configuration")?;

    let default_filter = format!(
        "recall_forge={},tower_http={}",
        toml_config.logging.level, toml_config.logging.level
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting recall-forge v{} ({} {}, built {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_PROFILE"),
        env!("BUILD_TIMESTAMP")
    );

    let root_folder = resolve_root_folder(args.root_folder.as_deref(), &toml_config);
    let db_path = prepare_root_folder(&root_folder)
        .with_context(|| format!("Failed to prepare root folder {}", root_folder.display()))?;
    info!("Database: {}", db_path.display());

    let db_pool = recall_forge::db::init_database_pool(&db_path)
        .await
        .context("Failed to open database")?;

    let api_key = match resolve_gemini_api_key(&db_pool, &toml_config).await? {
        Some((key, source)) => {
            migrate_key_to_database(&db_pool, &key, source).await?;
            Some(key)
        }
        None => None,
    };

    let generator: Arc<dyn GenerationAdapter> = Arc::new(
        GeminiClient::new(api_key, toml_config.embedding_dimension)
            .context("Failed to build generation client")?,
    );

    let vector_store: Arc<dyn VectorStore> = match &toml_config.qdrant_url {
        Some(url) => Arc::new(
            QdrantStore::connect(url, &toml_config.qdrant_collection, toml_config.embedding_dimension)
                .await
                .context("Failed to connect to vector index")?,
        ),
        None => {
            info!("No qdrant_url configured, using in-memory vector index");
            Arc::new(InMemoryVectorStore::new(toml_config.embedding_dimension))
        }
    };

    ensure_dimensions_match(generator.as_ref(), vector_store.as_ref())
        .context("Embedding dimension check failed")?;

    let extractor = Arc::new(RoutingExtractor::new(
        Arc::new(YoutubeExtractor::new().context("Failed to build YouTube extractor")?),
        Arc::new(WebExtractor::new().context("Failed to build content extractor")?),
    ));

    let uploads = UploadStore::open(root_folder.join("uploads"))
        .await
        .context("Failed to prepare upload folder")?;
    info!("Uploads: {}", uploads.dir().display());

    let event_bus = EventBus::new(EVENT_BUS_CAPACITY);
    let (queue, receiver) = TaskQueue::new();
    let orchestrator = Arc::new(Orchestrator::new(
        db_pool.clone(),
        event_bus.clone(),
        queue,
        extractor,
        generator,
        vector_store,
        uploads,
        PipelineConfig {
            cards_per_source: toml_config.cards_per_source,
            embedding_concurrency: toml_config.embedding_concurrency,
        },
    ));

    // Queue leftover work before any worker can race it
    orchestrator
        .recover_interrupted()
        .await
        .context("Failed to recover interrupted pipeline work")?;

    let shutdown = CancellationToken::new();
    let workers = WorkerPool::spawn(
        Arc::clone(&orchestrator),
        receiver,
        toml_config.worker_count,
        shutdown.clone(),
    );

    let state = AppState::new(db_pool, event_bus, orchestrator);
    let app = recall_forge::build_router(state);

    let port = args.port.unwrap_or(toml_config.port);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    shutdown.cancel();
    workers.join().await;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
