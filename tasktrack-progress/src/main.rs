//! Progress service (tasktrack-progress) - Main entry point
//!
//! Seeds progress rows from task-creation events, serves the progress REST
//! surface and republishes status changes to task-owning services.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tower_http::services::ServeDir;
use tracing::{error, info, warn};

use tasktrack_common::api::shutdown_signal;
use tasktrack_common::broker::{build_broker, QueueBinding};
use tasktrack_common::config::{default_data_dir, pick, CommonArgs, ServiceDefaults};
use tasktrack_common::consumer::{Consumer, ConsumerExit};
use tasktrack_common::events::routing;
use tasktrack_common::logchannel::LogPublisher;
use tasktrack_common::publisher::EventPublisher;

use tasktrack_progress::collaborators::{HttpUserDirectory, LocalDocumentStore};
use tasktrack_progress::ingestion::{ingestion_spec, IngestionHandler, INGESTION_QUEUE};
use tasktrack_progress::republisher::StatusRepublisher;
use tasktrack_progress::{build_router, db, AppState, ProgressService};

const DEFAULTS: ServiceDefaults = ServiceDefaults {
    name: "progress",
    port: 5003,
    service_name: "progress-service",
};

/// Command-line arguments for tasktrack-progress
#[derive(Parser, Debug)]
#[command(name = "tasktrack-progress")]
#[command(about = "Progress tracking service for TaskTrack")]
#[command(version)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Exchange receiving notification events
    #[arg(long, env = "EXCHANGE_NAME")]
    exchange: Option<String>,

    /// Exchange carrying task-creation and status events
    #[arg(long, env = "PROGRESS_EXCHANGE")]
    progress_exchange: Option<String>,

    /// Queue bound to the task-creation keys
    #[arg(long, env = "QUEUE_NAME")]
    queue: Option<String>,

    /// Base URL of the user service
    #[arg(long, env = "USER_SERVICE_URL")]
    user_service_url: Option<String>,

    /// Directory for uploaded progress documents
    #[arg(long, env = "DOCUMENT_ROOT")]
    document_root: Option<std::path::PathBuf>,

    /// Public URL prefix of uploaded documents
    #[arg(long, env = "DOCUMENT_BASE_URL")]
    document_base_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let settings = args
        .common
        .resolve(&DEFAULTS)
        .context("Failed to load configuration")?;
    tasktrack_common::config::init_tracing(&settings.log_level);
    tasktrack_common::api::init_metrics().context("Failed to install metrics recorder")?;

    let file = &settings.file;
    let notification_exchange = pick(
        args.exchange,
        file.exchange.clone(),
        routing::NOTIFICATION_EXCHANGE.to_string(),
    );
    let progress_exchange = args
        .progress_exchange
        .unwrap_or_else(|| routing::PROGRESS_EXCHANGE.to_string());
    let queue = pick(args.queue, file.queue.clone(), INGESTION_QUEUE.to_string());
    let user_service_url = pick(
        args.user_service_url,
        file.user_service_url.clone(),
        "http://localhost:5001".to_string(),
    );
    let document_root = pick(
        args.document_root,
        file.document_root.clone(),
        default_data_dir().join("documents"),
    );
    let document_base_url = pick(
        args.document_base_url,
        file.document_base_url.clone(),
        format!("http://localhost:{}/documents", settings.port),
    );

    info!("Starting TaskTrack progress service on port {}", settings.port);
    info!("Database: {}", settings.database.display());

    let pool = tasktrack_common::db::open_database(&settings.database)
        .await
        .context("Failed to open database")?;
    db::init_schema(&pool)
        .await
        .context("Failed to initialize database schema")?;

    let spec = ingestion_spec(&progress_exchange, &queue);
    let broker = build_broker(
        settings.broker_kind,
        &settings.broker.url,
        Arc::new(settings.broker.backoff()),
        vec![spec.binding.clone(), QueueBinding::plain(&settings.log_queue)],
    );
    broker
        .connect()
        .await
        .context("Failed to connect to message broker")?;
    info!(kind = ?settings.broker_kind, "Message broker connected");

    let log = LogPublisher::connect(broker.clone(), &settings.log_queue, &settings.service_name).await;

    let consumer = Consumer::new(
        broker.clone(),
        spec,
        Arc::new(IngestionHandler::new(pool.clone())),
        Some(log.clone()),
    );
    let (_, consumer_handle) = consumer.spawn();
    tokio::spawn(async move {
        match consumer_handle.await {
            Ok(ConsumerExit::BindFailed(e)) => error!(error = %e, "Ingestion consumer could not bind"),
            Ok(exit) => warn!(?exit, "Ingestion consumer stopped"),
            Err(e) => error!(error = %e, "Ingestion consumer panicked"),
        }
    });

    let users = HttpUserDirectory::new(&user_service_url).context("Failed to build user service client")?;
    let documents = LocalDocumentStore::new(document_root.clone(), &document_base_url);

    let service = ProgressService::new(
        pool,
        EventPublisher::new(broker.clone(), &notification_exchange, log.clone()),
        StatusRepublisher::new(EventPublisher::new(broker, &progress_exchange, log)),
        Arc::new(users),
        Arc::new(documents),
        &settings.service_name,
    );

    let app = build_router(AppState::new(Arc::new(service)))
        .nest_service("/documents", ServeDir::new(document_root));

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}
