//! Notification service (tasktrack-notify) - Main entry point
//!
//! Consumes every domain event, stores it as a notification and pushes it to
//! the recipient's realtime room.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use tasktrack_common::api::shutdown_signal;
use tasktrack_common::broker::{build_broker, QueueBinding};
use tasktrack_common::config::{pick, CommonArgs, ServiceDefaults};
use tasktrack_common::consumer::{Consumer, ConsumerExit};
use tasktrack_common::events::routing;
use tasktrack_common::logchannel::LogPublisher;

use tasktrack_notify::fanout::{fanout_spec, FanoutHandler, NOTIFICATION_QUEUE};
use tasktrack_notify::{build_router, db, AppState, RealtimeHub};

const DEFAULTS: ServiceDefaults = ServiceDefaults {
    name: "notify",
    port: 5005,
    service_name: "notification-service",
};

/// Command-line arguments for tasktrack-notify
#[derive(Parser, Debug)]
#[command(name = "tasktrack-notify")]
#[command(about = "Notification service for TaskTrack")]
#[command(version)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Exchange carrying domain events
    #[arg(long, env = "EXCHANGE_NAME")]
    exchange: Option<String>,

    /// Queue bound to the routing-key catalog
    #[arg(long, env = "QUEUE_NAME")]
    queue: Option<String>,
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

    let exchange = pick(
        args.exchange,
        settings.file.exchange.clone(),
        routing::NOTIFICATION_EXCHANGE.to_string(),
    );
    let queue = pick(args.queue, settings.file.queue.clone(), NOTIFICATION_QUEUE.to_string());

    info!("Starting TaskTrack notification service on port {}", settings.port);
    info!("Database: {}", settings.database.display());

    let pool = tasktrack_common::db::open_database(&settings.database)
        .await
        .context("Failed to open database")?;
    db::init_schema(&pool)
        .await
        .context("Failed to initialize database schema")?;

    let spec = fanout_spec(&exchange, &queue);
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
    let hub = RealtimeHub::new();

    let consumer = Consumer::new(
        broker,
        spec,
        Arc::new(FanoutHandler::new(pool.clone(), hub.clone())),
        Some(log),
    );
    let (_, consumer_handle) = consumer.spawn();
    tokio::spawn(async move {
        match consumer_handle.await {
            Ok(ConsumerExit::BindFailed(e)) => error!(error = %e, "Fan-out consumer could not bind"),
            Ok(exit) => warn!(?exit, "Fan-out consumer stopped"),
            Err(e) => error!(error = %e, "Fan-out consumer panicked"),
        }
    });

    let app = build_router(AppState::new(pool, hub));

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
