//! Logging service (tasktrack-log) - Main entry point
//!
//! Drains the log side-channel queue into the database.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use tasktrack_common::api::shutdown_signal;
use tasktrack_common::broker::build_broker;
use tasktrack_common::config::{CommonArgs, ServiceDefaults};
use tasktrack_common::consumer::{Consumer, ConsumerExit};

use tasktrack_log::sink::{log_spec, LogSinkHandler};
use tasktrack_log::{build_router, db, AppState, MODULE_NAME};

const DEFAULTS: ServiceDefaults = ServiceDefaults {
    name: "log",
    port: 5007,
    service_name: "logging-service",
};

/// Command-line arguments for tasktrack-log
#[derive(Parser, Debug)]
#[command(name = "tasktrack-log")]
#[command(about = "Log side-channel sink for TaskTrack")]
#[command(version)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,
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

    info!("Starting {} on port {}", MODULE_NAME, settings.port);
    info!("Database: {}", settings.database.display());

    let pool = tasktrack_common::db::open_database(&settings.database)
        .await
        .context("Failed to open database")?;
    db::init_schema(&pool)
        .await
        .context("Failed to initialize database schema")?;

    let spec = log_spec(&settings.log_queue);
    let broker = build_broker(
        settings.broker_kind,
        &settings.broker.url,
        Arc::new(settings.broker.backoff()),
        vec![spec.binding.clone()],
    );
    broker
        .connect()
        .await
        .context("Failed to connect to message broker")?;
    info!(kind = ?settings.broker_kind, queue = %settings.log_queue, "Message broker connected");

    // No side-channel publisher: this consumer must not feed its own queue
    let consumer = Consumer::new(
        broker.clone(),
        spec,
        Arc::new(LogSinkHandler::new(pool.clone())),
        None,
    );
    let (_, consumer_handle) = consumer.spawn();
    tokio::spawn(async move {
        match consumer_handle.await {
            Ok(ConsumerExit::BindFailed(e)) => error!(error = %e, "Log consumer could not bind"),
            Ok(exit) => warn!(?exit, "Log consumer stopped"),
            Err(e) => error!(error = %e, "Log consumer panicked"),
        }
    });

    let app = build_router(AppState::new(pool, broker, settings.service_name.clone()));

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
