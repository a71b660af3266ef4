//! Contagem Worker - Event Hubs consumer recording counting results
//!
//! Environment variables (`.env` is loaded when present):
//! - ConnectionStrings__BaseContagem: PostgreSQL URL of the results database
//! - AzureEventHubs__EventHubsConnectionString: Event Hubs namespace connection string
//! - AzureEventHubs__EventHub: Event hub to consume
//! - AzureEventHubs__ConsumerGroup: Consumer group (default: "$Default")
//! - AzureEventHubs__BlobStorageConnectionString: Storage account holding checkpoints
//! - AzureEventHubs__BlobContainer: Checkpoint container
//! - IntervaloMensagemWorkerAtivo: Liveness log interval in ms (default: 60000)
//! - RUN_MIGRATIONS: Apply migrations at startup (default: false)
//! - LOG_FORMAT: "json" for JSON log lines

use anyhow::{Context, Result};
use contagem_worker::machine::machine_name;
use contagem_worker::{ContagemEventHandler, PostgresContagemRepository, WorkerConfig, WorkerHost};
use eventhub_processor::EventProcessorClient;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting Contagem Worker");

    let config = WorkerConfig::from_env().context("Failed to load configuration")?;
    info!(
        event_hub = %config.event_hubs.event_hub,
        consumer_group = %config.event_hubs.consumer_group,
        blob_container = %config.event_hubs.blob_container,
        liveness_interval_ms = config.liveness_interval.as_millis() as u64,
        "Configuration loaded"
    );

    let repository = PostgresContagemRepository::new(
        config.database_url.clone(),
        machine_name(),
        config.event_hubs.event_hub.clone(),
    );
    info!(consumer = %repository.consumer(), "Result writer ready");

    if config.run_migrations {
        repository
            .migrate()
            .await
            .context("Failed to run database migrations")?;
        info!("Database migrations applied");
    }

    let handler = Arc::new(ContagemEventHandler::new(Arc::new(repository)));
    let processor = EventProcessorClient::for_event_hubs(&config.processor_settings(), handler)
        .context("Failed to create event processor")?;

    let host = WorkerHost::new(Arc::new(processor), config.liveness_interval);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    host.run(shutdown_rx).await;

    info!("Contagem Worker stopped");
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "contagem_worker=info,eventhub_processor=info".into());

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }

    info!("Shutting down gracefully...");
}
