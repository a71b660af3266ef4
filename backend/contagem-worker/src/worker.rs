//! Event handler and hosted run loop of the worker

use crate::models::ContagemEventData;
use crate::repository::ContagemRepository;
use async_trait::async_trait;
use chrono::Local;
use eventhub_processor::{
    EventHandler, EventProcessorClient, ProcessErrorArgs, ProcessEventArgs, ProcessorResult,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// What happened to one event before its checkpoint was written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Row inserted
    Persisted,
    /// Payload was not a valid result, nothing written
    InvalidPayload,
    /// Payload was valid but the insert failed; the result is lost
    PersistFailed,
}

/// Handles counting-result events: deserialize, persist, checkpoint.
///
/// The checkpoint advances whatever the outcome, so a failed insert is not
/// redelivered.
pub struct ContagemEventHandler {
    repository: Arc<dyn ContagemRepository>,
}

impl ContagemEventHandler {
    pub fn new(repository: Arc<dyn ContagemRepository>) -> Self {
        Self { repository }
    }

    /// Deserialize and persist one event body. Never fails; failures are logged.
    pub async fn process(&self, body: &str) -> EventOutcome {
        info!(payload = %body, "Event received");

        let resultado = match ContagemEventData::from_json(body) {
            Ok(resultado) => resultado,
            Err(e) => {
                error!(error = %e, "Invalid data for counting result");
                return EventOutcome::InvalidPayload;
            }
        };

        match self.repository.save(&resultado).await {
            Ok(()) => {
                info!(valor_atual = resultado.valor_atual, "Result recorded successfully");
                EventOutcome::Persisted
            }
            Err(e) => {
                error!(error = %e, "Error while recording result");
                EventOutcome::PersistFailed
            }
        }
    }
}

#[async_trait]
impl EventHandler for ContagemEventHandler {
    async fn handle_event(&self, args: ProcessEventArgs) -> ProcessorResult<()> {
        let outcome = self.process(&args.data.body_as_str()).await;

        debug!(
            partition = %args.partition.partition_id,
            sequence_number = args.data.sequence_number,
            ?outcome,
            "Event handled, updating checkpoint"
        );

        args.update_checkpoint().await
    }

    async fn handle_error(&self, args: ProcessErrorArgs) {
        error!(
            partition = args.partition_id.as_deref().unwrap_or("-"),
            operation = args.operation,
            error = %args.error,
            "Event processing error"
        );
    }
}

/// Hosted lifecycle around the event processor
pub struct WorkerHost {
    processor: Arc<EventProcessorClient>,
    liveness_interval: Duration,
}

impl WorkerHost {
    pub fn new(processor: Arc<EventProcessorClient>, liveness_interval: Duration) -> Self {
        Self {
            processor,
            liveness_interval,
        }
    }

    /// Keep the processor running and log liveness until shutdown is requested.
    ///
    /// Each round (re)starts the processor, which is a no-op while it runs.
    pub async fn execute(&self, mut shutdown_rx: watch::Receiver<bool>) {
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            self.processor.start_processing();
            info!("Worker active at: {}", Local::now().format("%Y-%m-%d %H:%M"));

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        // sender gone, nobody can ask us to stop anymore
                        break;
                    }
                }
                _ = tokio::time::sleep(self.liveness_interval) => {}
            }
        }
    }

    /// Stop the processor; returns once no handler is running
    pub async fn stop(&self) {
        info!("Stopping worker...");
        self.processor.stop_processing().await;
    }

    /// `execute` followed by `stop`
    pub async fn run(&self, shutdown_rx: watch::Receiver<bool>) {
        self.execute(shutdown_rx).await;
        self.stop().await;
    }
}
