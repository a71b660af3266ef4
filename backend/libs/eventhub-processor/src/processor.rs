//! Event processor client: dispatches events from a source to a handler
//!
//! # Processing guarantees
//!
//! - **At-least-once**: an event is redelivered after restart unless its
//!   checkpoint was written
//! - **Ordering per partition**: events are dispatched one at a time
//! - **Errors never stop the loop**: receive, checkpoint and handler failures
//!   are reported through [`EventHandler::handle_error`]
//! - **Cooperative stop**: [`EventProcessorClient::stop_processing`] lets the
//!   in-flight handler finish and dispatches nothing afterwards

use crate::checkpoint::{Checkpoint, CheckpointStore, ProcessorIdentity};
use crate::error::{ProcessorError, ProcessorResult};
use crate::source::{EventData, EventSource};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Partition an event was read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionContext {
    pub identity: ProcessorIdentity,
    pub partition_id: String,
}

/// Writes the checkpoint of a processed event
#[async_trait]
pub trait Checkpointer: Send + Sync {
    async fn update_checkpoint(
        &self,
        partition: &PartitionContext,
        event: &EventData,
    ) -> ProcessorResult<()>;
}

/// Arguments handed to [`EventHandler::handle_event`]
pub struct ProcessEventArgs {
    pub partition: PartitionContext,
    pub data: EventData,
    checkpointer: Arc<dyn Checkpointer>,
}

impl ProcessEventArgs {
    pub fn new(partition: PartitionContext, data: EventData, checkpointer: Arc<dyn Checkpointer>) -> Self {
        Self {
            partition,
            data,
            checkpointer,
        }
    }

    /// Mark this event as processed for its partition
    pub async fn update_checkpoint(&self) -> ProcessorResult<()> {
        self.checkpointer
            .update_checkpoint(&self.partition, &self.data)
            .await
    }
}

/// Arguments handed to [`EventHandler::handle_error`]
#[derive(Debug)]
pub struct ProcessErrorArgs {
    /// Partition involved, `None` when the failure is not tied to one
    pub partition_id: Option<String>,
    /// Short name of the failed operation
    pub operation: &'static str,
    pub error: ProcessorError,
}

/// Callbacks invoked by the processor
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Process one event. Returned errors are routed to [`EventHandler::handle_error`].
    async fn handle_event(&self, args: ProcessEventArgs) -> ProcessorResult<()>;

    /// Observe a processing error. The processor keeps running afterwards.
    async fn handle_error(&self, args: ProcessErrorArgs);
}

/// Tuning knobs of the dispatch loop
#[derive(Debug, Clone)]
pub struct EventProcessorOptions {
    /// Pause after a receive error before receiving again
    pub error_pause: Duration,
}

impl Default for EventProcessorOptions {
    fn default() -> Self {
        Self {
            error_pause: Duration::from_secs(1),
        }
    }
}

/// Last checkpointed sequence number per partition, `None` when the store had nothing
#[derive(Debug, Default)]
struct PartitionPositions {
    sequence_numbers: Mutex<HashMap<String, Option<i64>>>,
}

impl PartitionPositions {
    fn get(&self, partition_id: &str) -> Option<Option<i64>> {
        self.sequence_numbers
            .lock()
            .ok()
            .and_then(|p| p.get(partition_id).copied())
    }

    fn set(&self, partition_id: &str, sequence_number: Option<i64>) {
        if let Ok(mut sequence_numbers) = self.sequence_numbers.lock() {
            sequence_numbers.insert(partition_id.to_string(), sequence_number);
        }
    }
}

/// Checkpointer writing to the store first, then to the source
struct StoreCheckpointer {
    store: Arc<dyn CheckpointStore>,
    source: Arc<dyn EventSource>,
    positions: Arc<PartitionPositions>,
}

#[async_trait]
impl Checkpointer for StoreCheckpointer {
    async fn update_checkpoint(
        &self,
        partition: &PartitionContext,
        event: &EventData,
    ) -> ProcessorResult<()> {
        let checkpoint = Checkpoint {
            identity: partition.identity.clone(),
            partition_id: partition.partition_id.clone(),
            sequence_number: event.sequence_number,
            offset: None,
        };
        self.store.update_checkpoint(&checkpoint).await?;
        self.positions
            .set(&partition.partition_id, Some(event.sequence_number));

        if let Err(e) = self
            .source
            .store_offset(&partition.partition_id, event.sequence_number)
        {
            // the blob checkpoint is authoritative; the group offset only tracks lag
            warn!(
                partition = %partition.partition_id,
                sequence_number = event.sequence_number,
                error = %e,
                "Failed to store consumer group offset"
            );
        }
        Ok(())
    }
}

struct RunningLoop {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Shared state of the dispatch loop
struct Dispatcher {
    identity: ProcessorIdentity,
    source: Arc<dyn EventSource>,
    store: Arc<dyn CheckpointStore>,
    handler: Arc<dyn EventHandler>,
    positions: Arc<PartitionPositions>,
    checkpointer: Arc<dyn Checkpointer>,
    options: EventProcessorOptions,
}

/// Client binding an event source, a checkpoint store and an event handler.
///
/// States: stopped → processing → stopped. Starting an already running
/// client is a no-op, as is stopping a stopped one.
pub struct EventProcessorClient {
    dispatcher: Arc<Dispatcher>,
    running: Mutex<Option<RunningLoop>>,
}

impl EventProcessorClient {
    pub fn new(
        identity: ProcessorIdentity,
        source: Arc<dyn EventSource>,
        store: Arc<dyn CheckpointStore>,
        handler: Arc<dyn EventHandler>,
        options: EventProcessorOptions,
    ) -> Self {
        let positions = Arc::new(PartitionPositions::default());
        let checkpointer: Arc<dyn Checkpointer> = Arc::new(StoreCheckpointer {
            store: store.clone(),
            source: source.clone(),
            positions: positions.clone(),
        });

        Self {
            dispatcher: Arc::new(Dispatcher {
                identity,
                source,
                store,
                handler,
                positions,
                checkpointer,
                options,
            }),
            running: Mutex::new(None),
        }
    }

    /// Whether the dispatch loop is currently running
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .map(|r| r.as_ref().is_some_and(|l| !l.handle.is_finished()))
            .unwrap_or(false)
    }

    /// Start the dispatch loop on a background task.
    ///
    /// Returns `true` when a loop was started, `false` when one was already running.
    /// Must be called from within a tokio runtime.
    pub fn start_processing(&self) -> bool {
        let Ok(mut running) = self.running.lock() else {
            return false;
        };

        if running.as_ref().is_some_and(|l| !l.handle.is_finished()) {
            return false;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let dispatcher = self.dispatcher.clone();
        let handle = tokio::spawn(async move { dispatcher.run(shutdown_rx).await });

        info!(
            event_hub = %self.dispatcher.identity.event_hub_name,
            consumer_group = %self.dispatcher.identity.consumer_group,
            "Event processor started"
        );

        *running = Some(RunningLoop {
            shutdown_tx,
            handle,
        });
        true
    }

    /// Stop the dispatch loop and wait for the in-flight handler to finish
    pub async fn stop_processing(&self) {
        let running = self.running.lock().ok().and_then(|mut r| r.take());

        let Some(running) = running else {
            debug!("Event processor already stopped");
            return;
        };

        let _ = running.shutdown_tx.send(true);
        if let Err(e) = running.handle.await {
            error!(error = %e, "Event processor task ended abnormally");
        }

        info!(
            event_hub = %self.dispatcher.identity.event_hub_name,
            "Event processor stopped"
        );
    }
}

impl Dispatcher {
    async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let received = tokio::select! {
                biased;
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                    continue;
                }
                received = self.source.receive() => received,
            };

            match received {
                Ok(event) => {
                    if *shutdown_rx.borrow() {
                        debug!(
                            partition = %event.partition_id,
                            sequence_number = event.sequence_number,
                            "Stop requested, event not dispatched"
                        );
                        break;
                    }
                    self.dispatch(event).await;
                }
                Err(ProcessorError::SourceClosed) => {
                    info!("Event source closed, processor loop exiting");
                    break;
                }
                Err(e) => {
                    self.report(None, "Receive", e).await;

                    tokio::select! {
                        _ = shutdown_rx.changed() => {}
                        _ = tokio::time::sleep(self.options.error_pause) => {}
                    }
                }
            }
        }
    }

    async fn dispatch(&self, event: EventData) {
        let partition_id = event.partition_id.clone();

        let checkpointed = match self.positions.get(&partition_id) {
            Some(known) => known,
            None => {
                let loaded = match self
                    .store
                    .get_checkpoint(&self.identity, &partition_id)
                    .await
                {
                    Ok(checkpoint) => checkpoint.map(|c| {
                        info!(
                            partition = %partition_id,
                            sequence_number = c.sequence_number,
                            offset = ?c.offset,
                            "Resuming partition from checkpoint"
                        );
                        c.sequence_number
                    }),
                    Err(e) => {
                        self.report(Some(partition_id.clone()), "LoadCheckpoint", e)
                            .await;
                        None
                    }
                };
                self.positions.set(&partition_id, loaded);
                loaded
            }
        };

        if let Some(checkpointed) = checkpointed {
            if event.sequence_number <= checkpointed {
                debug!(
                    partition = %partition_id,
                    sequence_number = event.sequence_number,
                    checkpointed,
                    "Skipping event at or before checkpoint"
                );
                if let Err(e) = self.source.seek(&partition_id, checkpointed + 1).await {
                    self.report(Some(partition_id), "Seek", e).await;
                }
                return;
            }
        }

        let args = ProcessEventArgs::new(
            PartitionContext {
                identity: self.identity.clone(),
                partition_id: partition_id.clone(),
            },
            event,
            self.checkpointer.clone(),
        );

        if let Err(e) = self.handler.handle_event(args).await {
            self.report(Some(partition_id), "ProcessEvent", e).await;
        }
    }

    async fn report(&self, partition_id: Option<String>, operation: &'static str, error: ProcessorError) {
        self.handler
            .handle_error(ProcessErrorArgs {
                partition_id,
                operation,
                error,
            })
            .await;
    }
}
