//! Contagem Worker
//!
//! Consumes counting-result events from an Azure Event Hub and records each
//! result as a `HistoricoContagem` row, checkpointing every event in a blob
//! container.

pub mod config;
pub mod error;
pub mod machine;
pub mod models;
pub mod repository;
pub mod worker;

pub use config::WorkerConfig;
pub use error::{Result, WorkerError};
pub use models::{ContagemEventData, HistoricoContagem};
pub use repository::{ContagemRepository, PostgresContagemRepository};
pub use worker::{ContagemEventHandler, EventOutcome, WorkerHost};
