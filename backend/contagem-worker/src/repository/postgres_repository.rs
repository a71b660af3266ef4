use crate::error::Result;
use crate::models::{ContagemEventData, HistoricoContagem};
use crate::repository::ContagemRepository;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Connection, PgConnection};
use tracing::debug;

/// Writes results into `HistoricoContagem`, one short-lived connection per insert
#[derive(Clone)]
pub struct PostgresContagemRepository {
    database_url: String,
    consumer: String,
    event_hub: String,
}

impl PostgresContagemRepository {
    /// `consumer` and `event_hub` are stamped on every row
    pub fn new(database_url: impl Into<String>, consumer: impl Into<String>, event_hub: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            consumer: consumer.into(),
            event_hub: event_hub.into(),
        }
    }

    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    /// Apply the bundled migrations
    pub async fn migrate(&self) -> Result<()> {
        let mut conn = PgConnection::connect(&self.database_url).await?;
        sqlx::migrate!("./migrations").run(&mut conn).await?;
        conn.close().await?;
        Ok(())
    }

    async fn insert(&self, row: &HistoricoContagem) -> Result<()> {
        let mut conn = PgConnection::connect(&self.database_url).await?;

        sqlx::query(
            r#"
            INSERT INTO "HistoricoContagem" (
                "DataProcessamento", "ValorAtual", "Producer", "Consumer",
                "EventHub", "Mensagem", "Kernel", "TargetFramework"
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(row.data_processamento)
        .bind(row.valor_atual)
        .bind(&row.producer)
        .bind(&row.consumer)
        .bind(&row.event_hub)
        .bind(&row.mensagem)
        .bind(&row.kernel)
        .bind(&row.target_framework)
        .execute(&mut conn)
        .await?;

        conn.close().await?;
        Ok(())
    }
}

impl std::fmt::Debug for PostgresContagemRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresContagemRepository")
            .field("consumer", &self.consumer)
            .field("event_hub", &self.event_hub)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ContagemRepository for PostgresContagemRepository {
    async fn save(&self, resultado: &ContagemEventData) -> Result<()> {
        let row = HistoricoContagem::new(resultado, Utc::now(), &self.consumer, &self.event_hub);
        self.insert(&row).await?;

        debug!(
            valor_atual = row.valor_atual,
            consumer = %row.consumer,
            event_hub = %row.event_hub,
            "Inserted HistoricoContagem row"
        );
        Ok(())
    }
}
