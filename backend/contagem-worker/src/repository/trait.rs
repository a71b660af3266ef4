use crate::error::Result;
use crate::models::ContagemEventData;
use async_trait::async_trait;

/// Persists counting results
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContagemRepository: Send + Sync {
    /// Insert one `HistoricoContagem` row for the result
    async fn save(&self, resultado: &ContagemEventData) -> Result<()>;
}
