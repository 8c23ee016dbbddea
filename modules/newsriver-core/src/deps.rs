use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;

use crate::config::AppConfig;

/// Dyn-compatible embedding trait. The concrete HTTP client lives in
/// `embed-client`; tests substitute a deterministic double.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Embed a batch of inputs; vectors align to input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Central dependency container passed to all stages.
#[derive(Clone)]
pub struct PipelineDeps {
    pub db_pool: PgPool,
    pub http_client: reqwest::Client,
    pub embedding_service: Arc<dyn EmbeddingService>,
    pub config: AppConfig,
}

impl PipelineDeps {
    pub fn new(
        db_pool: PgPool,
        http_client: reqwest::Client,
        embedding_service: Arc<dyn EmbeddingService>,
        config: AppConfig,
    ) -> Self {
        Self {
            db_pool,
            http_client,
            embedding_service,
            config,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.db_pool
    }
}
