use std::sync::Arc;

use chrono::FixedOffset;
use config::AppConfig;
use domain::VoiceLogRepository;
use sqlx::PgPool;
use thiserror::Error;

use crate::{
    migrations::MIGRATOR,
    repository::{create_pg_pool, PgVoiceLogRepository},
    retry::{is_transient_sqlx_error, retry_async, RetryConfig},
};

#[derive(Debug, Clone)]
pub struct InfrastructureConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub utc_offset: FixedOffset,
    pub connect_retry: RetryConfig,
}

impl InfrastructureConfig {
    pub fn from_app_config(config: &AppConfig) -> Result<Self, InfrastructureError> {
        let utc_offset = config
            .tracker
            .fixed_offset()
            .map_err(|err| InfrastructureError::Config(err.to_string()))?;
        Ok(Self {
            database_url: config.database.url.clone(),
            max_connections: config.database.max_connections,
            utc_offset,
            connect_retry: RetryConfig {
                max_attempts: config.database.connect_attempts.max(1),
                ..RetryConfig::default()
            },
        })
    }
}

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("configuration error: {0}")]
    Config(String),
}

#[derive(Clone)]
pub struct Infrastructure {
    pub pool: PgPool,
    pub repository: Arc<PgVoiceLogRepository>,
}

impl Infrastructure {
    /// 连接数据库、执行迁移并构建仓储
    pub async fn connect(config: InfrastructureConfig) -> Result<Self, InfrastructureError> {
        let pool = retry_async(&config.connect_retry, is_transient_sqlx_error, || {
            create_pg_pool(&config.database_url, config.max_connections)
        })
        .await?;
        MIGRATOR.run(&pool).await?;
        tracing::info!("database migrations applied");

        let repository = Arc::new(PgVoiceLogRepository::new(pool.clone(), config.utc_offset));
        Ok(Self { pool, repository })
    }

    pub fn repository_trait(&self) -> Arc<dyn VoiceLogRepository> {
        self.repository.clone()
    }
}
