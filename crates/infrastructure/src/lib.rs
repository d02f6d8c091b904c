//! 基础设施层实现。
//!
//! 提供 PostgreSQL 仓储、数据库迁移与启动时的连接构建，实现领域层定义的接口。

pub mod builder;
pub mod migrations;
pub mod repository;
pub mod retry;

pub use builder::{Infrastructure, InfrastructureConfig, InfrastructureError};
pub use migrations::MIGRATOR;
pub use repository::{create_pg_pool, PgVoiceLogRepository};
pub use retry::{retry_async, Backoff, RetryConfig};
