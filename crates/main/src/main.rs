//! 主应用程序入口
//!
//! 加载配置、连接数据库，然后启动 Discord 网关。

use std::sync::Arc;

use application::{Clock, RankingService, SystemClock, VoiceLifecycleHandler};
use config::AppConfig;
use domain::ChannelId;
use gateway::VoiceLogBot;
use infrastructure::{Infrastructure, InfrastructureConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load()?;
    tracing::info!(config = %config.sanitize(), "configuration loaded");

    let infra = Infrastructure::connect(InfrastructureConfig::from_app_config(&config)?).await?;
    let repository = infra.repository_trait();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(config.tracker.fixed_offset()?));

    let lifecycle = Arc::new(VoiceLifecycleHandler::new(
        ChannelId(config.discord.voice_channel_id),
        repository.clone(),
        clock.clone(),
    ));

    if config.tracker.restore_open_sessions {
        let report = lifecycle.restore_open_sessions().await?;
        tracing::info!(
            restored = report.restored,
            closed_duplicates = report.closed_duplicates,
            "open sessions restored from storage"
        );
    }

    let ranking = Arc::new(
        RankingService::new(
            repository,
            clock,
            ChannelId(config.discord.text_channel_id),
        )
        .with_default_days(config.tracker.default_ranking_days),
    );

    let bot = VoiceLogBot::new(lifecycle, ranking);
    tracing::info!(
        voice_channel_id = config.discord.voice_channel_id,
        text_channel_id = config.discord.text_channel_id,
        "starting discord gateway"
    );

    gateway::run(&config.discord.token, bot, async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    })
    .await?;

    infra.pool.close().await;
    tracing::info!("voicelog stopped");
    Ok(())
}
