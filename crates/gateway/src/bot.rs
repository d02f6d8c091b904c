use std::future::Future;
use std::sync::Arc;

use application::{
    MemberDirectory, RankingService, ReconcileReport, RosterEntry, VoiceLifecycleHandler,
};
use async_trait::async_trait;
use domain::{ChannelId as TrackedChannel, ExternalId};
use serenity::all::{
    Cache, ChannelId, Client, Command, CommandInteraction, CommandOptionType, Context,
    CreateCommand, CreateCommandOption, CreateInteractionResponse,
    CreateInteractionResponseFollowup, CreateInteractionResponseMessage, EventHandler,
    GatewayIntents, GuildId, Interaction, Ready, ResumedEvent, UserId, VoiceState,
};
use tracing::{debug, error, info, warn};

use crate::error::GatewayError;
use crate::translate::{days_argument, split_reply, voice_transition, MESSAGE_LIMIT};

pub const RANKING_COMMAND: &str = "ranking";

/// 只查网关缓存解析显示名，不发 HTTP 请求
struct CacheDirectory<'a> {
    cache: &'a Cache,
}

#[async_trait]
impl MemberDirectory for CacheDirectory<'_> {
    async fn display_name(&self, member: &ExternalId) -> Option<String> {
        let id = member.as_str().parse::<u64>().ok().filter(|id| *id != 0)?;
        self.cache
            .user(UserId::new(id))
            .map(|user| user.display_name().to_string())
    }
}

/// serenity 事件处理器
pub struct VoiceLogBot {
    lifecycle: Arc<VoiceLifecycleHandler>,
    ranking: Arc<RankingService>,
}

impl VoiceLogBot {
    pub fn new(lifecycle: Arc<VoiceLifecycleHandler>, ranking: Arc<RankingService>) -> Self {
        Self { lifecycle, ranking }
    }

    async fn on_voice_state(
        &self,
        ctx: &Context,
        old: Option<VoiceState>,
        new: VoiceState,
    ) -> Result<(), GatewayError> {
        let (display_name, is_bot) = match new.member.as_ref() {
            Some(member) => (Some(member.display_name().to_string()), member.user.bot),
            None => {
                let is_bot = match new.user_id.to_user(ctx).await {
                    Ok(user) => user.bot,
                    Err(err) => {
                        warn!(user_id = %new.user_id, error = %err, "could not fetch user, assuming human");
                        false
                    }
                };
                (None, is_bot)
            }
        };

        let transition = voice_transition(
            new.user_id.get(),
            display_name,
            is_bot,
            old.and_then(|state| state.channel_id).map(|id| id.get()),
            new.channel_id.map(|id| id.get()),
        );
        let outcome = self.lifecycle.handle_transition(transition).await?;
        debug!(user_id = %new.user_id, outcome = ?outcome, "voice state handled");
        Ok(())
    }

    /// 读取被追踪频道的当前名单并修复追踪器
    async fn reconcile_roster(&self, ctx: &Context) -> Result<ReconcileReport, GatewayError> {
        let tracked = self.lifecycle.tracked_channel();
        let channel = ChannelId::new(tracked.0).to_channel(ctx).await?;
        let channel = channel
            .guild()
            .ok_or(GatewayError::NotGuildChannel(tracked.0))?;

        let roster: Vec<RosterEntry> = channel
            .members(&ctx.cache)?
            .into_iter()
            .map(|member| RosterEntry {
                member: ExternalId::from(member.user.id.get()),
                display_name: Some(member.display_name().to_string()),
                is_bot: member.user.bot,
            })
            .collect();

        let directory = CacheDirectory { cache: &ctx.cache };
        let report = self.lifecycle.reconcile(roster, &directory).await?;
        Ok(report)
    }

    async fn register_commands(&self, ctx: &Context) -> Result<(), GatewayError> {
        let command = CreateCommand::new(RANKING_COMMAND)
            .description("ランキングを表示します")
            .add_option(
                CreateCommandOption::new(CommandOptionType::Integer, "days", "日数（例: 7）")
                    .required(false),
            );
        Command::create_global_command(&ctx.http, command).await?;
        Ok(())
    }

    async fn on_command(
        &self,
        ctx: &Context,
        command: CommandInteraction,
    ) -> Result<(), GatewayError> {
        if command.data.name != RANKING_COMMAND {
            return Ok(());
        }

        let raw_days = days_argument(
            command
                .data
                .options
                .iter()
                .find(|option| option.name == "days")
                .map(|option| &option.value),
        );

        let channel = TrackedChannel(command.channel_id.get());
        let Some(reply) = self.ranking.respond(channel, raw_days.as_deref()).await? else {
            return Ok(());
        };

        let mut chunks = split_reply(&reply, MESSAGE_LIMIT).into_iter();
        let first = chunks.next().unwrap_or_default();
        command
            .create_response(
                &ctx.http,
                CreateInteractionResponse::Message(
                    CreateInteractionResponseMessage::new().content(first),
                ),
            )
            .await?;
        for chunk in chunks {
            command
                .create_followup(
                    &ctx.http,
                    CreateInteractionResponseFollowup::new().content(chunk),
                )
                .await?;
        }
        Ok(())
    }

    async fn reconcile_and_log(&self, ctx: &Context, trigger: &'static str) {
        match self.reconcile_roster(ctx).await {
            Ok(report) if report.is_empty() => {
                debug!(trigger, "roster matches tracker");
            }
            Ok(report) => info!(
                trigger,
                opened = report.opened.len(),
                closed = report.closed.len(),
                "tracker reconciled with channel roster"
            ),
            Err(err) => error!(trigger, error = %err, "failed to reconcile channel roster"),
        }
    }
}

#[async_trait]
impl EventHandler for VoiceLogBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!(user = %ready.user.name, guilds = ready.guilds.len(), "connected to gateway");
        if let Err(err) = self.register_commands(&ctx).await {
            error!(error = %err, "failed to register slash commands");
        }
    }

    async fn cache_ready(&self, ctx: Context, guilds: Vec<GuildId>) {
        debug!(guilds = guilds.len(), "cache ready");
        self.reconcile_and_log(&ctx, "cache_ready").await;
    }

    async fn resume(&self, ctx: Context, _: ResumedEvent) {
        info!("gateway session resumed");
        self.reconcile_and_log(&ctx, "resume").await;
    }

    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let user_id = new.user_id;
        if let Err(err) = self.on_voice_state(&ctx, old, new).await {
            error!(user_id = %user_id, error = %err, "failed to handle voice state update");
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            let channel_id = command.channel_id;
            if let Err(err) = self.on_command(&ctx, command).await {
                error!(channel_id = %channel_id, error = %err, "failed to answer ranking command");
            }
        }
    }
}

/// 连接网关并运行，直到 `shutdown` 完成或客户端出错。
pub async fn run<F>(token: &str, bot: VoiceLogBot, shutdown: F) -> Result<(), GatewayError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;
    let mut client = Client::builder(token, intents).event_handler(bot).await?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        shutdown.await;
        info!("shutting down gateway shards");
        shard_manager.shutdown_all().await;
    });

    client.start().await?;
    Ok(())
}
