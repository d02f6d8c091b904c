//! 语音停留时长排行榜
//!
//! 统计最近 N 天内每个成员在被追踪频道的累计时长，按降序输出。

use std::sync::Arc;

use chrono::Duration;
use domain::{ChannelId, ExternalId, MemberTotal, VoiceLogRepository};
use tracing::debug;

use crate::{clock::Clock, error::ApplicationError};

pub const DEFAULT_RANKING_DAYS: u32 = 7;

/// 窗口起点必须落在 PostgreSQL `timestamptz` 的可表示范围内，约一千年
pub const MAX_RANKING_DAYS: u32 = 365_000;

pub const USAGE_HINT: &str = "引数には日数の数字を指定してください。例: `/ranking 7`";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankingEntry {
    /// 从 1 开始
    pub rank: usize,
    pub external_id: ExternalId,
    pub total_seconds: i64,
}

impl RankingEntry {
    pub fn line(&self) -> String {
        format!(
            "{}. {} — {}",
            self.rank,
            self.external_id.mention(),
            format_duration(self.total_seconds)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankingReport {
    pub days: u32,
    pub entries: Vec<RankingEntry>,
}

impl RankingReport {
    fn from_totals(days: u32, totals: Vec<MemberTotal>) -> Self {
        let entries = totals
            .into_iter()
            .enumerate()
            .map(|(index, total)| RankingEntry {
                rank: index + 1,
                external_id: total.external_id,
                total_seconds: total.total_seconds,
            })
            .collect();
        Self { days, entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 每个成员一行；没有数据时只有一行提示。
    pub fn lines(&self) -> Vec<String> {
        if self.entries.is_empty() {
            return vec![self.no_data_message()];
        }
        self.entries.iter().map(RankingEntry::line).collect()
    }

    pub fn render(&self) -> String {
        if self.entries.is_empty() {
            return self.no_data_message();
        }
        let mut text = format!("過去{}日間のランキング:", self.days);
        for line in self.lines() {
            text.push('\n');
            text.push_str(&line);
        }
        text
    }

    fn no_data_message(&self) -> String {
        format!("過去{}日間のデータがありません。", self.days)
    }
}

/// 秒数渲染为 `H時間M分S秒`，不补零。
pub fn format_duration(total_seconds: i64) -> String {
    let hours = total_seconds / 3600;
    let remainder = total_seconds % 3600;
    format!("{}時間{}分{}秒", hours, remainder / 60, remainder % 60)
}

pub struct RankingService {
    repository: Arc<dyn VoiceLogRepository>,
    clock: Arc<dyn Clock>,
    output_channel: ChannelId,
    default_days: u32,
}

impl RankingService {
    pub fn new(
        repository: Arc<dyn VoiceLogRepository>,
        clock: Arc<dyn Clock>,
        output_channel: ChannelId,
    ) -> Self {
        Self {
            repository,
            clock,
            output_channel,
            default_days: DEFAULT_RANKING_DAYS,
        }
    }

    pub fn with_default_days(mut self, days: u32) -> Self {
        if days > 0 {
            self.default_days = days;
        }
        self
    }

    /// 统计 `[now - days, now]` 内加入的会话。
    pub async fn rank(&self, days: u32) -> Result<RankingReport, ApplicationError> {
        if days == 0 {
            return Err(ApplicationError::InvalidWindow(
                "days must be positive".to_string(),
            ));
        }
        if days > MAX_RANKING_DAYS {
            return Err(ApplicationError::InvalidWindow(format!(
                "{days} days exceeds {MAX_RANKING_DAYS}"
            )));
        }

        let end = self.clock.now();
        let start = end
            .checked_sub_signed(Duration::days(i64::from(days)))
            .ok_or_else(|| ApplicationError::InvalidWindow(format!("{days} days is out of range")))?;

        let totals = self.repository.sum_durations(start, end).await?;
        debug!(days, rows = totals.len(), "ranking computed");
        Ok(RankingReport::from_totals(days, totals))
    }

    /// 未给出参数时使用默认天数；不是 `1..=MAX_RANKING_DAYS` 内的整数时返回 `None`。
    pub fn parse_days(&self, raw: Option<&str>) -> Option<u32> {
        match raw.map(str::trim) {
            None | Some("") => Some(self.default_days),
            Some(text) => text
                .parse::<u32>()
                .ok()
                .filter(|days| (1..=MAX_RANKING_DAYS).contains(days)),
        }
    }

    /// 处理排行榜命令。非输出频道的请求被静默忽略，返回 `None`。
    pub async fn respond(
        &self,
        channel: ChannelId,
        days: Option<&str>,
    ) -> Result<Option<String>, ApplicationError> {
        if channel != self.output_channel {
            debug!(channel = %channel, "ranking requested outside output channel");
            return Ok(None);
        }

        let Some(days) = self.parse_days(days) else {
            return Ok(Some(USAGE_HINT.to_string()));
        };

        match self.rank(days).await {
            Ok(report) => Ok(Some(report.render())),
            Err(ApplicationError::InvalidWindow(reason)) => {
                debug!(days, reason = %reason, "ranking window rejected");
                Ok(Some(USAGE_HINT.to_string()))
            }
            Err(err) => Err(err),
        }
    }
}
