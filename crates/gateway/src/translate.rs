//! 网关数据到应用层类型的纯转换。

use application::VoiceTransition;
use domain::{ChannelId, ExternalId};
use serenity::all::CommandDataOptionValue;

/// 单条 Discord 消息的字符上限
pub const MESSAGE_LIMIT: usize = 2000;

pub fn voice_transition(
    user_id: u64,
    display_name: Option<String>,
    is_bot: bool,
    previous: Option<u64>,
    next: Option<u64>,
) -> VoiceTransition {
    VoiceTransition {
        member: ExternalId::from(user_id),
        display_name,
        is_bot,
        previous: previous.map(ChannelId),
        next: next.map(ChannelId),
    }
}

/// 取出 `days` 参数的原始文本，交给排行榜服务解析。
pub fn days_argument(value: Option<&CommandDataOptionValue>) -> Option<String> {
    match value? {
        CommandDataOptionValue::Integer(days) => Some(days.to_string()),
        CommandDataOptionValue::Number(days) => Some(days.to_string()),
        CommandDataOptionValue::String(days) => Some(days.clone()),
        // 命令只注册了整数参数，其他类型按未提供处理
        _ => None,
    }
}

/// 按行切分回复，每段不超过 `limit` 个字符；超长的单行再按字符硬切。
pub fn split_reply(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.split('\n') {
        let line_len = line.chars().count();
        let needed = if current.is_empty() { line_len } else { line_len + 1 };

        if current_len + needed <= limit {
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(line);
            current_len += needed;
            continue;
        }

        if !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }

        if line_len <= limit {
            current.push_str(line);
            current_len = line_len;
        } else {
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(limit) {
                chunks.push(piece.iter().collect());
            }
        }
    }

    if !current.is_empty() || chunks.is_empty() {
        chunks.push(current);
    }
    chunks
}
