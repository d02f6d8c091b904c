//! Discord 网关适配层。
//!
//! 把 serenity 的语音状态事件、重连事件和 `/ranking` 斜杠命令转换为应用层调用，
//! 并在这一层记录所有未能向上传播的错误。

pub mod bot;
pub mod error;
pub mod translate;

pub use bot::{run, VoiceLogBot, RANKING_COMMAND};
pub use error::GatewayError;
pub use translate::{days_argument, split_reply, voice_transition, MESSAGE_LIMIT};
