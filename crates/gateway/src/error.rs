use application::ApplicationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("discord error: {0}")]
    Discord(#[from] serenity::Error),
    #[error(transparent)]
    Application(#[from] ApplicationError),
    #[error("channel {0} is not a guild channel")]
    NotGuildChannel(u64),
}
