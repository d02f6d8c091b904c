//! 领域模型错误定义
//!
//! 区分领域规则错误与存储层错误，两者都会被应用层统一包装。

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// 参数不合法
    #[error("invalid argument `{field}`: {reason}")]
    InvalidArgument { field: String, reason: String },

    /// 会话已经结束，不能再次写入
    #[error("voice session {session_id} is already closed")]
    SessionAlreadyClosed { session_id: i64 },
}

impl DomainError {
    /// 创建参数错误
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// 仓储错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,

    /// 关闭一个已经关闭的会话
    #[error("voice session {session_id} is already closed")]
    AlreadyClosed { session_id: i64 },

    #[error("storage error: {message}")]
    Storage { message: String },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}

impl From<DomainError> for RepositoryError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::SessionAlreadyClosed { session_id } => Self::AlreadyClosed { session_id },
            other => Self::storage(other.to_string()),
        }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_closed_maps_to_repository_variant() {
        let err = RepositoryError::from(DomainError::SessionAlreadyClosed { session_id: 7 });
        assert_eq!(err, RepositoryError::AlreadyClosed { session_id: 7 });
    }

    #[test]
    fn invalid_argument_message_names_field() {
        let err = DomainError::invalid_argument("external_id", "cannot be empty");
        assert_eq!(
            err.to_string(),
            "invalid argument `external_id`: cannot be empty"
        );
    }
}
