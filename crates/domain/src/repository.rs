use async_trait::async_trait;

use crate::errors::RepositoryError;
use crate::member::Member;
use crate::value_objects::{ExternalId, MemberId, Timestamp};
use crate::voice_session::{MemberTotal, OpenSession, SessionHandle, VoiceSession};

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// 成员与语音会话的持久化接口。
///
/// 所有写操作在返回前必须已经提交。
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait VoiceLogRepository: Send + Sync {
    /// 按外部标识查找成员，不存在则创建。重复调用返回同一个成员。
    async fn find_or_create_member(&self, external_id: &ExternalId) -> RepositoryResult<Member>;

    /// 插入一条未结束的会话
    async fn insert_session(
        &self,
        member_id: MemberId,
        join_time: Timestamp,
    ) -> RepositoryResult<SessionHandle>;

    /// 写入离开时间和时长。会话已结束时返回 `RepositoryError::AlreadyClosed`。
    async fn close_session(
        &self,
        handle: &SessionHandle,
        leave_time: Timestamp,
    ) -> RepositoryResult<VoiceSession>;

    /// 统计加入时间落在 `[start, end]` 内的会话时长，按总秒数降序。
    async fn sum_durations(
        &self,
        start: Timestamp,
        end: Timestamp,
    ) -> RepositoryResult<Vec<MemberTotal>>;

    /// 所有尚未结束的会话，按加入时间升序。
    async fn list_open_sessions(&self) -> RepositoryResult<Vec<OpenSession>>;
}
