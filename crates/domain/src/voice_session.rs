//! 语音会话实体
//!
//! 一条会话记录对应成员在被追踪频道中的一段连续停留。会话在加入时创建，
//! 离开时写入一次离开时间与时长，之后不再修改。

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{ExternalId, MemberId, SessionId, Timestamp};

/// 语音会话记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceSession {
    pub id: SessionId,
    pub member_id: MemberId,
    pub join_time: Timestamp,
    /// 为 `None` 表示会话仍在进行
    pub leave_time: Option<Timestamp>,
    /// 与 `leave_time` 同时写入
    pub duration_seconds: Option<i64>,
}

impl VoiceSession {
    pub fn open(id: SessionId, member_id: MemberId, join_time: Timestamp) -> Self {
        Self {
            id,
            member_id,
            join_time,
            leave_time: None,
            duration_seconds: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.leave_time.is_none()
    }

    /// 结束会话，写入离开时间和整秒时长。
    pub fn close(&mut self, leave_time: Timestamp) -> DomainResult<()> {
        if !self.is_open() {
            return Err(DomainError::SessionAlreadyClosed {
                session_id: self.id.0,
            });
        }
        self.duration_seconds = Some(elapsed_seconds(self.join_time, leave_time));
        self.leave_time = Some(leave_time);
        Ok(())
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            session_id: self.id,
            member_id: self.member_id,
            join_time: self.join_time,
        }
    }

    /// 将时间戳转换到给定的固定时区。
    pub fn with_offset(mut self, offset: &FixedOffset) -> Self {
        self.join_time = self.join_time.with_timezone(offset);
        self.leave_time = self.leave_time.map(|ts| ts.with_timezone(offset));
        self
    }
}

/// 离开时间减去加入时间，截断为整秒。时钟回拨时记为 0。
pub fn elapsed_seconds(join_time: Timestamp, leave_time: Timestamp) -> i64 {
    (leave_time - join_time).num_seconds().max(0)
}

/// 指向一条未结束会话的句柄，保存在内存追踪器中。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHandle {
    pub session_id: SessionId,
    pub member_id: MemberId,
    pub join_time: Timestamp,
}

/// 存储中仍未结束的会话，带上成员的外部标识，用于启动时恢复追踪器。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenSession {
    pub external_id: ExternalId,
    pub handle: SessionHandle,
}

/// 时间窗口内某个成员的累计停留秒数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberTotal {
    pub external_id: ExternalId,
    pub total_seconds: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn jst() -> FixedOffset {
        FixedOffset::east_opt(9 * 3600).unwrap()
    }

    fn sample_session() -> VoiceSession {
        let join = jst().with_ymd_and_hms(2024, 5, 1, 21, 0, 0).unwrap();
        VoiceSession::open(SessionId(1), MemberId(10), join)
    }

    #[test]
    fn new_session_is_open_without_duration() {
        let session = sample_session();
        assert!(session.is_open());
        assert_eq!(session.duration_seconds, None);
    }

    #[test]
    fn close_sets_leave_and_truncated_duration() {
        let mut session = sample_session();
        let leave = session.join_time + Duration::milliseconds(3_723_900);
        session.close(leave).unwrap();

        assert_eq!(session.leave_time, Some(leave));
        assert_eq!(session.duration_seconds, Some(3723));
    }

    #[test]
    fn close_twice_is_rejected_without_rewrite() {
        let mut session = sample_session();
        let first = session.join_time + Duration::seconds(60);
        session.close(first).unwrap();

        let err = session.close(first + Duration::seconds(60)).unwrap_err();
        assert_eq!(err, DomainError::SessionAlreadyClosed { session_id: 1 });
        assert_eq!(session.leave_time, Some(first));
        assert_eq!(session.duration_seconds, Some(60));
    }

    #[test]
    fn clock_going_backwards_yields_zero() {
        let session = sample_session();
        let earlier = session.join_time - Duration::seconds(5);
        assert_eq!(elapsed_seconds(session.join_time, earlier), 0);
    }

    #[test]
    fn with_offset_keeps_instant() {
        let session = sample_session();
        let utc = FixedOffset::east_opt(0).unwrap();
        let moved = session.clone().with_offset(&utc);
        assert_eq!(moved.join_time, session.join_time);
        assert_eq!(moved.join_time.offset(), &utc);
    }

    #[test]
    fn session_serializes_to_json() {
        let session = sample_session();
        let json = serde_json::to_string(&session).unwrap();
        let back: VoiceSession = serde_json::from_str(&json).unwrap();
        assert_eq!(back, session);
    }
}
