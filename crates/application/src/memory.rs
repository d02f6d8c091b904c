//! 内存实现的持久化仓储（用于测试与无数据库的试运行）

use std::collections::HashMap;

use async_trait::async_trait;
use domain::{
    ExternalId, Member, MemberId, MemberTotal, OpenSession, RepositoryError, RepositoryResult,
    SessionHandle, SessionId, Timestamp, VoiceLogRepository, VoiceSession,
};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct State {
    members: HashMap<ExternalId, Member>,
    sessions: Vec<VoiceSession>,
    next_member_id: i64,
    next_session_id: i64,
}

impl State {
    fn member_by_id(&self, id: MemberId) -> Option<&Member> {
        self.members.values().find(|member| member.id == id)
    }
}

#[derive(Debug, Default)]
pub struct MemoryVoiceLogRepository {
    state: RwLock<State>,
}

impl MemoryVoiceLogRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 所有会话记录，按插入顺序。
    pub async fn sessions(&self) -> Vec<VoiceSession> {
        self.state.read().await.sessions.clone()
    }

    pub async fn sessions_of(&self, external_id: &ExternalId) -> Vec<VoiceSession> {
        let state = self.state.read().await;
        let Some(member) = state.members.get(external_id) else {
            return Vec::new();
        };
        state
            .sessions
            .iter()
            .filter(|session| session.member_id == member.id)
            .cloned()
            .collect()
    }

    pub async fn member_count(&self) -> usize {
        self.state.read().await.members.len()
    }

    /// 直接写入一条已结束的历史会话，便于准备排行榜数据。
    pub async fn seed_closed_session(
        &self,
        external_id: &ExternalId,
        join_time: Timestamp,
        duration_seconds: i64,
    ) -> RepositoryResult<VoiceSession> {
        let member = self.find_or_create_member(external_id).await?;
        let handle = self.insert_session(member.id, join_time).await?;
        let leave_time = join_time + chrono::Duration::seconds(duration_seconds);
        self.close_session(&handle, leave_time).await
    }
}

#[async_trait]
impl VoiceLogRepository for MemoryVoiceLogRepository {
    async fn find_or_create_member(&self, external_id: &ExternalId) -> RepositoryResult<Member> {
        let mut state = self.state.write().await;
        if let Some(member) = state.members.get(external_id) {
            return Ok(member.clone());
        }

        state.next_member_id += 1;
        let member = Member::new(MemberId(state.next_member_id), external_id.clone());
        state.members.insert(external_id.clone(), member.clone());
        Ok(member)
    }

    async fn insert_session(
        &self,
        member_id: MemberId,
        join_time: Timestamp,
    ) -> RepositoryResult<SessionHandle> {
        let mut state = self.state.write().await;
        if state.member_by_id(member_id).is_none() {
            return Err(RepositoryError::NotFound);
        }

        state.next_session_id += 1;
        let session = VoiceSession::open(SessionId(state.next_session_id), member_id, join_time);
        let handle = session.handle();
        state.sessions.push(session);
        Ok(handle)
    }

    async fn close_session(
        &self,
        handle: &SessionHandle,
        leave_time: Timestamp,
    ) -> RepositoryResult<VoiceSession> {
        let mut state = self.state.write().await;
        let session = state
            .sessions
            .iter_mut()
            .find(|session| session.id == handle.session_id)
            .ok_or(RepositoryError::NotFound)?;

        session.close(leave_time)?;
        Ok(session.clone())
    }

    async fn sum_durations(
        &self,
        start: Timestamp,
        end: Timestamp,
    ) -> RepositoryResult<Vec<MemberTotal>> {
        let state = self.state.read().await;
        let mut totals: HashMap<MemberId, i64> = HashMap::new();

        for session in state
            .sessions
            .iter()
            .filter(|session| session.join_time >= start && session.join_time <= end)
        {
            *totals.entry(session.member_id).or_insert(0) += session.duration_seconds.unwrap_or(0);
        }

        let mut rows = totals
            .into_iter()
            .map(|(member_id, total_seconds)| {
                let member = state.member_by_id(member_id).ok_or(RepositoryError::NotFound)?;
                Ok(MemberTotal {
                    external_id: member.external_id.clone(),
                    total_seconds,
                })
            })
            .collect::<RepositoryResult<Vec<_>>>()?;

        rows.sort_by(|a, b| {
            b.total_seconds
                .cmp(&a.total_seconds)
                .then_with(|| a.external_id.cmp(&b.external_id))
        });
        Ok(rows)
    }

    async fn list_open_sessions(&self) -> RepositoryResult<Vec<OpenSession>> {
        let state = self.state.read().await;
        let mut open = state
            .sessions
            .iter()
            .filter(|session| session.is_open())
            .map(|session| {
                let member = state
                    .member_by_id(session.member_id)
                    .ok_or(RepositoryError::NotFound)?;
                Ok(OpenSession {
                    external_id: member.external_id.clone(),
                    handle: session.handle(),
                })
            })
            .collect::<RepositoryResult<Vec<_>>>()?;

        open.sort_by_key(|row| (row.handle.join_time, row.handle.session_id));
        Ok(open)
    }
}
