use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use domain::{
    elapsed_seconds, ExternalId, Member, MemberId, MemberTotal, OpenSession, RepositoryError,
    RepositoryResult, SessionHandle, SessionId, Timestamp, VoiceLogRepository, VoiceSession,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    RepositoryError::storage(err.to_string())
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

pub async fn create_pg_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

#[derive(Debug, FromRow)]
struct MemberRecord {
    id: i64,
    external_id: String,
}

impl TryFrom<MemberRecord> for Member {
    type Error = RepositoryError;

    fn try_from(value: MemberRecord) -> Result<Self, Self::Error> {
        let external_id =
            ExternalId::parse(value.external_id).map_err(|err| invalid_data(err.to_string()))?;
        Ok(Member::new(MemberId(value.id), external_id))
    }
}

#[derive(Debug, FromRow)]
struct SessionRecord {
    id: i64,
    member_id: i64,
    join_time: DateTime<Utc>,
    leave_time: Option<DateTime<Utc>>,
    duration_seconds: Option<i64>,
}

impl SessionRecord {
    fn into_session(self, offset: &FixedOffset) -> VoiceSession {
        VoiceSession {
            id: SessionId(self.id),
            member_id: MemberId(self.member_id),
            join_time: self.join_time.fixed_offset(),
            leave_time: self.leave_time.map(|ts| ts.fixed_offset()),
            duration_seconds: self.duration_seconds,
        }
        .with_offset(offset)
    }
}

#[derive(Debug, FromRow)]
struct OpenSessionRecord {
    id: i64,
    member_id: i64,
    join_time: DateTime<Utc>,
    external_id: String,
}

#[derive(Debug, FromRow)]
struct TotalRecord {
    external_id: String,
    total_seconds: i64,
}

/// PostgreSQL 实现的语音会话仓储。
///
/// 每条语句单独提交，返回时写入已经落盘。读出的时间戳转换到配置的固定时区。
#[derive(Clone)]
pub struct PgVoiceLogRepository {
    pool: PgPool,
    offset: FixedOffset,
}

impl PgVoiceLogRepository {
    pub fn new(pool: PgPool, offset: FixedOffset) -> Self {
        Self { pool, offset }
    }
}

#[async_trait]
impl VoiceLogRepository for PgVoiceLogRepository {
    async fn find_or_create_member(&self, external_id: &ExternalId) -> RepositoryResult<Member> {
        // DO UPDATE 让冲突时也能 RETURNING 已有的行
        let record = sqlx::query_as::<_, MemberRecord>(
            r#"
            INSERT INTO members (external_id)
            VALUES ($1)
            ON CONFLICT (external_id) DO UPDATE SET external_id = EXCLUDED.external_id
            RETURNING id, external_id
            "#,
        )
        .bind(external_id.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Member::try_from(record)
    }

    async fn insert_session(
        &self,
        member_id: MemberId,
        join_time: Timestamp,
    ) -> RepositoryResult<SessionHandle> {
        let record = sqlx::query_as::<_, SessionRecord>(
            r#"
            INSERT INTO voice_sessions (member_id, join_time)
            VALUES ($1, $2)
            RETURNING id, member_id, join_time, leave_time, duration_seconds
            "#,
        )
        .bind(i64::from(member_id))
        .bind(join_time)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| {
            let missing_member =
                matches!(&err, sqlx::Error::Database(db) if db.is_foreign_key_violation());
            if missing_member {
                RepositoryError::NotFound
            } else {
                map_sqlx_err(err)
            }
        })?;

        Ok(record.into_session(&self.offset).handle())
    }

    async fn close_session(
        &self,
        handle: &SessionHandle,
        leave_time: Timestamp,
    ) -> RepositoryResult<VoiceSession> {
        let duration = elapsed_seconds(handle.join_time, leave_time);

        // 只更新仍未结束的行，避免重复写入
        let updated = sqlx::query_as::<_, SessionRecord>(
            r#"
            UPDATE voice_sessions
            SET leave_time = $2, duration_seconds = $3
            WHERE id = $1 AND leave_time IS NULL
            RETURNING id, member_id, join_time, leave_time, duration_seconds
            "#,
        )
        .bind(i64::from(handle.session_id))
        .bind(leave_time)
        .bind(duration)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        if let Some(record) = updated {
            return Ok(record.into_session(&self.offset));
        }

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM voice_sessions WHERE id = $1)")
                .bind(i64::from(handle.session_id))
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx_err)?;

        if exists {
            Err(RepositoryError::AlreadyClosed {
                session_id: handle.session_id.0,
            })
        } else {
            Err(RepositoryError::NotFound)
        }
    }

    async fn sum_durations(
        &self,
        start: Timestamp,
        end: Timestamp,
    ) -> RepositoryResult<Vec<MemberTotal>> {
        let records = sqlx::query_as::<_, TotalRecord>(
            r#"
            SELECT m.external_id,
                   COALESCE(SUM(s.duration_seconds), 0)::BIGINT AS total_seconds
            FROM members m
            JOIN voice_sessions s ON s.member_id = m.id
            WHERE s.join_time >= $1 AND s.join_time <= $2
            GROUP BY m.id, m.external_id
            ORDER BY total_seconds DESC, m.external_id ASC
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records
            .into_iter()
            .map(|record| {
                let external_id = ExternalId::parse(record.external_id)
                    .map_err(|err| invalid_data(err.to_string()))?;
                Ok(MemberTotal {
                    external_id,
                    total_seconds: record.total_seconds,
                })
            })
            .collect()
    }

    async fn list_open_sessions(&self) -> RepositoryResult<Vec<OpenSession>> {
        let records = sqlx::query_as::<_, OpenSessionRecord>(
            r#"
            SELECT s.id, s.member_id, s.join_time, m.external_id
            FROM voice_sessions s
            JOIN members m ON m.id = s.member_id
            WHERE s.leave_time IS NULL
            ORDER BY s.join_time ASC, s.id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records
            .into_iter()
            .map(|record| {
                let external_id = ExternalId::parse(record.external_id)
                    .map_err(|err| invalid_data(err.to_string()))?;
                Ok(OpenSession {
                    external_id,
                    handle: SessionHandle {
                        session_id: SessionId(record.id),
                        member_id: MemberId(record.member_id),
                        join_time: record.join_time.with_timezone(&self.offset),
                    },
                })
            })
            .collect()
    }
}
