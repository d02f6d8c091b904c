//! 语音会话生命周期处理
//!
//! 接收网关翻译后的语音状态变化，驱动内存追踪器与持久化仓储：
//! 成员进入被追踪频道时开启会话，离开时结束会话。网关重连后根据
//! 当前频道名单修复断线期间漏掉的事件。
//!
//! 所有追踪器与存储的修改都在同一把锁内完成，一个事件处理完之前
//! 不会开始处理下一个事件，保证每个成员最多只有一条未结束的会话。

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use domain::{ChannelId, ExternalId, SessionHandle, VoiceLogRepository, VoiceSession};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::{clock::Clock, error::ApplicationError, tracker::SessionTracker};

/// 一次语音状态变化
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceTransition {
    pub member: ExternalId,
    /// 仅用于日志
    pub display_name: Option<String>,
    pub is_bot: bool,
    /// 变化前所在的语音频道，`None` 表示不在任何语音频道
    pub previous: Option<ChannelId>,
    /// 变化后所在的语音频道
    pub next: Option<ChannelId>,
}

/// 重连后被追踪频道中的一名成员
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub member: ExternalId,
    pub display_name: Option<String>,
    pub is_bot: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleOutcome {
    /// 机器人事件、静音切换等与被追踪频道进出无关的事件
    Ignored,
    Joined(SessionHandle),
    Left(VoiceSession),
    /// 离开事件但追踪器里没有对应会话（例如进程重启后）
    NothingToClose,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub opened: Vec<ExternalId>,
    pub closed: Vec<VoiceSession>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.opened.is_empty() && self.closed.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: usize,
    pub closed_duplicates: usize,
}

/// 根据成员标识查找显示名，用于补全日志
#[async_trait]
pub trait MemberDirectory: Send + Sync {
    async fn display_name(&self, member: &ExternalId) -> Option<String>;
}


pub struct VoiceLifecycleHandler {
    tracked_channel: ChannelId,
    repository: Arc<dyn VoiceLogRepository>,
    clock: Arc<dyn Clock>,
    tracker: Mutex<SessionTracker>,
}

impl VoiceLifecycleHandler {
    pub fn new(
        tracked_channel: ChannelId,
        repository: Arc<dyn VoiceLogRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tracked_channel,
            repository,
            clock,
            tracker: Mutex::new(SessionTracker::new()),
        }
    }

    pub fn tracked_channel(&self) -> ChannelId {
        self.tracked_channel
    }

    /// 当前有未结束会话的成员
    pub async fn open_members(&self) -> HashSet<ExternalId> {
        self.tracker.lock().await.snapshot()
    }

    pub async fn handle_transition(
        &self,
        event: VoiceTransition,
    ) -> Result<LifecycleOutcome, ApplicationError> {
        if event.is_bot {
            return Ok(LifecycleOutcome::Ignored);
        }

        // 静音、耳机切换等也会产生事件，频道没有变化时不做任何处理
        if event.previous.is_some() && event.previous == event.next {
            debug!(member = %event.member, "voice state changed without channel move");
            return Ok(LifecycleOutcome::Ignored);
        }

        let tracked = Some(self.tracked_channel);
        let mut tracker = self.tracker.lock().await;

        if event.next == tracked {
            let handle = self.open_locked(&mut tracker, &event.member).await?;
            info!(
                member = %event.member,
                display_name = ?event.display_name,
                session_id = %handle.session_id,
                "member joined tracked channel"
            );
            return Ok(LifecycleOutcome::Joined(handle));
        }

        if event.previous == tracked {
            let Some(handle) = tracker.close(&event.member) else {
                debug!(member = %event.member, "leave without tracked session");
                return Ok(LifecycleOutcome::NothingToClose);
            };
            let session = self
                .repository
                .close_session(&handle, self.clock.now())
                .await?;
            info!(
                member = %event.member,
                display_name = ?event.display_name,
                duration_seconds = session.duration_seconds.unwrap_or_default(),
                "member left tracked channel"
            );
            return Ok(LifecycleOutcome::Left(session));
        }

        Ok(LifecycleOutcome::Ignored)
    }

    /// 网关重连后，用频道当前名单修复追踪器与存储。
    ///
    /// 名单中有但追踪器中没有的成员补开会话；追踪器中有但名单中没有的成员补结束会话。
    pub async fn reconcile<D>(
        &self,
        roster: Vec<RosterEntry>,
        directory: &D,
    ) -> Result<ReconcileReport, ApplicationError>
    where
        D: MemberDirectory + ?Sized,
    {
        let present: BTreeMap<ExternalId, Option<String>> = roster
            .into_iter()
            .filter(|entry| !entry.is_bot)
            .map(|entry| (entry.member, entry.display_name))
            .collect();

        let mut tracker = self.tracker.lock().await;
        let mut report = ReconcileReport::default();

        for (member, display_name) in &present {
            if tracker.contains(member) {
                continue;
            }
            let handle = self.open_locked(&mut tracker, member).await?;
            info!(
                member = %member,
                display_name = ?display_name,
                session_id = %handle.session_id,
                "member joined tracked channel (detected on resume)"
            );
            report.opened.push(member.clone());
        }

        let mut stale: Vec<ExternalId> = tracker
            .snapshot()
            .into_iter()
            .filter(|member| !present.contains_key(member))
            .collect();
        stale.sort();

        let mut closed = Vec::with_capacity(stale.len());
        for member in stale {
            let Some(handle) = tracker.close(&member) else {
                continue;
            };
            let session = self
                .repository
                .close_session(&handle, self.clock.now())
                .await?;
            closed.push((member, session));
        }
        drop(tracker);

        // 名字查询可能较慢，释放锁之后再做
        for (member, session) in closed {
            let duration_seconds = session.duration_seconds.unwrap_or_default();
            match directory.display_name(&member).await {
                Some(display_name) => info!(
                    member = %member,
                    display_name = %display_name,
                    duration_seconds,
                    "member left tracked channel (completed after reconnect)"
                ),
                None => error!(
                    member = %member,
                    duration_seconds,
                    "could not resolve member closed after reconnect"
                ),
            }
            report.closed.push(session);
        }

        Ok(report)
    }

    /// 启动时把存储中未结束的会话重新登记到追踪器。
    ///
    /// 同一成员有多条未结束会话时保留最新的一条，其余的在下一条会话开始时结束。
    pub async fn restore_open_sessions(&self) -> Result<RestoreReport, ApplicationError> {
        let rows = self.repository.list_open_sessions().await?;
        let mut tracker = self.tracker.lock().await;
        let mut report = RestoreReport::default();

        for row in rows {
            match tracker.open(row.external_id.clone(), row.handle) {
                Some(older) => {
                    // 行按加入时间升序，较旧的一条在较新的一条开始时结束
                    self.repository
                        .close_session(&older, row.handle.join_time)
                        .await?;
                    warn!(
                        member = %row.external_id,
                        session_id = %older.session_id,
                        "closed duplicate open session found at startup"
                    );
                    report.closed_duplicates += 1;
                }
                None => report.restored += 1,
            }
        }

        info!(
            restored = report.restored,
            closed_duplicates = report.closed_duplicates,
            "restored open voice sessions"
        );
        Ok(report)
    }

    async fn open_locked(
        &self,
        tracker: &mut SessionTracker,
        member: &ExternalId,
    ) -> Result<SessionHandle, ApplicationError> {
        let record = self.repository.find_or_create_member(member).await?;
        let handle = self
            .repository
            .insert_session(record.id, self.clock.now())
            .await?;

        // 被替换的旧会话在新会话开始时结束
        if let Some(stale) = tracker.open(member.clone(), handle) {
            let closed = self
                .repository
                .close_session(&stale, handle.join_time)
                .await?;
            warn!(
                member = %member,
                session_id = %stale.session_id,
                duration_seconds = closed.duration_seconds.unwrap_or_default(),
                "duplicate join, closed previously tracked session"
            );
        }
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::memory::MemoryVoiceLogRepository;
    use chrono::{Duration, FixedOffset, TimeZone};
    use domain::{MockVoiceLogRepository, RepositoryError, Timestamp};
    use std::collections::HashMap;

    #[derive(Default)]
    struct Names(HashMap<ExternalId, String>);

    #[async_trait]
    impl MemberDirectory for Names {
        async fn display_name(&self, member: &ExternalId) -> Option<String> {
            self.0.get(member).cloned()
        }
    }

    const TRACKED: ChannelId = ChannelId(1000);
    const OTHER: ChannelId = ChannelId(2000);

    fn start() -> Timestamp {
        FixedOffset::east_opt(9 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 3, 10, 22, 0, 0)
            .unwrap()
    }

    fn member(id: &str) -> ExternalId {
        ExternalId::parse(id).unwrap()
    }

    fn transition(id: &str, previous: Option<ChannelId>, next: Option<ChannelId>) -> VoiceTransition {
        VoiceTransition {
            member: member(id),
            display_name: None,
            is_bot: false,
            previous,
            next,
        }
    }

    fn setup() -> (
        VoiceLifecycleHandler,
        Arc<MemoryVoiceLogRepository>,
        Arc<ManualClock>,
    ) {
        let repo = Arc::new(MemoryVoiceLogRepository::new());
        let clock = Arc::new(ManualClock::new(start()));
        let handler = VoiceLifecycleHandler::new(TRACKED, repo.clone(), clock.clone());
        (handler, repo, clock)
    }

    #[tokio::test]
    async fn join_then_leave_records_exact_duration() {
        let (handler, _repo, clock) = setup();

        let joined = handler
            .handle_transition(transition("u1", None, Some(TRACKED)))
            .await
            .unwrap();
        assert!(matches!(joined, LifecycleOutcome::Joined(_)));

        clock.advance(Duration::seconds(754));
        let left = handler
            .handle_transition(transition("u1", Some(TRACKED), None))
            .await
            .unwrap();

        let LifecycleOutcome::Left(session) = left else {
            panic!("expected Left, got {left:?}");
        };
        assert_eq!(session.join_time, start());
        assert_eq!(session.leave_time, Some(start() + Duration::seconds(754)));
        assert_eq!(session.duration_seconds, Some(754));
        assert!(handler.open_members().await.is_empty());
    }

    #[tokio::test]
    async fn moving_from_other_channel_opens_session() {
        let (handler, repo, _) = setup();
        handler
            .handle_transition(transition("u1", Some(OTHER), Some(TRACKED)))
            .await
            .unwrap();

        assert_eq!(repo.sessions().await.len(), 1);
        assert!(handler.open_members().await.contains(&member("u1")));
    }

    #[tokio::test]
    async fn moving_to_other_channel_closes_session() {
        let (handler, repo, clock) = setup();
        handler
            .handle_transition(transition("u1", None, Some(TRACKED)))
            .await
            .unwrap();
        clock.advance(Duration::seconds(5));

        let outcome = handler
            .handle_transition(transition("u1", Some(TRACKED), Some(OTHER)))
            .await
            .unwrap();

        assert!(matches!(outcome, LifecycleOutcome::Left(_)));
        assert_eq!(repo.sessions().await[0].duration_seconds, Some(5));
    }

    #[tokio::test]
    async fn self_transition_in_tracked_channel_is_ignored() {
        let (handler, repo, _) = setup();
        handler
            .handle_transition(transition("u1", None, Some(TRACKED)))
            .await
            .unwrap();

        let outcome = handler
            .handle_transition(transition("u1", Some(TRACKED), Some(TRACKED)))
            .await
            .unwrap();

        assert_eq!(outcome, LifecycleOutcome::Ignored);
        let sessions = repo.sessions().await;
        assert_eq!(sessions.len(), 1);
        assert!(sessions[0].is_open());
        assert_eq!(handler.open_members().await.len(), 1);
    }

    #[tokio::test]
    async fn bot_events_are_filtered() {
        let (handler, repo, _) = setup();
        let mut event = transition("bot", None, Some(TRACKED));
        event.is_bot = true;

        let outcome = handler.handle_transition(event).await.unwrap();

        assert_eq!(outcome, LifecycleOutcome::Ignored);
        assert_eq!(repo.member_count().await, 0);
    }

    #[tokio::test]
    async fn leave_without_open_is_noop() {
        let (handler, repo, _) = setup();
        let outcome = handler
            .handle_transition(transition("u1", Some(TRACKED), None))
            .await
            .unwrap();

        assert_eq!(outcome, LifecycleOutcome::NothingToClose);
        assert!(repo.sessions().await.is_empty());
    }

    #[tokio::test]
    async fn unrelated_channel_moves_are_ignored() {
        let (handler, repo, _) = setup();
        let outcome = handler
            .handle_transition(transition("u1", None, Some(OTHER)))
            .await
            .unwrap();

        assert_eq!(outcome, LifecycleOutcome::Ignored);
        assert_eq!(repo.member_count().await, 0);
    }

    #[tokio::test]
    async fn duplicate_join_replaces_tracked_session() {
        let (handler, repo, clock) = setup();
        handler
            .handle_transition(transition("u1", None, Some(TRACKED)))
            .await
            .unwrap();
        clock.advance(Duration::seconds(10));
        let LifecycleOutcome::Joined(second) = handler
            .handle_transition(transition("u1", Some(OTHER), Some(TRACKED)))
            .await
            .unwrap()
        else {
            panic!("expected second join");
        };

        clock.advance(Duration::seconds(20));
        let LifecycleOutcome::Left(closed) = handler
            .handle_transition(transition("u1", Some(TRACKED), None))
            .await
            .unwrap()
        else {
            panic!("expected leave");
        };

        assert_eq!(closed.id, second.session_id);
        assert_eq!(closed.duration_seconds, Some(20));

        let sessions = repo.sessions().await;
        assert_eq!(sessions.len(), 2);
        assert!(sessions.iter().all(|s| !s.is_open()));
        let replaced = sessions.iter().find(|s| s.id != second.session_id).unwrap();
        assert_eq!(replaced.leave_time, Some(second.join_time));
        assert_eq!(replaced.duration_seconds, Some(10));
    }

    #[tokio::test]
    async fn duplicate_join_does_not_inflate_totals_after_restart() {
        let (handler, repo, clock) = setup();
        handler
            .handle_transition(transition("u1", None, Some(TRACKED)))
            .await
            .unwrap();
        handler
            .handle_transition(transition("u1", Some(OTHER), Some(TRACKED)))
            .await
            .unwrap();
        clock.advance(Duration::hours(1));
        handler
            .handle_transition(transition("u1", Some(TRACKED), None))
            .await
            .unwrap();

        clock.advance(Duration::days(2));
        let restarted = VoiceLifecycleHandler::new(TRACKED, repo.clone(), clock.clone());
        let restore = restarted.restore_open_sessions().await.unwrap();
        assert_eq!(restore, RestoreReport::default());

        let report = restarted
            .reconcile(Vec::new(), &Names::default())
            .await
            .unwrap();
        assert!(report.is_empty());

        let totals = repo
            .sum_durations(start() - Duration::days(1), clock.now())
            .await
            .unwrap();
        assert_eq!(totals.len(), 1);
        assert_eq!(totals[0].total_seconds, 3600);
    }

    #[tokio::test]
    async fn reconcile_swaps_stale_and_missing_members() {
        let (handler, repo, clock) = setup();
        handler
            .handle_transition(transition("a", None, Some(TRACKED)))
            .await
            .unwrap();
        clock.advance(Duration::seconds(300));

        let roster = vec![
            RosterEntry {
                member: member("b"),
                display_name: Some("Bee".into()),
                is_bot: false,
            },
            RosterEntry {
                member: member("bot"),
                display_name: None,
                is_bot: true,
            },
        ];
        let directory = Names(HashMap::from([(member("a"), "Ay".to_string())]));
        let report = handler.reconcile(roster, &directory).await.unwrap();

        assert_eq!(report.opened, vec![member("b")]);
        assert_eq!(report.closed.len(), 1);
        assert_eq!(report.closed[0].leave_time, Some(clock.now()));
        assert_eq!(report.closed[0].duration_seconds, Some(300));

        let open = handler.open_members().await;
        assert_eq!(open, HashSet::from([member("b")]));
        let b_sessions = repo.sessions_of(&member("b")).await;
        assert_eq!(b_sessions.len(), 1);
        assert_eq!(b_sessions[0].join_time, clock.now());
    }

    /// 查名字时读取追踪器，锁未释放就会卡住
    struct TrackerReadingDirectory<'a> {
        handler: &'a VoiceLifecycleHandler,
    }

    #[async_trait]
    impl MemberDirectory for TrackerReadingDirectory<'_> {
        async fn display_name(&self, _member: &ExternalId) -> Option<String> {
            let open = self.handler.open_members().await;
            Some(format!("one of {}", open.len()))
        }
    }

    #[tokio::test]
    async fn reconcile_resolves_names_after_releasing_tracker() {
        let (handler, repo, clock) = setup();
        handler
            .handle_transition(transition("a", None, Some(TRACKED)))
            .await
            .unwrap();
        clock.advance(Duration::seconds(45));

        let directory = TrackerReadingDirectory { handler: &handler };
        let report = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            handler.reconcile(Vec::new(), &directory),
        )
        .await
        .expect("name lookup must not wait on the tracker lock")
        .unwrap();

        assert_eq!(report.closed.len(), 1);
        assert_eq!(report.closed[0].duration_seconds, Some(45));
        assert!(repo.sessions().await.iter().all(|s| !s.is_open()));
    }

    #[tokio::test]
    async fn reconcile_with_matching_roster_changes_nothing() {
        let (handler, repo, _) = setup();
        handler
            .handle_transition(transition("a", None, Some(TRACKED)))
            .await
            .unwrap();

        let roster = vec![RosterEntry {
            member: member("a"),
            display_name: None,
            is_bot: false,
        }];
        let report = handler
            .reconcile(roster, &Names::default())
            .await
            .unwrap();

        assert!(report.is_empty());
        assert_eq!(repo.sessions().await.len(), 1);
    }

    #[tokio::test]
    async fn restore_reregisters_open_sessions_and_closes_duplicates() {
        let repo = Arc::new(MemoryVoiceLogRepository::new());
        let clock = Arc::new(ManualClock::new(start()));
        let owner = repo.find_or_create_member(&member("a")).await.unwrap();
        let older = repo.insert_session(owner.id, start()).await.unwrap();
        let newer = repo
            .insert_session(owner.id, start() + Duration::seconds(60))
            .await
            .unwrap();
        clock.advance(Duration::seconds(120));

        let handler = VoiceLifecycleHandler::new(TRACKED, repo.clone(), clock.clone());
        let report = handler.restore_open_sessions().await.unwrap();

        assert_eq!(
            report,
            RestoreReport {
                restored: 1,
                closed_duplicates: 1
            }
        );
        let sessions = repo.sessions().await;
        let closed = sessions.iter().find(|s| s.id == older.session_id).unwrap();
        assert_eq!(closed.leave_time, Some(start() + Duration::seconds(60)));
        assert_eq!(closed.duration_seconds, Some(60));

        clock.advance(Duration::seconds(30));
        let LifecycleOutcome::Left(left) = handler
            .handle_transition(transition("a", Some(TRACKED), None))
            .await
            .unwrap()
        else {
            panic!("expected restored session to close");
        };
        assert_eq!(left.id, newer.session_id);
        assert_eq!(left.duration_seconds, Some(90));
    }

    #[tokio::test]
    async fn persistence_failure_propagates() {
        let mut repo = MockVoiceLogRepository::new();
        repo.expect_find_or_create_member()
            .returning(|_| Err(RepositoryError::storage("connection reset")));
        let clock = Arc::new(ManualClock::new(start()));
        let handler = VoiceLifecycleHandler::new(TRACKED, Arc::new(repo), clock);

        let err = handler
            .handle_transition(transition("u1", None, Some(TRACKED)))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ApplicationError::Repository(RepositoryError::Storage { .. })
        ));
        assert!(handler.open_members().await.is_empty());
    }
}
