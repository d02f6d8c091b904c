//! 应用层实现。
//!
//! 这里提供语音会话生命周期处理、内存追踪器与排行榜查询等用例服务，
//! 以及对外部适配器（时钟、持久化）的抽象。

pub mod clock;
pub mod error;
pub mod lifecycle;
pub mod memory;
pub mod ranking;
pub mod tracker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::ApplicationError;
pub use lifecycle::{
    LifecycleOutcome, MemberDirectory, ReconcileReport, RestoreReport, RosterEntry,
    VoiceLifecycleHandler, VoiceTransition,
};
pub use memory::MemoryVoiceLogRepository;
pub use ranking::{
    format_duration, RankingEntry, RankingReport, RankingService, DEFAULT_RANKING_DAYS,
    MAX_RANKING_DAYS, USAGE_HINT,
};
pub use tracker::SessionTracker;
