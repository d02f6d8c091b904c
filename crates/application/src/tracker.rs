//! 内存中的在线会话追踪器
//!
//! 记录哪些成员当前在被追踪频道中有未结束的会话，避免每个事件都查询存储，
//! 同时用于识别重复的加入/离开信号。只在进程生命周期内有效。

use std::collections::{HashMap, HashSet};

use domain::{ExternalId, SessionHandle};

#[derive(Debug, Default)]
pub struct SessionTracker {
    open: HashMap<ExternalId, SessionHandle>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一条未结束的会话，覆盖旧条目并返回被替换的句柄。
    pub fn open(&mut self, member: ExternalId, handle: SessionHandle) -> Option<SessionHandle> {
        self.open.insert(member, handle)
    }

    /// 移除并返回成员的会话，没有则返回 `None`。
    pub fn close(&mut self, member: &ExternalId) -> Option<SessionHandle> {
        self.open.remove(member)
    }

    pub fn get(&self, member: &ExternalId) -> Option<&SessionHandle> {
        self.open.get(member)
    }

    pub fn contains(&self, member: &ExternalId) -> bool {
        self.open.contains_key(member)
    }

    pub fn snapshot(&self) -> HashSet<ExternalId> {
        self.open.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }
}
