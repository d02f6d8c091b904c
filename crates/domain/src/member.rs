use serde::{Deserialize, Serialize};

use crate::value_objects::{ExternalId, MemberId};

/// 被追踪的社区成员，首次出现语音事件时惰性创建，从不删除。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub external_id: ExternalId,
}

impl Member {
    pub fn new(id: MemberId, external_id: ExternalId) -> Self {
        Self { id, external_id }
    }
}
