//! 语音频道在线时长统计的核心领域模型
//!
//! 包含成员、语音会话等实体，以及持久化层需要实现的仓储接口。

pub mod errors;
pub mod member;
pub mod repository;
pub mod value_objects;
pub mod voice_session;

// 重新导出常用类型
pub use errors::*;
pub use member::*;
pub use repository::*;
pub use value_objects::*;
pub use voice_session::*;
