use async_trait::async_trait;
use commonground_core::Result;

use crate::domain::model::Session;

/// 会话仓储接口（需要作为 trait 对象使用，保留 async-trait）
///
/// 仓储只负责带 TTL 的存取和按用户的二级索引，不了解并发上限策略。
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// 写入会话，物理 TTL 为距离逻辑过期的剩余时间，同时维护用户索引
    async fn save(&self, session: &Session) -> Result<()>;

    /// 仅当记录仍存在时覆盖写入（不重建记录，不改索引），返回是否写入
    ///
    /// 会话在读取后被删除（失效、上限清除）时不会被写回；已过期的会话会被删除。
    async fn update_if_present(&self, session: &Session) -> Result<bool>;

    async fn find_by_id(&self, session_id: &str) -> Result<Option<Session>>;

    /// 用户当前仍存在的会话数量（已过期的索引项不计入）
    async fn count_by_user(&self, user_id: &str) -> Result<u64>;

    /// 删除会话及其索引项，返回会话是否存在
    async fn delete_by_id(&self, session_id: &str) -> Result<bool>;

    /// 删除用户的全部会话和索引，返回删除的会话数量
    async fn delete_all_by_user(&self, user_id: &str) -> Result<u64>;
}
