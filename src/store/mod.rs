//! 协调存储
//!
//! 分布式锁归属和会话存在性的唯一事实来源。存储需要提供原子的
//! set-if-absent、按值比较删除，以及带 TTL 的普通读写。
//!
//! - [`RedisCoordinationStore`]：生产实现
//! - [`MemoryCoordinationStore`]：进程内实现，用于测试和 `memory://` 后端

mod memory_store;
mod redis_store;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::config::RedisPoolConfig;
use crate::error::Result;

pub use self::memory_store::MemoryCoordinationStore;
pub use self::redis_store::RedisCoordinationStore;

/// 进程内存储的 URL 标识
pub const MEMORY_STORE_URL: &str = "memory://";

/// 协调存储接口（需要作为 trait 对象使用，保留 async-trait）
///
/// 所有操作失败时返回错误，调用方不得把错误当作“键不存在”。
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// 键不存在时写入并设置 TTL，返回是否写入成功
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// 键存在时覆盖值并重置 TTL，不存在时不写入（Redis `SET XX PX`），返回是否写入
    async fn set_if_present(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// 仅当当前值等于 `expected` 时删除，返回是否删除
    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool>;

    /// 仅当当前值等于 `expected` 时重置 TTL，返回是否重置
    async fn expire_if_equals(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// 写入值；`ttl` 为 None 时不过期
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// 删除键，返回键是否存在
    async fn delete(&self, key: &str) -> Result<bool>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// 剩余 TTL；键不存在或没有过期时间时返回 None
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    /// 为已存在的键设置 TTL，返回键是否存在
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// 集合：添加成员
    async fn set_add(&self, key: &str, member: &str) -> Result<()>;

    /// 集合：移除成员
    async fn set_remove(&self, key: &str, members: &[String]) -> Result<()>;

    /// 集合：列出成员
    async fn set_members(&self, key: &str) -> Result<Vec<String>>;

    /// 健康检查
    async fn ping(&self) -> Result<()>;
}

/// 根据配置创建协调存储
///
/// `memory://` 使用进程内存储（仅适用于单进程部署和测试），其余 URL 按 Redis 连接。
pub async fn connect(config: &RedisPoolConfig) -> Result<Arc<dyn CoordinationStore>> {
    if config.url.starts_with(MEMORY_STORE_URL) {
        info!("Using in-process coordination store");
        return Ok(Arc::new(MemoryCoordinationStore::new()));
    }

    let store = RedisCoordinationStore::connect(&config.url, config.namespace.clone()).await?;
    info!(
        namespace = config.namespace.as_deref().unwrap_or(""),
        "Connected to Redis coordination store"
    );
    Ok(Arc::new(store))
}

/// 将 Duration 转换为 Redis 接受的毫秒数（至少 1 毫秒）
pub(crate) fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_millis_never_zero() {
        assert_eq!(ttl_millis(Duration::ZERO), 1);
        assert_eq!(ttl_millis(Duration::from_micros(10)), 1);
        assert_eq!(ttl_millis(Duration::from_secs(10)), 10_000);
    }

    #[tokio::test]
    async fn test_connect_memory_backend() {
        let config = RedisPoolConfig {
            url: "memory://".to_string(),
            namespace: None,
        };
        let store = connect(&config).await.unwrap();
        store.ping().await.unwrap();
        assert!(store.set_if_absent("k", "v", Duration::from_secs(1)).await.unwrap());
    }
}
