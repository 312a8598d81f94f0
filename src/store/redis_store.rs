use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, Script, aio::ConnectionManager};
use tracing::debug;

use super::{CoordinationStore, ttl_millis};
use crate::error::{CoordinationError, Result};

/// 值匹配时删除
const COMPARE_AND_DELETE: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// 值匹配时重置过期时间
const COMPARE_AND_PEXPIRE: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
"#;

/// 基于 Redis 的协调存储
///
/// 使用 `SET NX PX` 实现原子的 set-if-absent，使用 Lua 脚本实现按值比较删除/续期。
#[derive(Clone)]
pub struct RedisCoordinationStore {
    conn: ConnectionManager,
    namespace: Option<String>,
    compare_and_delete: Script,
    compare_and_pexpire: Script,
}

impl RedisCoordinationStore {
    /// 连接 Redis
    pub async fn connect(url: &str, namespace: Option<String>) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|err| CoordinationError::StoreUnavailable(format!("{url}: {err}")))?;
        Ok(Self::with_connection(conn, namespace))
    }

    pub fn with_connection(conn: ConnectionManager, namespace: Option<String>) -> Self {
        Self {
            conn,
            namespace: namespace.filter(|ns| !ns.is_empty()),
            compare_and_delete: Script::new(COMPARE_AND_DELETE),
            compare_and_pexpire: Script::new(COMPARE_AND_PEXPIRE),
        }
    }

    fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }

    fn namespaced(&self, key: &str) -> String {
        match &self.namespace {
            Some(ns) => format!("{}:{}", ns, key),
            None => key.to_string(),
        }
    }
}

#[async_trait]
impl CoordinationStore for RedisCoordinationStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.connection();
        let key = self.namespaced(key);
        let reply: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn set_if_present(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.connection();
        let key = self.namespaced(key);
        let reply: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(value)
            .arg("XX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool> {
        let mut conn = self.connection();
        let key = self.namespaced(key);
        let deleted: i64 = self
            .compare_and_delete
            .key(&key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }

    async fn expire_if_equals(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.connection();
        let key = self.namespaced(key);
        let renewed: i64 = self
            .compare_and_pexpire
            .key(&key)
            .arg(expected)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await?;
        Ok(renewed == 1)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection();
        let value: Option<String> = conn.get(self.namespaced(key)).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.connection();
        let key = self.namespaced(key);
        match ttl {
            Some(ttl) => {
                let _: () = conn.pset_ex(&key, value, ttl_millis(ttl)).await?;
            }
            None => {
                let _: () = conn.set(&key, value).await?;
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection();
        let removed: i64 = conn.del(self.namespaced(key)).await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection();
        let exists: bool = conn.exists(self.namespaced(key)).await?;
        Ok(exists)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut conn = self.connection();
        // -2: 键不存在，-1: 没有过期时间
        let millis: i64 = conn.pttl(self.namespaced(key)).await?;
        Ok(u64::try_from(millis).ok().map(Duration::from_millis))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.connection();
        let millis = i64::try_from(ttl_millis(ttl)).unwrap_or(i64::MAX);
        let applied: bool = conn.pexpire(self.namespaced(key), millis).await?;
        Ok(applied)
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.connection();
        let _: i64 = conn.sadd(self.namespaced(key), member).await?;
        Ok(())
    }

    async fn set_remove(&self, key: &str, members: &[String]) -> Result<()> {
        if members.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection();
        let removed: i64 = conn.srem(self.namespaced(key), members).await?;
        debug!(key = %key, removed, "Removed set members");
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.connection();
        let members: Vec<String> = conn.smembers(self.namespaced(key)).await?;
        Ok(members)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 需要本地 Redis：REDIS_URL=redis://127.0.0.1:6379 cargo test -- --ignored
    #[tokio::test]
    #[ignore]
    async fn test_redis_lock_primitives() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let store = RedisCoordinationStore::connect(&url, Some("commonground-test".into()))
            .await
            .unwrap();
        let key = format!("lock:{}", uuid::Uuid::new_v4());

        assert!(store.set_if_absent(&key, "a", Duration::from_secs(5)).await.unwrap());
        assert!(!store.set_if_absent(&key, "b", Duration::from_secs(5)).await.unwrap());
        assert!(store.expire_if_equals(&key, "a", Duration::from_secs(10)).await.unwrap());
        assert!(!store.delete_if_equals(&key, "b").await.unwrap());
        assert!(store.delete_if_equals(&key, "a").await.unwrap());
        assert_eq!(store.get(&key).await.unwrap(), None);

        assert!(!store.set_if_present(&key, "c", Duration::from_secs(5)).await.unwrap());
        assert_eq!(store.get(&key).await.unwrap(), None);
        store.set(&key, "c", None).await.unwrap();
        assert!(store.set_if_present(&key, "d", Duration::from_secs(5)).await.unwrap());
        assert_eq!(store.get(&key).await.unwrap().as_deref(), Some("d"));
        store.delete(&key).await.unwrap();
    }
}
