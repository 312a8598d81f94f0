use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use redis::{ErrorKind, RedisError};
use tokio::time::Instant;

use super::CoordinationStore;
use crate::error::Result;
use crate::utils::deadline_after;

#[derive(Debug, Clone)]
enum StoredValue {
    Str(String),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct StoredEntry {
    value: StoredValue,
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn string(value: &str, ttl: Option<Duration>) -> Self {
        Self {
            value: StoredValue::Str(value.to_string()),
            expires_at: ttl.map(|ttl| deadline_after(Instant::now(), ttl)),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    fn holds(&self, expected: &str) -> bool {
        matches!(&self.value, StoredValue::Str(v) if v == expected)
    }
}

fn wrong_type(key: &str) -> RedisError {
    RedisError::from((
        ErrorKind::TypeError,
        "WRONGTYPE",
        format!("operation against a key holding the wrong kind of value: {key}"),
    ))
}

/// 进程内协调存储
///
/// 每个键上的操作都在 DashMap 分片锁内完成，因此 set-if-absent 和按值比较删除
/// 在同一进程的并发任务之间是原子的。过期在访问时惰性判定，使用 tokio 时钟，
/// 测试中可以配合 `tokio::time::pause` 推进时间。
#[derive(Clone, Default)]
pub struct MemoryCoordinationStore {
    entries: Arc<DashMap<String, StoredEntry>>,
}

impl MemoryCoordinationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前未过期的键数量
    pub fn live_keys(&self) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .count()
    }

    fn purge_if_expired(&self, key: &str) {
        let now = Instant::now();
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
    }
}

#[async_trait]
impl CoordinationStore for MemoryCoordinationStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(StoredEntry::string(value, Some(ttl)));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredEntry::string(value, Some(ttl)));
                Ok(true)
            }
        }
    }

    async fn set_if_present(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) => {
                if matches!(entry.value, StoredValue::Set(_)) {
                    return Err(wrong_type(key).into());
                }
                *entry = StoredEntry::string(value, Some(ttl));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool> {
        let now = Instant::now();
        let removed = self
            .entries
            .remove_if(key, |_, entry| !entry.is_expired(now) && entry.holds(expected));
        Ok(removed.is_some())
    }

    async fn expire_if_equals(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) && entry.holds(expected) => {
                entry.expires_at = Some(deadline_after(now, ttl));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let value = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => match &entry.value {
                StoredValue::Str(v) => Some(v.clone()),
                StoredValue::Set(_) => return Err(wrong_type(key).into()),
            },
            Some(_) => None,
            None => return Ok(None),
        };
        if value.is_none() {
            self.purge_if_expired(key);
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.entries
            .insert(key.to_string(), StoredEntry::string(value, ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired(now)))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now)))
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let now = Instant::now();
        Ok(self.entries.get(key).and_then(|entry| {
            if entry.is_expired(now) {
                None
            } else {
                entry.expires_at.map(|at| at.saturating_duration_since(now))
            }
        }))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) => {
                entry.expires_at = Some(deadline_after(now, ttl));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<()> {
        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| StoredEntry {
                value: StoredValue::Set(HashSet::new()),
                expires_at: None,
            });
        if entry.is_expired(now) {
            *entry = StoredEntry {
                value: StoredValue::Set(HashSet::new()),
                expires_at: None,
            };
        }
        match &mut entry.value {
            StoredValue::Set(members) => {
                members.insert(member.to_string());
                Ok(())
            }
            StoredValue::Str(_) => Err(wrong_type(key).into()),
        }
    }

    async fn set_remove(&self, key: &str, members: &[String]) -> Result<()> {
        let now = Instant::now();
        let emptied = match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) => match &mut entry.value {
                StoredValue::Set(set) => {
                    for member in members {
                        set.remove(member);
                    }
                    set.is_empty()
                }
                StoredValue::Str(_) => return Err(wrong_type(key).into()),
            },
            _ => false,
        };
        // Redis 在集合为空时删除键
        if emptied {
            self.entries.remove_if(key, |_, entry| {
                matches!(&entry.value, StoredValue::Set(set) if set.is_empty())
            });
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => match &entry.value {
                StoredValue::Set(set) => Ok(set.iter().cloned().collect()),
                StoredValue::Str(_) => Err(wrong_type(key).into()),
            },
            _ => Ok(Vec::new()),
        }
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    #[tokio::test]
    async fn test_set_if_absent_respects_existing_value() {
        let store = MemoryCoordinationStore::new();

        assert!(store.set_if_absent("lock:a", "t1", Duration::from_secs(10)).await.unwrap());
        assert!(!store.set_if_absent("lock:a", "t2", Duration::from_secs(10)).await.unwrap());
        assert_eq!(store.get("lock:a").await.unwrap().as_deref(), Some("t1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_key_is_absent_and_reacquirable() {
        let store = MemoryCoordinationStore::new();

        assert!(store.set_if_absent("lock:a", "t1", Duration::from_millis(100)).await.unwrap());
        advance(Duration::from_millis(150)).await;

        assert_eq!(store.get("lock:a").await.unwrap(), None);
        assert!(!store.exists("lock:a").await.unwrap());
        assert!(store.set_if_absent("lock:a", "t2", Duration::from_secs(1)).await.unwrap());
        assert_eq!(store.get("lock:a").await.unwrap().as_deref(), Some("t2"));
    }

    #[tokio::test]
    async fn test_delete_if_equals_only_removes_owner_value() {
        let store = MemoryCoordinationStore::new();
        store.set_if_absent("lock:a", "owner", Duration::from_secs(10)).await.unwrap();

        assert!(!store.delete_if_equals("lock:a", "intruder").await.unwrap());
        assert!(store.exists("lock:a").await.unwrap());
        assert!(store.delete_if_equals("lock:a", "owner").await.unwrap());
        assert!(!store.exists("lock:a").await.unwrap());
        assert!(!store.delete_if_equals("lock:a", "owner").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_if_equals_extends_only_for_owner() {
        let store = MemoryCoordinationStore::new();
        store.set_if_absent("lock:a", "owner", Duration::from_millis(100)).await.unwrap();

        assert!(!store.expire_if_equals("lock:a", "other", Duration::from_secs(5)).await.unwrap());
        assert!(store.expire_if_equals("lock:a", "owner", Duration::from_secs(5)).await.unwrap());

        advance(Duration::from_millis(500)).await;
        assert!(store.exists("lock:a").await.unwrap());
        let remaining = store.ttl("lock:a").await.unwrap().unwrap();
        assert!(remaining <= Duration::from_millis(4500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_if_present_never_creates() {
        let store = MemoryCoordinationStore::new();
        assert!(!store.set_if_present("session:s1", "v1", Duration::from_secs(5)).await.unwrap());
        assert!(!store.exists("session:s1").await.unwrap());

        store.set("session:s1", "v1", Some(Duration::from_millis(100))).await.unwrap();
        assert!(store.set_if_present("session:s1", "v2", Duration::from_secs(5)).await.unwrap());
        assert_eq!(store.get("session:s1").await.unwrap().as_deref(), Some("v2"));
        assert_eq!(store.ttl("session:s1").await.unwrap(), Some(Duration::from_secs(5)));

        advance(Duration::from_secs(6)).await;
        assert!(!store.set_if_present("session:s1", "v3", Duration::from_secs(5)).await.unwrap());
        assert!(!store.exists("session:s1").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_ttl_does_not_overflow() {
        let store = MemoryCoordinationStore::new();
        assert!(store.set_if_absent("lock:a", "t1", Duration::MAX).await.unwrap());
        store.set("b", "2", Some(Duration::MAX)).await.unwrap();
        assert!(store.expire("b", Duration::MAX).await.unwrap());
        assert!(store.expire_if_equals("lock:a", "t1", Duration::MAX).await.unwrap());

        advance(Duration::from_secs(86_400 * 365)).await;
        assert!(store.exists("lock:a").await.unwrap());
        assert!(store.exists("b").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_with_ttl_and_without() {
        let store = MemoryCoordinationStore::new();
        store.set("a", "1", Some(Duration::from_secs(1))).await.unwrap();
        store.set("b", "2", None).await.unwrap();

        assert_eq!(store.ttl("b").await.unwrap(), None);
        advance(Duration::from_secs(2)).await;

        assert_eq!(store.get("a").await.unwrap(), None);
        assert_eq!(store.get("b").await.unwrap().as_deref(), Some("2"));
        assert_eq!(store.live_keys(), 1);
    }

    #[tokio::test]
    async fn test_set_operations() {
        let store = MemoryCoordinationStore::new();
        store.set_add("user_sessions:alice", "s1").await.unwrap();
        store.set_add("user_sessions:alice", "s2").await.unwrap();
        store.set_add("user_sessions:alice", "s2").await.unwrap();

        let mut members = store.set_members("user_sessions:alice").await.unwrap();
        members.sort();
        assert_eq!(members, vec!["s1".to_string(), "s2".to_string()]);

        store
            .set_remove("user_sessions:alice", &["s1".to_string(), "s2".to_string()])
            .await
            .unwrap();
        assert!(store.set_members("user_sessions:alice").await.unwrap().is_empty());
        assert!(!store.exists("user_sessions:alice").await.unwrap());
    }

    #[tokio::test]
    async fn test_wrong_type_is_an_error() {
        let store = MemoryCoordinationStore::new();
        store.set("plain", "v", None).await.unwrap();
        assert!(store.set_add("plain", "m").await.is_err());
        store.set_add("set", "m").await.unwrap();
        assert!(store.get("set").await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_set_if_absent_has_single_winner() {
        let store = MemoryCoordinationStore::new();
        let mut handles = Vec::new();
        for i in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .set_if_absent("lock:race", &format!("t{i}"), Duration::from_secs(10))
                    .await
                    .unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
