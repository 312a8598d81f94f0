//! 基于协调存储的会话仓储
//!
//! 键布局：
//! - `{key_prefix}:{session_id}`：会话 JSON，TTL 为距离逻辑过期的剩余时间
//! - `{index_prefix}:{user_id}`：该用户的会话 ID 集合，TTL 不短于其中最晚过期的会话
//!
//! 索引项可能比会话记录活得更久，`count_by_user` 读取时顺带清理。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use commonground_core::{Clock, CoordinationError, CoordinationStore, Result};
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::domain::model::Session;
use crate::domain::repository::SessionRepository;

pub struct StoreSessionRepository {
    store: Arc<dyn CoordinationStore>,
    config: Arc<SessionConfig>,
    clock: Arc<dyn Clock>,
}

impl StoreSessionRepository {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        config: Arc<SessionConfig>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    fn session_key(&self, session_id: &str) -> String {
        format!("{}:{}", self.config.key_prefix, session_id)
    }

    fn index_key(&self, user_id: &str) -> String {
        format!("{}:{}", self.config.index_prefix, user_id)
    }

    /// 只延长不缩短索引 TTL
    async fn extend_index_ttl(&self, index_key: &str, ttl: Duration) -> Result<()> {
        let current = self.store.ttl(index_key).await?;
        if current.is_none_or(|remaining| remaining < ttl) {
            self.store.expire(index_key, ttl).await?;
        }
        Ok(())
    }

    async fn remove_expired(&self, key: &str, session: &Session) -> Result<()> {
        debug!(
            session_id = %session.session_id,
            user_id = %session.user_id,
            "Session already expired, removing instead of saving"
        );
        self.store.delete(key).await?;
        self.store
            .set_remove(
                &self.index_key(&session.user_id),
                std::slice::from_ref(&session.session_id),
            )
            .await
    }

    fn encode(key: &str, session: &Session) -> Result<String> {
        serde_json::to_string(session).map_err(|source| CoordinationError::Serialization {
            key: key.to_string(),
            source,
        })
    }

    fn decode(key: &str, payload: &str) -> Result<Session> {
        serde_json::from_str(payload).map_err(|source| CoordinationError::Serialization {
            key: key.to_string(),
            source,
        })
    }
}

#[async_trait]
impl SessionRepository for StoreSessionRepository {
    async fn save(&self, session: &Session) -> Result<()> {
        let key = self.session_key(&session.session_id);
        let index_key = self.index_key(&session.user_id);
        let remaining = session.remaining_ttl(self.clock.now());

        if remaining.is_zero() {
            return self.remove_expired(&key, session).await;
        }

        let payload = Self::encode(&key, session)?;

        self.store.set(&key, &payload, Some(remaining)).await?;
        self.store.set_add(&index_key, &session.session_id).await?;
        self.extend_index_ttl(&index_key, remaining).await?;

        debug!(
            session_id = %session.session_id,
            user_id = %session.user_id,
            ttl_secs = remaining.as_secs(),
            "Session saved"
        );
        Ok(())
    }

    async fn update_if_present(&self, session: &Session) -> Result<bool> {
        let key = self.session_key(&session.session_id);
        let remaining = session.remaining_ttl(self.clock.now());

        if remaining.is_zero() {
            self.remove_expired(&key, session).await?;
            return Ok(false);
        }

        let payload = Self::encode(&key, session)?;
        let updated = self.store.set_if_present(&key, &payload, remaining).await?;
        if !updated {
            debug!(
                session_id = %session.session_id,
                "Session removed concurrently, skipping update"
            );
        }
        Ok(updated)
    }

    async fn find_by_id(&self, session_id: &str) -> Result<Option<Session>> {
        let key = self.session_key(session_id);
        match self.store.get(&key).await? {
            Some(payload) => Self::decode(&key, &payload).map(Some),
            None => Ok(None),
        }
    }

    async fn count_by_user(&self, user_id: &str) -> Result<u64> {
        let index_key = self.index_key(user_id);
        let members = self.store.set_members(&index_key).await?;

        let mut live = 0u64;
        let mut dead = Vec::new();
        for session_id in members {
            if self.store.exists(&self.session_key(&session_id)).await? {
                live += 1;
            } else {
                dead.push(session_id);
            }
        }

        if !dead.is_empty() {
            debug!(
                user_id = %user_id,
                pruned = dead.len(),
                "Pruning expired entries from user session index"
            );
            self.store.set_remove(&index_key, &dead).await?;
        }

        Ok(live)
    }

    async fn delete_by_id(&self, session_id: &str) -> Result<bool> {
        let key = self.session_key(session_id);
        let Some(payload) = self.store.get(&key).await? else {
            return Ok(false);
        };

        self.store.delete(&key).await?;
        match Self::decode(&key, &payload) {
            Ok(session) => {
                self.store
                    .set_remove(&self.index_key(&session.user_id), &[session_id.to_string()])
                    .await?;
            }
            Err(err) => {
                // 无法得知所属用户，索引项留给 count_by_user 清理
                warn!(session_id = %session_id, error = %err, "Deleted malformed session record");
            }
        }
        Ok(true)
    }

    async fn delete_all_by_user(&self, user_id: &str) -> Result<u64> {
        let index_key = self.index_key(user_id);
        let members = self.store.set_members(&index_key).await?;

        let mut deleted = 0u64;
        for session_id in &members {
            if self.store.delete(&self.session_key(session_id)).await? {
                deleted += 1;
            }
        }
        self.store.delete(&index_key).await?;

        debug!(user_id = %user_id, indexed = members.len(), deleted, "Deleted all user sessions");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use commonground_core::{ManualClock, MemoryCoordinationStore};

    struct Fixture {
        store: Arc<MemoryCoordinationStore>,
        clock: Arc<ManualClock>,
        repo: StoreSessionRepository,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryCoordinationStore::new());
        let clock = Arc::new(ManualClock::starting_now());
        let repo = StoreSessionRepository::new(
            store.clone(),
            Arc::new(SessionConfig::default()),
            clock.clone(),
        );
        Fixture { store, clock, repo }
    }

    fn session(f: &Fixture, id: &str, user: &str, ttl_secs: u64) -> Session {
        Session::create(id.into(), user, Some("curl/8.0".into()), ttl_secs, f.clock.now())
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_and_find() {
        let f = fixture();
        let s = session(&f, "s1", "alice", 3_600);
        f.repo.save(&s).await.unwrap();

        assert_eq!(f.repo.find_by_id("s1").await.unwrap(), Some(s));
        assert_eq!(
            f.store.ttl("session:s1").await.unwrap(),
            Some(Duration::from_secs(3_600))
        );
        assert_eq!(f.store.set_members("user_sessions:alice").await.unwrap(), vec!["s1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_uses_remaining_ttl() {
        let f = fixture();
        let s = session(&f, "s1", "alice", 100);
        f.clock.advance(TimeDelta::seconds(40));
        f.repo.save(&s).await.unwrap();

        assert_eq!(
            f.store.ttl("session:s1").await.unwrap(),
            Some(Duration::from_secs(60))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_saving_expired_session_removes_it() {
        let f = fixture();
        let s = session(&f, "s1", "alice", 10);
        f.repo.save(&s).await.unwrap();

        f.clock.advance(TimeDelta::seconds(11));
        f.repo.save(&s).await.unwrap();

        assert!(f.repo.find_by_id("s1").await.unwrap().is_none());
        assert_eq!(f.repo.count_by_user("alice").await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_if_present_does_not_recreate() {
        let f = fixture();
        let mut s = session(&f, "s1", "alice", 600);
        f.repo.save(&s).await.unwrap();
        f.repo.delete_by_id("s1").await.unwrap();

        s.touch(f.clock.now());
        assert!(!f.repo.update_if_present(&s).await.unwrap());
        assert!(f.repo.find_by_id("s1").await.unwrap().is_none());
        assert!(!f.store.exists("user_sessions:alice").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_if_present_rewrites_live_record() {
        let f = fixture();
        let mut s = session(&f, "s1", "alice", 600);
        f.repo.save(&s).await.unwrap();

        f.clock.advance(TimeDelta::seconds(100));
        s.touch(f.clock.now());
        assert!(f.repo.update_if_present(&s).await.unwrap());
        assert_eq!(f.repo.find_by_id("s1").await.unwrap(), Some(s));
        assert_eq!(
            f.store.ttl("session:s1").await.unwrap(),
            Some(Duration::from_secs(500))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_if_present_removes_expired_session() {
        let f = fixture();
        let s = session(&f, "s1", "alice", 10);
        f.repo.save(&s).await.unwrap();

        f.clock.advance(TimeDelta::seconds(11));
        assert!(!f.repo.update_if_present(&s).await.unwrap());
        assert!(f.repo.find_by_id("s1").await.unwrap().is_none());
        assert_eq!(f.repo.count_by_user("alice").await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_index_ttl_covers_longest_member() {
        let f = fixture();
        f.repo.save(&session(&f, "long", "alice", 600)).await.unwrap();
        f.repo.save(&session(&f, "short", "alice", 60)).await.unwrap();

        assert_eq!(
            f.store.ttl("user_sessions:alice").await.unwrap(),
            Some(Duration::from_secs(600))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_count_prunes_expired_members() {
        let f = fixture();
        f.repo.save(&session(&f, "short", "alice", 60)).await.unwrap();
        f.repo.save(&session(&f, "long", "alice", 600)).await.unwrap();
        assert_eq!(f.repo.count_by_user("alice").await.unwrap(), 2);

        tokio::time::advance(Duration::from_secs(61)).await;

        assert_eq!(f.repo.count_by_user("alice").await.unwrap(), 1);
        assert_eq!(
            f.store.set_members("user_sessions:alice").await.unwrap(),
            vec!["long"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_by_id_updates_index() {
        let f = fixture();
        f.repo.save(&session(&f, "s1", "alice", 600)).await.unwrap();
        f.repo.save(&session(&f, "s2", "alice", 600)).await.unwrap();

        assert!(f.repo.delete_by_id("s1").await.unwrap());
        assert!(!f.repo.delete_by_id("s1").await.unwrap());
        assert_eq!(
            f.store.set_members("user_sessions:alice").await.unwrap(),
            vec!["s2"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_all_by_user() {
        let f = fixture();
        for id in ["s1", "s2", "s3"] {
            f.repo.save(&session(&f, id, "alice", 600)).await.unwrap();
        }
        f.repo.save(&session(&f, "b1", "bob", 600)).await.unwrap();

        assert_eq!(f.repo.delete_all_by_user("alice").await.unwrap(), 3);
        assert_eq!(f.repo.count_by_user("alice").await.unwrap(), 0);
        assert!(!f.store.exists("user_sessions:alice").await.unwrap());
        assert_eq!(f.repo.count_by_user("bob").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_malformed_record_is_an_error_but_deletable() {
        let f = fixture();
        f.store.set("session:bad", "{not json", None).await.unwrap();

        let err = f.repo.find_by_id("bad").await.unwrap_err();
        assert!(matches!(err, CoordinationError::Serialization { .. }));

        assert!(f.repo.delete_by_id("bad").await.unwrap());
        assert!(!f.store.exists("session:bad").await.unwrap());
    }
}
