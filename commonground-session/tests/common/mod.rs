//! 集成测试共用的存储包装：可切换为不可用，或让下一次匹配前缀的读取变慢

#![allow(dead_code)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use commonground_core::{
    CoordinationError, CoordinationStore, MemoryCoordinationStore, Result as StoreResult,
};
use tokio::sync::Notify;

#[derive(Default)]
pub struct TestStore {
    pub inner: MemoryCoordinationStore,
    down: AtomicBool,
    slow_read: Mutex<Option<(String, Duration)>>,
    /// 慢读取开始等待时通知
    pub read_parked: Notify,
}

impl TestStore {
    pub fn unavailable() -> Self {
        let store = Self::default();
        store.set_down(true);
        store
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// 下一次键以 `prefix` 开头的 GET 先等待 `delay` 再读取（只生效一次）
    pub fn delay_next_read(&self, prefix: &str, delay: Duration) {
        if let Ok(mut slot) = self.slow_read.lock() {
            *slot = Some((prefix.to_string(), delay));
        }
    }

    fn check(&self) -> StoreResult<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(CoordinationError::StoreUnavailable(
                "connection reset by peer".to_string(),
            ));
        }
        Ok(())
    }

    fn take_delay(&self, key: &str) -> Option<Duration> {
        let mut slot = self.slow_read.lock().ok()?;
        match slot.as_ref() {
            Some((prefix, _)) if key.starts_with(prefix.as_str()) => slot.take().map(|(_, d)| d),
            _ => None,
        }
    }
}

#[async_trait]
impl CoordinationStore for TestStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        self.check()?;
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn set_if_present(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        self.check()?;
        self.inner.set_if_present(key, value, ttl).await
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> StoreResult<bool> {
        self.check()?;
        self.inner.delete_if_equals(key, expected).await
    }

    async fn expire_if_equals(&self, key: &str, expected: &str, ttl: Duration) -> StoreResult<bool> {
        self.check()?;
        self.inner.expire_if_equals(key, expected, ttl).await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.check()?;
        if let Some(delay) = self.take_delay(key) {
            self.read_parked.notify_one();
            tokio::time::sleep(delay).await;
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        self.check()?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.check()?;
        self.inner.exists(key).await
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        self.check()?;
        self.inner.ttl(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        self.check()?;
        self.inner.expire(key, ttl).await
    }

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<()> {
        self.check()?;
        self.inner.set_add(key, member).await
    }

    async fn set_remove(&self, key: &str, members: &[String]) -> StoreResult<()> {
        self.check()?;
        self.inner.set_remove(key, members).await
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        self.check()?;
        self.inner.set_members(key).await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.check()?;
        self.inner.ping().await
    }
}
