//! 分布式锁管理器
//!
//! 基于协调存储的租约锁：
//! - 获取：在等待窗口内反复尝试 `set_if_absent(key, token, lease)`
//! - 释放：`delete_if_equals(key, token)`，只删除自己持有的锁
//! - 续期：`expire_if_equals(key, token, lease)`
//!
//! 租约过期是防止死锁的手段：崩溃或卡住的持有者不会永久占用资源。
//! 代价是当持有者的执行时间（含 GC、调度延迟）超过租约时，另一个调用方
//! 可能在它仍在执行时获取同一把锁。需要绝对互斥的操作必须开启续期或自行处理。

use std::sync::Arc;
use std::time::Duration;

use commonground_core::{
    CoordinationError, CoordinationStore, Result, deadline_after, generate_owner_token,
};
use rand::Rng;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::LockConfig;
use crate::domain::guard::LockGuard;
use crate::domain::model::{LockHandle, LockOptions};

pub struct LockManager {
    store: Arc<dyn CoordinationStore>,
    config: LockConfig,
}

impl LockManager {
    pub fn new(store: Arc<dyn CoordinationStore>, config: LockConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// 按配置默认值构造加锁参数
    pub fn default_options(&self) -> LockOptions {
        LockOptions::from(&self.config)
    }

    fn store_key(&self, key: &str) -> String {
        format!("{}:{}", self.config.key_prefix, key)
    }

    /// 基础间隔加上最多一半的随机抖动，避免等待者同时重试
    fn retry_delay(&self) -> Duration {
        let base = self.config.retry_interval;
        let max_jitter = u64::try_from(base.as_millis() / 2).unwrap_or(0);
        if max_jitter == 0 {
            return base;
        }
        let jitter = rand::thread_rng().gen_range(0..=max_jitter);
        base + Duration::from_millis(jitter)
    }

    /// 只尝试一次，锁被占用时返回 None
    pub async fn try_acquire(&self, key: &str, lease_time: Duration) -> Result<Option<LockHandle>> {
        let store_key = self.store_key(key);
        let owner_token = generate_owner_token();

        let acquired = self
            .store
            .set_if_absent(&store_key, &owner_token, lease_time)
            .await?;

        if acquired {
            Ok(Some(LockHandle::new(
                key.to_string(),
                store_key,
                owner_token,
                lease_time,
            )))
        } else {
            Ok(None)
        }
    }

    /// 在 `wait_time` 内获取锁，超时返回 [`CoordinationError::LockTimeout`]
    pub async fn acquire(&self, key: &str, options: &LockOptions) -> Result<LockHandle> {
        self.acquire_with(key, options, None).await
    }

    /// 可取消的获取：等待期间收到取消信号时立即返回
    /// [`CoordinationError::ConcurrencyConflict`]（原因为 `Interrupted`），且不会遗留锁
    pub async fn acquire_cancellable(
        &self,
        key: &str,
        options: &LockOptions,
        cancel: &CancellationToken,
    ) -> Result<LockHandle> {
        self.acquire_with(key, options, Some(cancel)).await
    }

    pub(crate) async fn acquire_with(
        &self,
        key: &str,
        options: &LockOptions,
        cancel: Option<&CancellationToken>,
    ) -> Result<LockHandle> {
        let started = Instant::now();
        let deadline = deadline_after(started, options.wait_time);
        let mut attempts: u32 = 0;

        loop {
            if cancel.is_some_and(|token| token.is_cancelled()) {
                debug!(key = %key, attempts, "Lock acquisition interrupted");
                return Err(CoordinationError::interrupted(key));
            }

            attempts += 1;
            if let Some(handle) = self.try_acquire(key, options.lease_time).await? {
                // 取消信号在本次请求途中到达：归还刚拿到的锁
                if cancel.is_some_and(|token| token.is_cancelled()) {
                    self.release(&handle).await?;
                    return Err(CoordinationError::interrupted(key));
                }
                debug!(
                    key = %key,
                    attempts,
                    lease_ms = options.lease_time.as_millis() as u64,
                    "Lock acquired"
                );
                return Ok(handle);
            }

            let now = Instant::now();
            if now >= deadline {
                let waited = now.duration_since(started);
                warn!(
                    key = %key,
                    attempts,
                    waited_ms = waited.as_millis() as u64,
                    "Lock acquisition timed out"
                );
                return Err(CoordinationError::LockTimeout {
                    key: key.to_string(),
                    waited,
                });
            }

            let pause = self.retry_delay().min(deadline - now);
            match cancel {
                Some(token) => {
                    tokio::select! {
                        _ = token.cancelled() => {
                            debug!(key = %key, attempts, "Lock acquisition interrupted");
                            return Err(CoordinationError::interrupted(key));
                        }
                        _ = sleep(pause) => {}
                    }
                }
                None => sleep(pause).await,
            }
        }
    }

    /// 释放锁；锁已过期或已被他人获取时不做任何事并返回 false
    pub async fn release(&self, handle: &LockHandle) -> Result<bool> {
        let released = self
            .store
            .delete_if_equals(handle.store_key(), handle.owner_token())
            .await?;

        if released {
            debug!(
                key = %handle.key(),
                held_ms = handle.held_for().as_millis() as u64,
                "Lock released"
            );
        } else {
            debug!(
                key = %handle.key(),
                lease_expired = handle.lease_probably_expired(),
                "Lock no longer owned at release, nothing to do"
            );
        }
        Ok(released)
    }

    /// 续期；仅当锁仍归本 handle 所有时成功
    pub async fn extend(&self, handle: &LockHandle, lease_time: Duration) -> Result<bool> {
        let extended = self
            .store
            .expire_if_equals(handle.store_key(), handle.owner_token(), lease_time)
            .await?;
        if !extended {
            warn!(key = %handle.key(), "Lease renewal failed, lock is no longer owned");
        }
        Ok(extended)
    }

    /// 获取锁并返回作用域守卫
    pub async fn lock(self: &Arc<Self>, key: &str, options: &LockOptions) -> Result<LockGuard> {
        let handle = self.acquire(key, options).await?;
        Ok(LockGuard::new(self.clone(), handle, options.auto_renew))
    }

    /// 可取消地获取锁并返回作用域守卫
    pub async fn lock_cancellable(
        self: &Arc<Self>,
        key: &str,
        options: &LockOptions,
        cancel: &CancellationToken,
    ) -> Result<LockGuard> {
        let handle = self.acquire_cancellable(key, options, cancel).await?;
        Ok(LockGuard::new(self.clone(), handle, options.auto_renew))
    }
}
