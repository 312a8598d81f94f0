//! 互斥执行包装
//!
//! 把任意异步操作包装为“获取键 K 的锁 → 执行 → 始终释放”。包装器不关心操作
//! 做什么，只保证同一个键在同一时刻至多有一个操作在执行（前提是租约长于
//! 操作的实际执行时间，见 [`crate::domain::lock_manager`]）。
//!
//! ```rust,ignore
//! let options = executor.default_options().with_lease_time(Duration::from_secs(300));
//! let articles = executor
//!     .run_exclusive_for(
//!         request,
//!         |r| LockKey::new("naver_crawling").part(r.office_id).part(r.category_id).into(),
//!         &options,
//!         |r| async move { crawler.crawl(r).await },
//!     )
//!     .await?;
//! ```

use std::future::Future;
use std::sync::Arc;

use commonground_core::CoordinationError;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::domain::{LockGuard, LockManager, LockOptions};

#[derive(Clone)]
pub struct GuardedExecutor {
    manager: Arc<LockManager>,
}

impl GuardedExecutor {
    pub fn new(manager: Arc<LockManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<LockManager> {
        &self.manager
    }

    pub fn default_options(&self) -> LockOptions {
        self.manager.default_options()
    }

    /// 在键 `key` 的锁内执行 `operation`
    ///
    /// - 等待超时：返回 `ConcurrencyConflict`（携带 `options.timeout_message`），操作不会执行
    /// - 存储故障：原样返回，操作不会执行
    /// - 操作的结果（成功或失败）原样返回，无论结果如何都会释放锁
    pub async fn run_exclusive<T, E, F, Fut>(
        &self,
        key: &str,
        options: &LockOptions,
        operation: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CoordinationError>,
    {
        let guard = self.enter(key, options, None).await.map_err(E::from)?;
        let result = operation().await;
        Self::leave(guard).await;
        result
    }

    /// 与 [`Self::run_exclusive`] 相同，锁键由 `key_fn` 从调用参数计算得出
    pub async fn run_exclusive_for<A, T, E, K, F, Fut>(
        &self,
        args: A,
        key_fn: K,
        options: &LockOptions,
        operation: F,
    ) -> Result<T, E>
    where
        K: FnOnce(&A) -> String,
        F: FnOnce(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CoordinationError>,
    {
        let key = key_fn(&args);
        self.run_exclusive(&key, options, move || operation(args))
            .await
    }

    /// 可取消的互斥执行：等待锁期间 `cancel` 被触发时返回原因为 `Interrupted`
    /// 的 `ConcurrencyConflict`，操作不会执行
    pub async fn run_exclusive_cancellable<T, E, F, Fut>(
        &self,
        key: &str,
        options: &LockOptions,
        cancel: &CancellationToken,
        operation: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CoordinationError>,
    {
        let guard = self
            .enter(key, options, Some(cancel))
            .await
            .map_err(E::from)?;
        let result = operation().await;
        Self::leave(guard).await;
        result
    }

    async fn enter(
        &self,
        key: &str,
        options: &LockOptions,
        cancel: Option<&CancellationToken>,
    ) -> Result<LockGuard, CoordinationError> {
        match self.manager.acquire_with(key, options, cancel).await {
            Ok(handle) => Ok(LockGuard::new(
                self.manager.clone(),
                handle,
                options.auto_renew,
            )),
            Err(CoordinationError::LockTimeout { key, .. }) => Err(
                CoordinationError::conflict_from_timeout(key, options.timeout_message.clone()),
            ),
            Err(err) => Err(err),
        }
    }

    /// 释放失败不影响操作结果：锁会随租约过期
    async fn leave(guard: LockGuard) {
        let key = guard.handle().map(|h| h.key().to_string()).unwrap_or_default();
        if let Err(err) = guard.release().await {
            warn!(key = %key, error = %err, "Failed to release lock after guarded operation");
        }
    }
}
