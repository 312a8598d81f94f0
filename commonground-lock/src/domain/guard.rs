use std::sync::Arc;
use std::time::Duration;

use commonground_core::Result;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::domain::lock_manager::LockManager;
use crate::domain::model::LockHandle;

/// 锁的作用域守卫
///
/// 正常路径应调用 [`LockGuard::release`]。守卫在未释放时被丢弃（panic、
/// 外层 future 被取消）会把释放操作投递到当前 tokio 运行时；没有运行时则
/// 依赖租约自然过期。
pub struct LockGuard {
    manager: Arc<LockManager>,
    handle: Option<LockHandle>,
    renewal: Option<JoinHandle<()>>,
}

impl LockGuard {
    pub(crate) fn new(manager: Arc<LockManager>, handle: LockHandle, auto_renew: bool) -> Self {
        let renewal = auto_renew.then(|| spawn_renewal(manager.clone(), handle.clone()));
        Self {
            manager,
            handle: Some(handle),
            renewal,
        }
    }

    pub fn handle(&self) -> Option<&LockHandle> {
        self.handle.as_ref()
    }

    /// 释放锁，返回释放时锁是否仍归自己所有
    pub async fn release(mut self) -> Result<bool> {
        self.stop_renewal();
        match self.handle.take() {
            Some(handle) => self.manager.release(&handle).await,
            None => Ok(false),
        }
    }

    fn stop_renewal(&mut self) {
        if let Some(task) = self.renewal.take() {
            task.abort();
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.stop_renewal();
        let Some(handle) = self.handle.take() else {
            return;
        };

        match Handle::try_current() {
            Ok(runtime) => {
                let manager = self.manager.clone();
                debug!(key = %handle.key(), "Lock guard dropped without release, releasing in background");
                runtime.spawn(async move {
                    if let Err(err) = manager.release(&handle).await {
                        warn!(
                            key = %handle.key(),
                            error = %err,
                            "Background lock release failed, lock will expire with its lease"
                        );
                    }
                });
            }
            Err(_) => {
                warn!(
                    key = %handle.key(),
                    "Lock guard dropped outside a runtime, lock will expire with its lease"
                );
            }
        }
    }
}

/// 续期间隔：租约的三分之一，至少 1 毫秒
fn renewal_interval(lease_time: Duration) -> Duration {
    (lease_time / 3).max(Duration::from_millis(1))
}

fn spawn_renewal(manager: Arc<LockManager>, handle: LockHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval = renewal_interval(handle.lease_time());
        loop {
            tokio::time::sleep(interval).await;
            match manager.extend(&handle, handle.lease_time()).await {
                Ok(true) => {
                    debug!(key = %handle.key(), "Lease renewed");
                }
                Ok(false) => break,
                Err(err) => {
                    // 存储暂时不可用：继续尝试，直到租约真正丢失
                    warn!(key = %handle.key(), error = %err, "Lease renewal attempt failed");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LockConfig;
    use crate::domain::model::LockOptions;
    use commonground_core::{CoordinationStore, MemoryCoordinationStore};
    use tokio::time::sleep;

    fn setup() -> (Arc<MemoryCoordinationStore>, Arc<LockManager>) {
        let store = Arc::new(MemoryCoordinationStore::new());
        let manager = Arc::new(LockManager::new(store.clone(), LockConfig::default()));
        (store, manager)
    }

    #[test]
    fn test_renewal_interval() {
        assert_eq!(renewal_interval(Duration::from_secs(9)), Duration::from_secs(3));
        assert_eq!(renewal_interval(Duration::from_nanos(2)), Duration::from_millis(1));
    }

    #[tokio::test]
    async fn test_release_through_guard() {
        let (store, manager) = setup();
        let guard = manager
            .lock("job", &LockOptions::new(Duration::ZERO, Duration::from_secs(10)))
            .await
            .unwrap();
        assert!(store.exists("lock:job").await.unwrap());

        assert!(guard.release().await.unwrap());
        assert!(!store.exists("lock:job").await.unwrap());
    }

    #[tokio::test]
    async fn test_drop_releases_in_background() {
        let (store, manager) = setup();
        {
            let _guard = manager
                .lock("job", &LockOptions::new(Duration::ZERO, Duration::from_secs(10)))
                .await
                .unwrap();
        }

        for _ in 0..50 {
            if !store.exists("lock:job").await.unwrap() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("lock was not released after guard drop");
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_renew_outlives_lease() {
        let (store, manager) = setup();
        let options = LockOptions::new(Duration::ZERO, Duration::from_millis(300))
            .with_auto_renew(true);
        let guard = manager.lock("job", &options).await.unwrap();

        sleep(Duration::from_millis(1_000)).await;
        assert!(store.exists("lock:job").await.unwrap());

        assert!(guard.release().await.unwrap());
        sleep(Duration::from_millis(500)).await;
        assert!(!store.exists("lock:job").await.unwrap());
    }
}
