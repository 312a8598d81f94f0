use std::sync::Arc;

use anyhow::{Context, Result};
use commonground_core::{Clock, CoordinationAppConfig, CoordinationStore, SystemClock, connect};
use commonground_lock::{GuardedExecutor, LockConfig, LockManager, LockOptions};
use tracing::info;

use crate::application::service::SessionApplicationService;
use crate::config::SessionConfig;
use crate::domain::repository::SessionRepository;
use crate::domain::service::SessionDomainService;
use crate::infrastructure::persistence::StoreSessionRepository;

/// 协调节点：组装锁与会话服务
pub struct CoordinationServiceApp {
    lock_store: Arc<dyn CoordinationStore>,
    session_store: Arc<dyn CoordinationStore>,
    executor: GuardedExecutor,
    sessions: Arc<SessionApplicationService>,
    session_config: Arc<SessionConfig>,
}

impl CoordinationServiceApp {
    pub async fn new(app_config: &CoordinationAppConfig) -> Result<Self> {
        let lock_config = LockConfig::from_app_config(app_config)
            .context("Failed to load lock configuration")?;
        let session_config = SessionConfig::from_app_config(app_config)
            .context("Failed to load session service configuration")?;

        let lock_store = connect(&lock_config.redis)
            .await
            .context("Failed to connect lock coordination store")?;

        // 同一个后端只建一个连接，`memory://` 也必须共享同一份数据
        let session_store = if session_config.redis.url == lock_config.redis.url
            && session_config.redis.namespace == lock_config.redis.namespace
        {
            lock_store.clone()
        } else {
            connect(&session_config.redis)
                .await
                .context("Failed to connect session coordination store")?
        };

        Ok(Self::with_stores(
            lock_store,
            session_store,
            lock_config,
            session_config,
            Arc::new(SystemClock),
        ))
    }

    /// 使用已有的存储组装（测试和嵌入场景）
    pub fn with_stores(
        lock_store: Arc<dyn CoordinationStore>,
        session_store: Arc<dyn CoordinationStore>,
        lock_config: LockConfig,
        session_config: SessionConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let session_config = Arc::new(session_config);

        let mut lock_options = LockOptions::from(&lock_config);
        if let Some(wait_time) = session_config.lock_wait_time {
            lock_options = lock_options.with_wait_time(wait_time);
        }
        if let Some(lease_time) = session_config.lock_lease_time {
            lock_options = lock_options.with_lease_time(lease_time);
        }

        let lock_manager = Arc::new(LockManager::new(lock_store.clone(), lock_config));
        let executor = GuardedExecutor::new(lock_manager);

        let repo: Arc<dyn SessionRepository> = Arc::new(StoreSessionRepository::new(
            session_store.clone(),
            session_config.clone(),
            clock.clone(),
        ));
        let user_sessions = Arc::new(SessionDomainService::new(
            repo.clone(),
            session_config.user_policy.clone(),
            clock.clone(),
        ));
        let admin_sessions = Arc::new(SessionDomainService::new(
            repo,
            session_config.admin_policy.clone(),
            clock.clone(),
        ));

        let sessions = Arc::new(SessionApplicationService::new(
            user_sessions,
            admin_sessions,
            executor.clone(),
            lock_options,
            clock,
        ));

        Self {
            lock_store,
            session_store,
            executor,
            sessions,
            session_config,
        }
    }

    pub fn executor(&self) -> &GuardedExecutor {
        &self.executor
    }

    pub fn sessions(&self) -> &Arc<SessionApplicationService> {
        &self.sessions
    }

    pub fn session_config(&self) -> &SessionConfig {
        &self.session_config
    }

    pub async fn health_check(&self) -> Result<()> {
        self.lock_store
            .ping()
            .await
            .context("lock coordination store is unreachable")?;
        self.session_store
            .ping()
            .await
            .context("session coordination store is unreachable")?;
        Ok(())
    }

    /// 启动检查后运行，直到收到 ctrl-c
    pub async fn run(&self) -> Result<()> {
        self.health_check().await?;

        for policy in [
            &self.session_config.user_policy,
            &self.session_config.admin_policy,
        ] {
            info!(
                policy = %policy.name,
                max_concurrent_sessions = policy.max_concurrent_sessions,
                session_ttl_secs = policy.session_ttl.as_secs(),
                "Session policy loaded"
            );
        }

        let lock_config = self.executor.manager().config();
        info!(
            wait_time_ms = lock_config.wait_time.as_millis() as u64,
            lease_time_ms = lock_config.lease_time.as_millis() as u64,
            key_prefix = %lock_config.key_prefix,
            "commonground coordination node ready"
        );

        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for shutdown signal")?;
        info!("Shutdown signal received, stopping coordination node");
        Ok(())
    }
}
