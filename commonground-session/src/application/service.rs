use std::fmt;
use std::sync::Arc;

use commonground_core::{Clock, LockKey, Result};
use commonground_lock::{GuardedExecutor, LockOptions};
use tracing::debug;

use crate::application::commands::CreateSessionCommand;
use crate::config::SESSION_LOCK_NAMESPACE;
use crate::domain::model::SessionView;
use crate::domain::service::SessionDomainService;

/// 会话主体类型，决定使用哪一套会话策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrincipalKind {
    User,
    Admin,
}

impl PrincipalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrincipalKind::User => "user",
            PrincipalKind::Admin => "admin",
        }
    }
}

impl fmt::Display for PrincipalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 会话应用服务
///
/// 按主体类型持有各自策略的领域服务，并把会改变用户会话集合的操作
/// 放进按用户加锁的互斥执行中，使计数、清除、写入在多进程间串行。
pub struct SessionApplicationService {
    user_sessions: Arc<SessionDomainService>,
    admin_sessions: Arc<SessionDomainService>,
    executor: GuardedExecutor,
    lock_options: LockOptions,
    clock: Arc<dyn Clock>,
}

impl SessionApplicationService {
    pub fn new(
        user_sessions: Arc<SessionDomainService>,
        admin_sessions: Arc<SessionDomainService>,
        executor: GuardedExecutor,
        lock_options: LockOptions,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            user_sessions,
            admin_sessions,
            executor,
            lock_options,
            clock,
        }
    }

    pub fn sessions(&self, principal: PrincipalKind) -> &Arc<SessionDomainService> {
        match principal {
            PrincipalKind::User => &self.user_sessions,
            PrincipalKind::Admin => &self.admin_sessions,
        }
    }

    pub fn lock_options(&self) -> &LockOptions {
        &self.lock_options
    }

    fn user_lock_key(user_id: &str) -> String {
        LockKey::new(SESSION_LOCK_NAMESPACE)
            .part(user_id)
            .into_string()
    }

    /// 在用户锁内创建会话（含并发上限检查）
    ///
    /// 等锁超时返回 `ConcurrencyConflict`，不会创建会话。
    pub async fn create_session_exclusive(
        &self,
        command: CreateSessionCommand,
    ) -> Result<SessionView> {
        debug!(
            user_id = %command.user_id,
            principal = %command.principal,
            "Handling create session command"
        );

        let key = Self::user_lock_key(&command.user_id);
        let sessions = self.sessions(command.principal).clone();
        let session = self
            .executor
            .run_exclusive(&key, &self.lock_options, || async move {
                sessions
                    .create_session(&command.user_id, command.user_agent.as_deref())
                    .await
            })
            .await?;

        Ok(SessionView::from_session(&session, self.clock.now()))
    }

    /// 在用户锁内清除用户的全部会话
    pub async fn invalidate_all_user_sessions_exclusive(
        &self,
        principal: PrincipalKind,
        user_id: &str,
    ) -> Result<u64> {
        let key = Self::user_lock_key(user_id);
        let sessions = self.sessions(principal).clone();
        self.executor
            .run_exclusive(&key, &self.lock_options, || async move {
                sessions.invalidate_all_user_sessions(user_id).await
            })
            .await
    }

    pub async fn get_session(
        &self,
        principal: PrincipalKind,
        session_id: &str,
    ) -> Result<Option<SessionView>> {
        self.sessions(principal).get_session_view(session_id).await
    }

    pub async fn validate_session(&self, principal: PrincipalKind, session_id: &str) -> Result<bool> {
        self.sessions(principal).validate_session(session_id).await
    }

    pub async fn update_session_access(
        &self,
        principal: PrincipalKind,
        session_id: &str,
    ) -> Result<bool> {
        self.sessions(principal).update_session_access(session_id).await
    }

    pub async fn invalidate_session(
        &self,
        principal: PrincipalKind,
        session_id: &str,
    ) -> Result<bool> {
        self.sessions(principal).invalidate_session(session_id).await
    }

    pub async fn active_session_count(&self, principal: PrincipalKind, user_id: &str) -> Result<u64> {
        self.sessions(principal).active_session_count(user_id).await
    }
}
