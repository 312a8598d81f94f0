//! 会话领域服务 - 会话生命周期与并发上限策略
//!
//! 状态流转：`created → active → (deactivated | expired)`，两个终态都不可恢复。
//! 并发上限在创建时检查：已有会话数达到上限时清除该用户的全部会话，
//! 而不是只淘汰最久未使用的一个。单会话策略（管理员）每次登录都清除。

use std::sync::Arc;

use commonground_core::{Clock, Result, generate_session_id};
use tracing::{debug, info};

use crate::domain::model::{Session, SessionPolicy, SessionView};
use crate::domain::repository::SessionRepository;

pub struct SessionDomainService {
    repo: Arc<dyn SessionRepository>,
    policy: SessionPolicy,
    clock: Arc<dyn Clock>,
}

impl SessionDomainService {
    pub fn new(
        repo: Arc<dyn SessionRepository>,
        policy: SessionPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repo,
            policy,
            clock,
        }
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    /// 创建会话
    ///
    /// 计数、清除、写入三步不是原子的，跨进程并发创建同一用户的会话需要
    /// 在外层按用户加锁（见 `SessionApplicationService::create_session_exclusive`）。
    pub async fn create_session(&self, user_id: &str, user_agent: Option<&str>) -> Result<Session> {
        let existing = self.repo.count_by_user(user_id).await?;
        if self.policy.requires_eviction(existing) {
            let evicted = self.repo.delete_all_by_user(user_id).await?;
            info!(
                user_id = %user_id,
                policy = %self.policy.name,
                existing,
                evicted,
                "Evicted all existing sessions before login"
            );
        }

        let session = Session::create(
            generate_session_id(),
            user_id,
            user_agent.map(str::to_string),
            self.policy.expiration_seconds(),
            self.clock.now(),
        );
        self.repo.save(&session).await?;

        info!(
            session_id = %session.session_id,
            user_id = %user_id,
            policy = %self.policy.name,
            "Session created"
        );
        Ok(session)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        self.repo.find_by_id(session_id).await
    }

    /// 读取会话并计算当前的过期和有效状态
    pub async fn get_session_view(&self, session_id: &str) -> Result<Option<SessionView>> {
        let now = self.clock.now();
        Ok(self
            .repo
            .find_by_id(session_id)
            .await?
            .map(|session| SessionView::from_session(&session, now)))
    }

    /// 刷新最近访问时间，返回刷新后会话是否仍然存在
    ///
    /// 会话不存在、已过期（随之被删除）或在读取后被并发删除时返回 false，
    /// 被删除的会话不会被写回。
    pub async fn update_session_access(&self, session_id: &str) -> Result<bool> {
        let Some(mut session) = self.repo.find_by_id(session_id).await? else {
            return Ok(false);
        };
        session.touch(self.clock.now());
        let updated = self.repo.update_if_present(&session).await?;
        if updated {
            debug!(session_id = %session_id, "Session access updated");
        }
        Ok(updated)
    }

    /// 不存在的会话校验为 false
    pub async fn validate_session(&self, session_id: &str) -> Result<bool> {
        let now = self.clock.now();
        Ok(self
            .repo
            .find_by_id(session_id)
            .await?
            .is_some_and(|session| session.is_valid_at(now)))
    }

    /// 停用并删除会话；会话不存在时不做任何事，可重复调用
    pub async fn invalidate_session(&self, session_id: &str) -> Result<bool> {
        let Some(mut session) = self.repo.find_by_id(session_id).await? else {
            return Ok(false);
        };
        session.deactivate();
        self.repo.delete_by_id(&session.session_id).await?;
        info!(
            session_id = %session_id,
            user_id = %session.user_id,
            policy = %self.policy.name,
            "Session invalidated"
        );
        Ok(true)
    }

    pub async fn invalidate_all_user_sessions(&self, user_id: &str) -> Result<u64> {
        let removed = self.repo.delete_all_by_user(user_id).await?;
        info!(
            user_id = %user_id,
            policy = %self.policy.name,
            removed,
            "All user sessions invalidated"
        );
        Ok(removed)
    }

    pub async fn active_session_count(&self, user_id: &str) -> Result<u64> {
        self.repo.count_by_user(user_id).await
    }
}
