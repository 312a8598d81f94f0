use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

pub const USER_POLICY_NAME: &str = "user";
pub const ADMIN_POLICY_NAME: &str = "admin";
pub const DEFAULT_USER_MAX_CONCURRENT: u32 = 3;
pub const DEFAULT_USER_TTL_SECONDS: u64 = 3_600;
pub const DEFAULT_ADMIN_TTL_SECONDS: u64 = 1_800;

/// 会话记录
///
/// `active` 与 TTL 过期相互独立：会话可以在 TTL 到期前被显式停用。
/// 过期与有效性在读取时根据传入的当前时间计算，不落盘。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    #[serde(default)]
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_access_time: DateTime<Utc>,
    pub expiration_seconds: u64,
    pub active: bool,
}

impl Session {
    /// 创建新会话：`created_at = last_access_time = now`，`active = true`
    pub fn create(
        session_id: String,
        user_id: impl Into<String>,
        user_agent: Option<String>,
        expiration_seconds: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id,
            user_id: user_id.into(),
            user_agent,
            created_at: now,
            last_access_time: now,
            expiration_seconds,
            active: true,
        }
    }

    /// 逻辑过期时间点；超出可表示范围时视为永不过期
    pub fn expires_at(&self) -> DateTime<Utc> {
        let budget = i64::try_from(self.expiration_seconds)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX);
        self.created_at
            .checked_add_signed(budget)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// `created_at + expiration_seconds < now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at() < now
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.active && !self.is_expired_at(now)
    }

    /// 距离逻辑过期的剩余时间，已过期时为零
    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at() - now).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_access_time = now;
    }

    pub fn deactivate(&mut self) {
        self.active = false;
    }
}

/// 会话读模型，附带读取时计算的过期和有效状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionView {
    pub session_id: String,
    pub user_id: String,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_access_time: DateTime<Utc>,
    pub active: bool,
    pub expired: bool,
    pub valid: bool,
}

impl SessionView {
    pub fn from_session(session: &Session, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session.session_id.clone(),
            user_id: session.user_id.clone(),
            user_agent: session.user_agent.clone(),
            created_at: session.created_at,
            last_access_time: session.last_access_time,
            active: session.active,
            expired: session.is_expired_at(now),
            valid: session.is_valid_at(now),
        }
    }
}

/// 会话策略：并发会话上限和会话有效期
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPolicy {
    pub name: String,
    pub max_concurrent_sessions: u32,
    pub session_ttl: Duration,
    /// 每次登录都清除该用户的全部已有会话，不看上限
    pub evict_on_login: bool,
}

impl SessionPolicy {
    pub fn new(name: impl Into<String>, max_concurrent_sessions: u32, session_ttl: Duration) -> Self {
        Self {
            name: name.into(),
            max_concurrent_sessions,
            session_ttl,
            evict_on_login: false,
        }
    }

    /// 单会话策略：上限固定为 1，登录即清除已有会话
    pub fn single_session(name: impl Into<String>, session_ttl: Duration) -> Self {
        Self {
            name: name.into(),
            max_concurrent_sessions: 1,
            session_ttl,
            evict_on_login: true,
        }
    }

    /// 普通用户：最多 3 个并发会话，有效期 1 小时
    pub fn user() -> Self {
        Self::new(
            USER_POLICY_NAME,
            DEFAULT_USER_MAX_CONCURRENT,
            Duration::from_secs(DEFAULT_USER_TTL_SECONDS),
        )
    }

    /// 管理员：单会话，有效期 30 分钟。登录时清除所有已有会话
    pub fn admin() -> Self {
        Self::single_session(
            ADMIN_POLICY_NAME,
            Duration::from_secs(DEFAULT_ADMIN_TTL_SECONDS),
        )
    }

    pub fn expiration_seconds(&self) -> u64 {
        self.session_ttl.as_secs()
    }

    /// 已有 `existing` 个会话时，本次登录是否需要先清除全部旧会话
    pub fn requires_eviction(&self, existing: u64) -> bool {
        self.evict_on_login || existing >= u64::from(self.max_concurrent_sessions)
    }
}
