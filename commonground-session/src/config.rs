use std::time::Duration;

use commonground_core::config::{ConfigManager, SessionPolicySectionConfig};
use commonground_core::{CoordinationAppConfig, CoordinationError, RedisPoolConfig, Result};

use tracing::warn;

use crate::domain::model::{
    ADMIN_POLICY_NAME, DEFAULT_ADMIN_TTL_SECONDS, DEFAULT_USER_MAX_CONCURRENT,
    DEFAULT_USER_TTL_SECONDS, SessionPolicy, USER_POLICY_NAME,
};

pub const DEFAULT_SESSION_KEY_PREFIX: &str = "session";
pub const DEFAULT_SESSION_INDEX_PREFIX: &str = "user_sessions";
/// 创建会话时按用户加锁的键命名空间
pub const SESSION_LOCK_NAMESPACE: &str = "user_session";

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub redis: RedisPoolConfig,
    pub key_prefix: String,
    pub index_prefix: String,
    pub user_policy: SessionPolicy,
    pub admin_policy: SessionPolicy,
    /// 创建会话时的锁等待时间，未设置时使用锁的默认值
    pub lock_wait_time: Option<Duration>,
    /// 创建会话时的锁租约时间，未设置时使用锁的默认值
    pub lock_lease_time: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            redis: RedisPoolConfig {
                url: "redis://127.0.0.1:6379/0".to_string(),
                namespace: None,
            },
            key_prefix: DEFAULT_SESSION_KEY_PREFIX.to_string(),
            index_prefix: DEFAULT_SESSION_INDEX_PREFIX.to_string(),
            user_policy: SessionPolicy::user(),
            admin_policy: SessionPolicy::admin(),
            lock_wait_time: None,
            lock_lease_time: None,
        }
    }
}

impl SessionConfig {
    /// 从应用配置加载，优先级：环境变量 > 配置文件 > 默认值
    pub fn from_app_config(app: &CoordinationAppConfig) -> Result<Self> {
        let section = &app.session;

        let mut redis = app
            .resolve_redis(section.redis.as_deref())
            .cloned()
            .ok_or_else(|| {
                CoordinationError::Config(format!(
                    "session references unknown redis profile {:?}",
                    section.redis
                ))
            })?;
        if let Some(url) = ConfigManager::env_string("SESSION_REDIS_URL") {
            redis.url = url;
        }

        let key_prefix = ConfigManager::env_string("SESSION_KEY_PREFIX")
            .or_else(|| section.key_prefix.clone())
            .unwrap_or_else(|| DEFAULT_SESSION_KEY_PREFIX.to_string());

        let index_prefix = ConfigManager::env_string("SESSION_INDEX_PREFIX")
            .or_else(|| section.index_prefix.clone())
            .unwrap_or_else(|| DEFAULT_SESSION_INDEX_PREFIX.to_string());

        let user_policy = resolve_policy(
            USER_POLICY_NAME,
            section.user.as_ref(),
            ("SESSION_MAX_CONCURRENT", DEFAULT_USER_MAX_CONCURRENT),
            ("SESSION_TTL_SECONDS", DEFAULT_USER_TTL_SECONDS),
        );

        let admin_policy = resolve_admin_policy(section.admin.as_ref());

        let lock_wait_time = ConfigManager::env_value::<u64>("SESSION_LOCK_WAIT_TIME_MS")
            .or(section.lock_wait_time_ms)
            .map(Duration::from_millis);

        let lock_lease_time = ConfigManager::env_value::<u64>("SESSION_LOCK_LEASE_TIME_MS")
            .or(section.lock_lease_time_ms)
            .map(Duration::from_millis);

        let config = Self {
            redis,
            key_prefix,
            index_prefix,
            user_policy,
            admin_policy,
            lock_wait_time,
            lock_lease_time,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for policy in [&self.user_policy, &self.admin_policy] {
            if policy.max_concurrent_sessions == 0 {
                return Err(CoordinationError::Config(format!(
                    "{} session policy must allow at least one session",
                    policy.name
                )));
            }
            if policy.session_ttl.as_secs() == 0 {
                return Err(CoordinationError::Config(format!(
                    "{} session ttl must be at least one second",
                    policy.name
                )));
            }
        }
        if self.key_prefix == self.index_prefix {
            return Err(CoordinationError::Config(
                "session key prefix and index prefix must differ".to_string(),
            ));
        }
        Ok(())
    }
}

fn resolve_policy(
    name: &str,
    section: Option<&SessionPolicySectionConfig>,
    (max_env, max_default): (&str, u32),
    (ttl_env, ttl_default): (&str, u64),
) -> SessionPolicy {
    let max_concurrent = ConfigManager::env_value::<u32>(max_env)
        .or_else(|| section.and_then(|s| s.max_concurrent))
        .unwrap_or(max_default);

    let ttl_seconds = ConfigManager::env_value::<u64>(ttl_env)
        .or_else(|| section.and_then(|s| s.ttl_seconds))
        .unwrap_or(ttl_default);

    SessionPolicy::new(name, max_concurrent, Duration::from_secs(ttl_seconds))
}

/// 管理员固定为单会话策略，只有有效期可配置
fn resolve_admin_policy(section: Option<&SessionPolicySectionConfig>) -> SessionPolicy {
    let requested_max = ConfigManager::env_value::<u32>("ADMIN_SESSION_MAX_CONCURRENT")
        .or_else(|| section.and_then(|s| s.max_concurrent));
    if let Some(max) = requested_max.filter(|max| *max != 1) {
        warn!(
            requested = max,
            "Admin sessions are single-session, ignoring configured max_concurrent"
        );
    }

    let ttl_seconds = ConfigManager::env_value::<u64>("ADMIN_SESSION_TTL_SECONDS")
        .or_else(|| section.and_then(|s| s.ttl_seconds))
        .unwrap_or(DEFAULT_ADMIN_TTL_SECONDS);

    SessionPolicy::single_session(ADMIN_POLICY_NAME, Duration::from_secs(ttl_seconds))
}
