use std::time::Duration;

use commonground_core::config::ConfigManager;
use commonground_core::{CoordinationAppConfig, CoordinationError, RedisPoolConfig, Result};

pub const DEFAULT_WAIT_TIME_MS: u64 = 3_000;
pub const DEFAULT_LEASE_TIME_MS: u64 = 10_000;
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 50;
pub const DEFAULT_KEY_PREFIX: &str = "lock";
pub const DEFAULT_TIMEOUT_MESSAGE: &str =
    "Another request is being processed. Please try again shortly.";

/// 分布式锁配置
///
/// 默认值：等待 3 秒，租约 10 秒，重试间隔 50 毫秒
#[derive(Clone, Debug)]
pub struct LockConfig {
    pub redis: RedisPoolConfig,
    /// 未指定时使用的获取等待时间
    pub wait_time: Duration,
    /// 未指定时使用的租约时间
    pub lease_time: Duration,
    /// 两次尝试之间的基础间隔（另加随机抖动）
    pub retry_interval: Duration,
    pub key_prefix: String,
    pub timeout_message: String,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            redis: RedisPoolConfig {
                url: "redis://127.0.0.1:6379/0".to_string(),
                namespace: None,
            },
            wait_time: Duration::from_millis(DEFAULT_WAIT_TIME_MS),
            lease_time: Duration::from_millis(DEFAULT_LEASE_TIME_MS),
            retry_interval: Duration::from_millis(DEFAULT_RETRY_INTERVAL_MS),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            timeout_message: DEFAULT_TIMEOUT_MESSAGE.to_string(),
        }
    }
}

impl LockConfig {
    /// 从应用配置加载，优先级：环境变量 > 配置文件 > 默认值
    pub fn from_app_config(app: &CoordinationAppConfig) -> Result<Self> {
        let section = &app.lock;

        let mut redis = app
            .resolve_redis(section.redis.as_deref())
            .cloned()
            .ok_or_else(|| {
                CoordinationError::Config(format!(
                    "lock references unknown redis profile {:?}",
                    section.redis
                ))
            })?;
        if let Some(url) = ConfigManager::env_string("LOCK_REDIS_URL") {
            redis.url = url;
        }

        let wait_time_ms = ConfigManager::env_value::<u64>("LOCK_WAIT_TIME_MS")
            .or(section.wait_time_ms)
            .unwrap_or(DEFAULT_WAIT_TIME_MS);

        let lease_time_ms = ConfigManager::env_value::<u64>("LOCK_LEASE_TIME_MS")
            .or(section.lease_time_ms)
            .unwrap_or(DEFAULT_LEASE_TIME_MS);

        let retry_interval_ms = ConfigManager::env_value::<u64>("LOCK_RETRY_INTERVAL_MS")
            .or(section.retry_interval_ms)
            .unwrap_or(DEFAULT_RETRY_INTERVAL_MS);

        let key_prefix = ConfigManager::env_string("LOCK_KEY_PREFIX")
            .or_else(|| section.key_prefix.clone())
            .unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string());

        let timeout_message = ConfigManager::env_string("LOCK_TIMEOUT_MESSAGE")
            .or_else(|| section.timeout_message.clone())
            .unwrap_or_else(|| DEFAULT_TIMEOUT_MESSAGE.to_string());

        let config = Self {
            redis,
            wait_time: Duration::from_millis(wait_time_ms),
            lease_time: Duration::from_millis(lease_time_ms),
            retry_interval: Duration::from_millis(retry_interval_ms),
            key_prefix,
            timeout_message,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.lease_time.is_zero() {
            return Err(CoordinationError::Config(
                "lock lease time must be positive".to_string(),
            ));
        }
        if self.retry_interval.is_zero() {
            return Err(CoordinationError::Config(
                "lock retry interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
