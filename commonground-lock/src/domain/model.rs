use std::time::Duration;

use tokio::time::Instant;

use crate::config::LockConfig;

/// 成功获取的锁
///
/// 持有逻辑键、存储键和本次获取生成的持有者令牌。释放和续期都以令牌为准，
/// 租约过期后被他人获取的锁不会被旧持有者误删。
#[derive(Debug, Clone)]
pub struct LockHandle {
    key: String,
    store_key: String,
    owner_token: String,
    lease_time: Duration,
    acquired_at: Instant,
}

impl LockHandle {
    pub(crate) fn new(
        key: String,
        store_key: String,
        owner_token: String,
        lease_time: Duration,
    ) -> Self {
        Self {
            key,
            store_key,
            owner_token,
            lease_time,
            acquired_at: Instant::now(),
        }
    }

    /// 调用方提供的逻辑键
    pub fn key(&self) -> &str {
        &self.key
    }

    /// 协调存储中的实际键
    pub fn store_key(&self) -> &str {
        &self.store_key
    }

    pub fn owner_token(&self) -> &str {
        &self.owner_token
    }

    pub fn lease_time(&self) -> Duration {
        self.lease_time
    }

    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// 本地视角下租约是否可能已经过期（仅供日志参考，存储才是事实来源）
    pub fn lease_probably_expired(&self) -> bool {
        self.held_for() >= self.lease_time
    }
}

/// 单次加锁的参数
#[derive(Debug, Clone)]
pub struct LockOptions {
    /// 获取锁的最长等待时间，为零时只尝试一次
    pub wait_time: Duration,
    /// 租约时间，超过后锁自动失效
    pub lease_time: Duration,
    /// 等待超时时返回给调用方的提示
    pub timeout_message: String,
    /// 持有期间自动续期（每 lease_time / 3 续期一次）
    pub auto_renew: bool,
}

impl LockOptions {
    pub fn new(wait_time: Duration, lease_time: Duration) -> Self {
        Self {
            wait_time,
            lease_time,
            timeout_message: crate::config::DEFAULT_TIMEOUT_MESSAGE.to_string(),
            auto_renew: false,
        }
    }

    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }

    pub fn with_lease_time(mut self, lease_time: Duration) -> Self {
        self.lease_time = lease_time;
        self
    }

    pub fn with_timeout_message(mut self, message: impl Into<String>) -> Self {
        self.timeout_message = message.into();
        self
    }

    pub fn with_auto_renew(mut self, auto_renew: bool) -> Self {
        self.auto_renew = auto_renew;
        self
    }
}

impl From<&LockConfig> for LockOptions {
    fn from(config: &LockConfig) -> Self {
        Self {
            wait_time: config.wait_time,
            lease_time: config.lease_time,
            timeout_message: config.timeout_message.clone(),
            auto_renew: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_from_config() {
        let config = LockConfig::default();
        let options = LockOptions::from(&config)
            .with_lease_time(Duration::from_secs(300))
            .with_timeout_message("crawl in progress");

        assert_eq!(options.wait_time, Duration::from_secs(3));
        assert_eq!(options.lease_time, Duration::from_secs(300));
        assert_eq!(options.timeout_message, "crawl in progress");
        assert!(!options.auto_renew);
    }
}
