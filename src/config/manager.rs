//! 配置管理器 - 负责处理不同环境下的配置选择和覆盖
//!
//! 该模块提供了配置管理功能，包括：
//! - 获取当前运行环境
//! - 加载环境特定配置
//! - 读取环境变量覆盖值

use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use tracing::warn;

use super::{CoordinationAppConfig, LockSectionConfig, SessionSectionConfig};

/// 配置管理器
pub struct ConfigManager;

impl ConfigManager {
    /// 获取当前环境名称
    ///
    /// 从环境变量 COMMONGROUND_ENV 获取当前环境名称，
    /// 如果未设置则默认为 "development"
    pub fn get_environment() -> String {
        env::var("COMMONGROUND_ENV").unwrap_or_else(|_| "development".to_string())
    }

    /// 根据环境加载特定配置
    ///
    /// 加载 config/environments/{environment}.toml 文件中的配置，
    /// 并将其合并到基础配置中
    pub fn load_environment_config(base_config: &mut CoordinationAppConfig) -> Result<()> {
        let env = Self::get_environment();
        let env_config_path = format!("config/environments/{}.toml", env);

        if Path::new(&env_config_path).exists() {
            let env_config_content = fs::read_to_string(&env_config_path)
                .with_context(|| format!("unable to read environment config: {}", env_config_path))?;
            let env_config: CoordinationAppConfig = toml::from_str(&env_config_content)
                .with_context(|| format!("invalid environment config: {}", env_config_path))?;

            Self::merge_config(base_config, env_config);
        }

        Ok(())
    }

    /// 将环境配置合并到基础配置中，环境配置中显式设置的字段优先
    pub fn merge_config(base: &mut CoordinationAppConfig, overlay: CoordinationAppConfig) {
        base.redis.extend(overlay.redis);

        if overlay.logging.is_some() {
            base.logging = overlay.logging;
        }

        Self::merge_lock(&mut base.lock, overlay.lock);
        Self::merge_session(&mut base.session, overlay.session);
    }

    fn merge_lock(base: &mut LockSectionConfig, overlay: LockSectionConfig) {
        base.redis = overlay.redis.or(base.redis.take());
        base.wait_time_ms = overlay.wait_time_ms.or(base.wait_time_ms);
        base.lease_time_ms = overlay.lease_time_ms.or(base.lease_time_ms);
        base.retry_interval_ms = overlay.retry_interval_ms.or(base.retry_interval_ms);
        base.key_prefix = overlay.key_prefix.or(base.key_prefix.take());
        base.timeout_message = overlay.timeout_message.or(base.timeout_message.take());
    }

    fn merge_session(base: &mut SessionSectionConfig, overlay: SessionSectionConfig) {
        base.redis = overlay.redis.or(base.redis.take());
        base.key_prefix = overlay.key_prefix.or(base.key_prefix.take());
        base.index_prefix = overlay.index_prefix.or(base.index_prefix.take());
        base.lock_wait_time_ms = overlay.lock_wait_time_ms.or(base.lock_wait_time_ms);
        base.lock_lease_time_ms = overlay.lock_lease_time_ms.or(base.lock_lease_time_ms);

        for (base_policy, overlay_policy) in [
            (&mut base.user, overlay.user),
            (&mut base.admin, overlay.admin),
        ] {
            if let Some(overlay_policy) = overlay_policy {
                let policy = base_policy.get_or_insert_with(Default::default);
                policy.max_concurrent = overlay_policy.max_concurrent.or(policy.max_concurrent);
                policy.ttl_seconds = overlay_policy.ttl_seconds.or(policy.ttl_seconds);
            }
        }
    }

    /// 读取并解析环境变量
    ///
    /// 变量未设置或为空时返回 None；无法解析时记录告警并返回 None
    pub fn env_value<T: FromStr>(name: &str) -> Option<T> {
        let raw = env::var(name).ok()?;
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        match raw.parse::<T>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(variable = %name, value = %raw, "ignoring unparsable environment override");
                None
            }
        }
    }

    /// 读取非空字符串环境变量
    pub fn env_string(name: &str) -> Option<String> {
        env::var(name).ok().filter(|s| !s.trim().is_empty())
    }
}
