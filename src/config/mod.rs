//! CommonGround 配置模块
//!
//! 该模块提供协调层的配置加载功能，包括：
//! - 配置文件或配置目录的加载和合并
//! - 环境特定配置覆盖
//! - Redis、日志、分布式锁、会话策略等配置定义
//!
//! 配置以普通结构体的形式返回，由调用方显式传入各服务的构造函数。

use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use toml::Value;
use tracing::warn;

mod manager;
pub use manager::ConfigManager;

/// 默认 Redis 配置名称
pub const DEFAULT_REDIS_PROFILE: &str = "default";

/// Redis 连接配置
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RedisPoolConfig {
    /// Redis 服务器地址，`memory://` 表示使用进程内存储
    pub url: String,
    /// 命名空间前缀
    #[serde(default)]
    pub namespace: Option<String>,
}

/// 日志配置
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别（RUST_LOG 优先）
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub with_target: bool,
    #[serde(default)]
    pub with_thread_ids: bool,
    #[serde(default)]
    pub with_file: bool,
    #[serde(default)]
    pub with_line_number: bool,
    /// 输出 JSON 格式日志
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            with_target: true,
            with_thread_ids: false,
            with_file: false,
            with_line_number: false,
            json: false,
        }
    }
}

/// 分布式锁配置（未设置的字段由 commonground-lock 使用默认值补齐）
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LockSectionConfig {
    /// 引用的 Redis 配置名称
    #[serde(default)]
    pub redis: Option<String>,
    /// 获取锁的默认等待时间（毫秒）
    #[serde(default)]
    pub wait_time_ms: Option<u64>,
    /// 锁的默认租约时间（毫秒）
    #[serde(default)]
    pub lease_time_ms: Option<u64>,
    /// 重试间隔（毫秒）
    #[serde(default)]
    pub retry_interval_ms: Option<u64>,
    /// 锁键前缀
    #[serde(default)]
    pub key_prefix: Option<String>,
    /// 获取锁超时时返回给调用方的提示
    #[serde(default)]
    pub timeout_message: Option<String>,
}

/// 单个会话策略配置
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SessionPolicySectionConfig {
    /// 每个用户允许的最大并发会话数
    #[serde(default)]
    pub max_concurrent: Option<u32>,
    /// 会话有效期（秒）
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
}

/// 会话服务配置
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SessionSectionConfig {
    /// 引用的 Redis 配置名称
    #[serde(default)]
    pub redis: Option<String>,
    /// 会话记录键前缀
    #[serde(default)]
    pub key_prefix: Option<String>,
    /// 用户会话索引键前缀
    #[serde(default)]
    pub index_prefix: Option<String>,
    /// 创建会话时使用的锁等待时间（毫秒）
    #[serde(default)]
    pub lock_wait_time_ms: Option<u64>,
    /// 创建会话时使用的锁租约时间（毫秒）
    #[serde(default)]
    pub lock_lease_time_ms: Option<u64>,
    /// 普通用户策略
    #[serde(default)]
    pub user: Option<SessionPolicySectionConfig>,
    /// 管理员策略
    #[serde(default)]
    pub admin: Option<SessionPolicySectionConfig>,
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CoordinationAppConfig {
    /// Redis 配置集合
    #[serde(default)]
    pub redis: HashMap<String, RedisPoolConfig>,
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
    #[serde(default)]
    pub lock: LockSectionConfig,
    #[serde(default)]
    pub session: SessionSectionConfig,
}

impl CoordinationAppConfig {
    /// 按名称获取 Redis 配置
    pub fn redis_profile(&self, name: &str) -> Option<&RedisPoolConfig> {
        self.redis.get(name)
    }

    /// 按名称获取 Redis 配置，未命名时使用 `default`
    pub fn resolve_redis(&self, name: Option<&str>) -> Option<&RedisPoolConfig> {
        self.redis_profile(name.unwrap_or(DEFAULT_REDIS_PROFILE))
    }

    /// 补齐缺省配置
    pub fn ensure_defaults(&mut self) {
        self.redis
            .entry(DEFAULT_REDIS_PROFILE.to_string())
            .or_insert_with(|| RedisPoolConfig {
                url: "redis://127.0.0.1:6379/0".to_string(),
                namespace: None,
            });
    }

    /// 从 TOML 字符串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut cfg: CoordinationAppConfig =
            toml::from_str(content).context("invalid config format")?;
        cfg.ensure_defaults();
        Ok(cfg)
    }
}

/// 加载应用配置
///
/// 依次尝试给定路径（默认 `config` 目录和 `config.toml`），
/// 全部失败时使用默认配置，然后叠加环境特定配置。
pub fn load_config(path: Option<&str>) -> CoordinationAppConfig {
    let candidates: Vec<PathBuf> = match path {
        Some(p) => vec![PathBuf::from(p)],
        None => vec![PathBuf::from("config"), PathBuf::from("config.toml")],
    };

    let mut cfg = load_with_fallback(&candidates);
    if let Err(e) = ConfigManager::load_environment_config(&mut cfg) {
        warn!("failed to load environment config: {}", e);
    }
    cfg
}

/// 使用备选方案加载配置
fn load_with_fallback(candidates: &[PathBuf]) -> CoordinationAppConfig {
    for path in candidates {
        match load_config_from_source(path) {
            Ok(mut cfg) => {
                cfg.ensure_defaults();
                return cfg;
            }
            Err(err) => {
                warn!("failed to load config from {}: {err}", path.display());
            }
        }
    }

    warn!("no configuration source succeeded, falling back to defaults");
    let mut cfg = CoordinationAppConfig::default();
    cfg.ensure_defaults();
    cfg
}

/// 从源加载配置
fn load_config_from_source(path: &Path) -> Result<CoordinationAppConfig> {
    if !path.exists() {
        return Err(anyhow!(
            "configuration path {} does not exist",
            path.display()
        ));
    }

    let metadata = path
        .metadata()
        .with_context(|| format!("unable to read metadata for {}", path.display()))?;

    if metadata.is_dir() {
        load_config_from_directory(path)
    } else {
        load_config_from_file(path)
    }
}

/// 从文件加载配置
fn load_config_from_file(path: &Path) -> Result<CoordinationAppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read config file: {}", path.display()))?;
    CoordinationAppConfig::from_toml_str(&content)
        .with_context(|| format!("invalid config format: {}", path.display()))
}

/// 从目录加载配置：base.toml + shared/ + services/ + overrides/
fn load_config_from_directory(path: &Path) -> Result<CoordinationAppConfig> {
    let base_file = path.join("base.toml");
    if !base_file.exists() {
        return Err(anyhow!(
            "missing base configuration: {}",
            base_file.display()
        ));
    }

    let mut merged = load_toml_value(&base_file)?;

    if !merged.is_table() {
        return Err(anyhow!(
            "base configuration must be a table: {}",
            base_file.display()
        ));
    }

    merge_directory(&mut merged, &path.join("shared"))?;
    merge_directory(&mut merged, &path.join("services"))?;
    merge_directory(&mut merged, &path.join("overrides"))?;

    let cfg: CoordinationAppConfig = merged
        .try_into()
        .with_context(|| format!("invalid configuration after merging {}", path.display()))?;

    Ok(cfg)
}

/// 合并目录中的 TOML 片段（按文件名排序）
fn merge_directory(root: &mut Value, dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }

    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("unable to read config directory {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(OsStr::to_str)
                .map(|ext| ext.eq_ignore_ascii_case("toml"))
                .unwrap_or(false)
        })
        .collect::<Vec<_>>();

    entries.sort_by_key(|entry| entry.path());

    for entry in entries {
        let value = load_toml_value(&entry.path())?;
        merge_value(root, value);
    }

    Ok(())
}

fn load_toml_value(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read config fragment {}", path.display()))?;
    let value: Value = toml::from_str(&content)
        .with_context(|| format!("invalid TOML content in fragment {}", path.display()))?;
    Ok(value)
}

/// 深度合并，overlay 中的值覆盖 base
pub(crate) fn merge_value(base: &mut Value, overlay: Value) {
    match overlay {
        Value::Table(overlay_table) => {
            if let Value::Table(base_table) = base {
                for (key, overlay_value) in overlay_table.into_iter() {
                    match base_table.get_mut(&key) {
                        Some(base_value) => merge_value(base_value, overlay_value),
                        None => {
                            base_table.insert(key, overlay_value);
                        }
                    }
                }
            } else {
                *base = Value::Table(overlay_table);
            }
        }
        other => {
            *base = other;
        }
    }
}
