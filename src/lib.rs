//! CommonGround 协调层公共库
//!
//! 提供跨进程协调所需的基础设施：协调存储抽象、统一错误类型、配置加载和日志初始化

pub mod config;
pub mod error;
pub mod store;
pub mod tracing;
pub mod utils;

pub use config::{
    CoordinationAppConfig, LockSectionConfig, LoggingConfig, RedisPoolConfig,
    SessionPolicySectionConfig, SessionSectionConfig, load_config,
};
pub use error::*;
pub use store::{CoordinationStore, MemoryCoordinationStore, RedisCoordinationStore, connect};
pub use utils::*;
