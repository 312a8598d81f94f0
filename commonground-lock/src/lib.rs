//! 分布式锁
//!
//! - [`LockManager`]：基于协调存储的租约锁（获取、释放、续期）
//! - [`GuardedExecutor`]：为任意操作加上“按键互斥执行”的包装

pub mod application;
pub mod config;
pub mod domain;

pub use application::GuardedExecutor;
pub use config::LockConfig;
pub use domain::{LockGuard, LockHandle, LockManager, LockOptions};
