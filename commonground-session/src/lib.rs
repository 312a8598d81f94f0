//! 会话注册表
//!
//! 基于协调存储的带 TTL 会话记录，按用户维护二级索引，并在创建时执行
//! 每用户并发会话上限策略。

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod service;

pub use application::service::{PrincipalKind, SessionApplicationService};
pub use config::SessionConfig;
pub use domain::model::{Session, SessionPolicy, SessionView};
pub use domain::repository::SessionRepository;
pub use domain::service::SessionDomainService;
pub use infrastructure::persistence::StoreSessionRepository;
pub use service::CoordinationServiceApp;
