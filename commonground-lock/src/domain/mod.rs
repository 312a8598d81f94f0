pub mod guard;
pub mod lock_manager;
pub mod model;

pub use guard::LockGuard;
pub use lock_manager::LockManager;
pub use model::{LockHandle, LockOptions};
