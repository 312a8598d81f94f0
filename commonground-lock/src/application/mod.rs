pub mod guarded;

pub use guarded::GuardedExecutor;
