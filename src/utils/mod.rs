//! 工具模块
//!
//! - 时钟抽象（系统时钟 / 可手动推进的时钟）
//! - 锁持有者令牌与会话 ID 生成
//! - 锁键构造
//! - 不会溢出的截止时间计算

mod clock;
mod keys;

pub use clock::{Clock, ManualClock, SystemClock};
pub use keys::LockKey;

use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

/// 约 30 年，作为“永不到期”的截止时间
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// 生成锁持有者令牌（每次获取尝试唯一，不可预测）
pub fn generate_owner_token() -> String {
    Uuid::new_v4().to_string()
}

/// 生成会话 ID（32 位十六进制，不含连字符）
pub fn generate_session_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// `start + after`，溢出时饱和为远期时间点（例如 `Duration::MAX` 表示一直等待）
pub fn deadline_after(start: Instant, after: Duration) -> Instant {
    start
        .checked_add(after)
        .or_else(|| start.checked_add(FAR_FUTURE))
        .unwrap_or(start)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_after_saturates() {
        let start = Instant::now();
        assert_eq!(
            deadline_after(start, Duration::from_secs(5)),
            start + Duration::from_secs(5)
        );
        assert!(deadline_after(start, Duration::MAX) >= start + FAR_FUTURE);
    }

    #[test]
    fn test_session_id_format() {
        let id = generate_session_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, generate_session_id());
    }

    #[test]
    fn test_owner_tokens_are_unique() {
        let tokens: std::collections::HashSet<String> =
            (0..1000).map(|_| generate_owner_token()).collect();
        assert_eq!(tokens.len(), 1000);
    }
}
