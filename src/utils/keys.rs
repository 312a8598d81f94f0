use std::fmt;

/// 锁键构造器
///
/// 由调用方根据业务参数拼出锁键，例如 `LockKey::new("social_login").part(code)`
/// 得到 `social_login:<code>`。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey(String);

impl LockKey {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self(namespace.into())
    }

    /// 追加一个键段
    pub fn part(mut self, segment: impl fmt::Display) -> Self {
        self.0.push(':');
        self.0.push_str(&segment.to_string());
        self
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<LockKey> for String {
    fn from(key: LockKey) -> Self {
        key.0
    }
}

impl AsRef<str> for LockKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_parts() {
        let key = LockKey::new("naver_crawling").part(23).part("politics");
        assert_eq!(key.as_str(), "naver_crawling:23:politics");
        assert_eq!(String::from(key), "naver_crawling:23:politics");
    }

    #[test]
    fn test_namespace_only() {
        assert_eq!(LockKey::new("maintenance").to_string(), "maintenance");
    }
}
