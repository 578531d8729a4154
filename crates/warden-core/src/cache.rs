//! Cache store contract.
//!
//! Implementations may be local or distributed. Every operation is allowed
//! to fail; callers treat failures as a miss (reads) or a no-op (writes).

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    #[error("cache serialization failed: {0}")]
    Serialization(String),
}

pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>, CacheError>> + Send;
    fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), CacheError>> + Send;
    fn remove(&self, key: &str) -> impl Future<Output = Result<(), CacheError>> + Send;
    /// Remove every key matching a glob pattern where `*` matches any run
    /// of characters.
    fn remove_matching(&self, pattern: &str)
    -> impl Future<Output = Result<u64, CacheError>> + Send;
    fn clear(&self) -> impl Future<Output = Result<(), CacheError>> + Send;
}

/// Glob match supporting `*` only.
pub fn pattern_matches(pattern: &str, key: &str) -> bool {
    let mut parts = pattern.split('*');
    let Some(first) = parts.next() else {
        return key.is_empty();
    };
    let Some(mut rest) = key.strip_prefix(first) else {
        return false;
    };
    let parts: Vec<&str> = parts.collect();
    let Some((last, middle)) = parts.split_last() else {
        // No wildcard at all: exact match.
        return rest.is_empty();
    };
    for part in middle {
        match rest.find(part) {
            Some(pos) => rest = &rest[pos + part.len()..],
            None => return false,
        }
    }
    rest.len() >= last.len() && rest.ends_with(last)
}

#[cfg(test)]
mod tests {
    use super::pattern_matches;

    #[test]
    fn glob_patterns() {
        assert!(pattern_matches("auth:*", "auth:user_perms:u-1"));
        assert!(pattern_matches("auth:has_perm:u-1:*", "auth:has_perm:u-1:Users.View"));
        assert!(!pattern_matches("auth:has_perm:u-1:*", "auth:has_perm:u-10:Users.View"));
        assert!(pattern_matches("auth:*:u-1", "auth:user_perms:u-1"));
        assert!(pattern_matches("exact", "exact"));
        assert!(!pattern_matches("exact", "exactly"));
        assert!(pattern_matches("*", "anything"));
        assert!(pattern_matches("a*b*c", "a-x-b-y-c"));
        assert!(!pattern_matches("a*b*c", "a-x-c-y-b"));
    }
}
