//! Authorization engine configuration.

use std::time::Duration;

/// Configuration for the authorization repository, service and policy
/// resolver.
#[derive(Debug, Clone)]
pub struct AuthzConfig {
    /// TTL of cached read-models in seconds (default: 900 = 15 minutes).
    pub cache_ttl_secs: u64,
    /// TTL of resolved policies in seconds (default: 1800 = 30 minutes).
    pub policy_cache_ttl_secs: u64,
    /// Policy-name prefix that marks a permission-backed policy.
    pub policy_prefix: String,
    /// Upper bound applied to every requested page size.
    pub max_page_size: u64,
}

impl AuthzConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs.max(1))
    }

    pub fn policy_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.policy_cache_ttl_secs.max(1))
    }

    /// Clamp a requested page size into `1..=max_page_size`.
    pub fn clamp_page_size(&self, requested: u64) -> u64 {
        requested.clamp(1, self.max_page_size.max(1))
    }
}

impl Default for AuthzConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 900,
            policy_cache_ttl_secs: 1800,
            policy_prefix: "Permission_".into(),
            max_page_size: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_clamped() {
        let config = AuthzConfig::default();
        assert_eq!(config.clamp_page_size(0), 1);
        assert_eq!(config.clamp_page_size(25), 25);
        assert_eq!(config.clamp_page_size(10_000), 100);
    }
}
