//! Domain filtering logic for proxy servers.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::{matches_domain_pattern, NetworkPolicy};

/// Filter decision for a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    /// Allow the connection.
    Allow,
    /// Deny the connection.
    Deny,
}

/// Domain filter for proxy connections.
#[derive(Debug, Clone, Default)]
pub struct DomainFilter {
    allowed_domains: Vec<String>,
    denied_domains: Vec<String>,
}

/// Filter shared between the control loop (sole writer) and connection handlers.
pub type SharedFilter = Arc<RwLock<DomainFilter>>;

impl DomainFilter {
    /// Create a domain filter from a network policy.
    pub fn from_policy(policy: &NetworkPolicy) -> Self {
        Self {
            allowed_domains: policy.allowed_domains.clone(),
            denied_domains: policy.denied_domains.clone(),
        }
    }

    /// Create an allow-all filter.
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Create a filter that refuses every destination.
    pub fn deny_all() -> Self {
        Self::from_policy(&NetworkPolicy::deny_all())
    }

    /// Decide whether a connection to `hostname` may proceed.
    ///
    /// Deny entries win over allow entries. A non-empty allow list turns the
    /// filter into default-deny; an empty one allows anything not denied.
    pub fn check(&self, hostname: &str) -> FilterDecision {
        if hostname.is_empty() {
            return FilterDecision::Deny;
        }

        if self
            .denied_domains
            .iter()
            .any(|pattern| matches_domain_pattern(hostname, pattern))
        {
            return FilterDecision::Deny;
        }

        if self.allowed_domains.is_empty() {
            return FilterDecision::Allow;
        }

        if self
            .allowed_domains
            .iter()
            .any(|pattern| matches_domain_pattern(hostname, pattern))
        {
            FilterDecision::Allow
        } else {
            FilterDecision::Deny
        }
    }

    /// Check if a domain is allowed.
    pub fn is_allowed(&self, hostname: &str) -> bool {
        self.check(hostname) == FilterDecision::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(allowed: &[&str], denied: &[&str]) -> DomainFilter {
        DomainFilter::from_policy(&NetworkPolicy {
            allowed_domains: allowed.iter().map(|s| s.to_string()).collect(),
            denied_domains: denied.iter().map(|s| s.to_string()).collect(),
        })
    }

    #[test]
    fn test_domain_filter_allow_all() {
        let filter = DomainFilter::allow_all();
        assert_eq!(filter.check("example.com"), FilterDecision::Allow);
        assert_eq!(filter.check("evil.com"), FilterDecision::Allow);
    }

    #[test]
    fn test_empty_allow_list_denies_only_denied() {
        let filter = filter(&[], &["evil.example"]);
        assert_eq!(filter.check("evil.example"), FilterDecision::Deny);
        assert_eq!(filter.check("EVIL.example"), FilterDecision::Deny);
        assert_eq!(filter.check("good.example"), FilterDecision::Allow);
        assert_eq!(filter.check("sub.evil.example"), FilterDecision::Allow);
    }

    #[test]
    fn test_non_empty_allow_list_is_default_deny() {
        let filter = filter(&["good.example", "*.npmjs.org"], &[]);
        assert_eq!(filter.check("good.example"), FilterDecision::Allow);
        assert_eq!(filter.check("registry.npmjs.org"), FilterDecision::Allow);
        assert_eq!(filter.check("other.example"), FilterDecision::Deny);
    }

    #[test]
    fn test_deny_wins_over_allow() {
        let filter = filter(&["both.example", "*.example.com"], &["both.example", "evil.example.com"]);
        assert_eq!(filter.check("both.example"), FilterDecision::Deny);
        assert_eq!(filter.check("evil.example.com"), FilterDecision::Deny);
        assert_eq!(filter.check("api.example.com"), FilterDecision::Allow);
    }

    #[test]
    fn test_deny_all_and_empty_host() {
        let filter = DomainFilter::deny_all();
        assert!(!filter.is_allowed("github.com"));
        assert!(!filter.is_allowed("127.0.0.1"));
        assert!(!DomainFilter::allow_all().is_allowed(""));
    }
}
