//! Per-resource-class cache policies

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// How a fetch consults the cache and the network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheStrategy {
    /// Serve a live cache hit, otherwise fetch and store
    CacheFirst,
    /// Fetch and store; optionally fall back to the cache on failure
    NetworkFirst,
    /// Never touch the network
    CacheOnly,
    /// Never touch the cache
    NetworkOnly,
}

impl CacheStrategy {
    /// Kebab-case name, as accepted on the command line
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStrategy::CacheFirst => "cache-first",
            CacheStrategy::NetworkFirst => "network-first",
            CacheStrategy::CacheOnly => "cache-only",
            CacheStrategy::NetworkOnly => "network-only",
        }
    }
}

impl fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid cache strategy: '{0}'. Valid strategies: cache-first, network-first, cache-only, network-only")]
pub struct ParseStrategyError(String);

impl FromStr for CacheStrategy {
    type Err = ParseStrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "cache-first" | "cachefirst" => Ok(CacheStrategy::CacheFirst),
            "network-first" | "networkfirst" => Ok(CacheStrategy::NetworkFirst),
            "cache-only" | "cacheonly" => Ok(CacheStrategy::CacheOnly),
            "network-only" | "networkonly" => Ok(CacheStrategy::NetworkOnly),
            _ => Err(ParseStrategyError(s.to_string())),
        }
    }
}

/// Immutable caching rules for one class of resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub strategy: CacheStrategy,
    /// Lifetime of entries written under this policy
    pub ttl: Duration,
    /// Serve an expired cached value when the network fails (network-first only)
    pub allow_stale: bool,
}

impl CachePolicy {
    /// Policy without stale fallback
    pub const fn new(strategy: CacheStrategy, ttl: Duration) -> Self {
        Self {
            strategy,
            ttl,
            allow_stale: false,
        }
    }

    /// Enables or disables serving expired data on network failure
    pub const fn with_allow_stale(mut self, allow_stale: bool) -> Self {
        self.allow_stale = allow_stale;
        self
    }

    /// Fresh cache if present, else the network, written through for `ttl`
    pub const fn cache_first(ttl: Duration) -> Self {
        Self::new(CacheStrategy::CacheFirst, ttl)
    }

    /// Network first, written through for `ttl`
    pub const fn network_first(ttl: Duration) -> Self {
        Self::new(CacheStrategy::NetworkFirst, ttl)
    }

    /// Never touches the network
    pub const fn cache_only() -> Self {
        Self::new(CacheStrategy::CacheOnly, Duration::ZERO)
    }

    /// Never touches the cache
    pub const fn network_only() -> Self {
        Self::new(CacheStrategy::NetworkOnly, Duration::ZERO)
    }
}

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;

/// Policies keyed by resource class ("courses", "assignments", ...)
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyTable {
    policies: HashMap<String, CachePolicy>,
    fallback: CachePolicy,
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::new(
            CachePolicy::network_first(Duration::from_secs(5 * MINUTE)).with_allow_stale(true),
        )
        .with("courses", CachePolicy::cache_first(Duration::from_secs(HOUR)))
        .with(
            "assignments",
            CachePolicy::network_first(Duration::from_secs(30 * MINUTE)).with_allow_stale(true),
        )
        .with(
            "calendar",
            CachePolicy::network_first(Duration::from_secs(15 * MINUTE)).with_allow_stale(true),
        )
        .with(
            "announcements",
            CachePolicy::network_first(Duration::from_secs(10 * MINUTE)).with_allow_stale(true),
        )
        .with("profile", CachePolicy::cache_first(Duration::from_secs(24 * HOUR)))
    }
}

impl PolicyTable {
    /// Empty table answering every class with `fallback`
    pub fn new(fallback: CachePolicy) -> Self {
        Self {
            policies: HashMap::new(),
            fallback,
        }
    }

    /// Adds or replaces the policy for `class`
    pub fn with(mut self, class: impl Into<String>, policy: CachePolicy) -> Self {
        self.policies.insert(class.into(), policy);
        self
    }

    /// Policy for `class`, or the fallback
    pub fn policy_for(&self, class: &str) -> CachePolicy {
        self.policies.get(class).copied().unwrap_or(self.fallback)
    }

    pub fn fallback(&self) -> CachePolicy {
        self.fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_parses_aliases() {
        assert_eq!("cache-first".parse(), Ok(CacheStrategy::CacheFirst));
        assert_eq!("networkFirst".parse(), Ok(CacheStrategy::NetworkFirst));
        assert_eq!("CACHE_ONLY".parse(), Ok(CacheStrategy::CacheOnly));
        assert_eq!("network-only".parse(), Ok(CacheStrategy::NetworkOnly));
    }

    #[test]
    fn test_strategy_parse_invalid() {
        let err = "sometimes".parse::<CacheStrategy>().unwrap_err();
        assert!(err.to_string().contains("Invalid cache strategy"));
        assert!(err.to_string().contains("sometimes"));
    }

    #[test]
    fn test_strategy_display_round_trips() {
        for strategy in [
            CacheStrategy::CacheFirst,
            CacheStrategy::NetworkFirst,
            CacheStrategy::CacheOnly,
            CacheStrategy::NetworkOnly,
        ] {
            assert_eq!(strategy.to_string().parse(), Ok(strategy));
        }
    }

    #[test]
    fn test_allow_stale_defaults_off() {
        let policy = CachePolicy::network_first(Duration::from_secs(60));
        assert!(!policy.allow_stale);
        assert!(policy.with_allow_stale(true).allow_stale);
    }

    #[test]
    fn test_default_table() {
        let table = PolicyTable::default();

        let courses = table.policy_for("courses");
        assert_eq!(courses.strategy, CacheStrategy::CacheFirst);
        assert_eq!(courses.ttl, Duration::from_secs(3600));

        let assignments = table.policy_for("assignments");
        assert_eq!(assignments.strategy, CacheStrategy::NetworkFirst);
        assert!(assignments.allow_stale);

        assert_eq!(table.policy_for("grades"), table.fallback());
    }

    #[test]
    fn test_custom_class_overrides_fallback() {
        let table = PolicyTable::new(CachePolicy::network_only())
            .with("syllabus", CachePolicy::cache_first(Duration::from_secs(10)));

        assert_eq!(table.policy_for("syllabus").strategy, CacheStrategy::CacheFirst);
        assert_eq!(table.policy_for("other").strategy, CacheStrategy::NetworkOnly);
    }
}
