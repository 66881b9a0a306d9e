//! Pool grouper
//!
//! Groups the set of current tablet servers by pool name. Servers that match
//! no regex are put into the default pool. Regrouping walks every live server
//! and may resolve every host name, so the recheck period should be specified
//! in minutes, not seconds.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use regex::Regex;
use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::resolver::HostResolver;
use crate::types::{PoolMap, PoolName, ServerMap};

/// Pool that collects every server matching no configured regex. The literal
/// is reserved and must not collide with a user table name.
pub const DEFAULT_POOL: &str = "HostTableLoadBalancer.ALL";

/// Compile an operator-supplied host regex.
///
/// Patterns are anchored so a regex must match the whole resolved host
/// string, not a substring of it.
pub fn compile_host_regex(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{pattern})$"))
}

struct GroupCache {
    groups: Arc<PoolMap>,
    refreshed_at: Option<Instant>,
}

/// Derives and caches the pool membership of the live server fleet.
///
/// The rebuild is serialized behind a mutex; concurrent readers observe either
/// the previous or the fresh grouping atomically. The cache is purely
/// time-based and does not detect membership changes in the input map.
pub struct PoolGrouper {
    regex_by_pool: HashMap<PoolName, Regex>,
    ip_based_regex: bool,
    recheck_period: Duration,
    resolver: Arc<dyn HostResolver>,
    cache: Mutex<GroupCache>,
}

impl PoolGrouper {
    pub fn new(
        regex_by_pool: HashMap<PoolName, Regex>,
        ip_based_regex: bool,
        recheck_period: Duration,
        resolver: Arc<dyn HostResolver>,
    ) -> Self {
        Self {
            regex_by_pool,
            ip_based_regex,
            recheck_period,
            resolver,
            cache: Mutex::new(GroupCache {
                groups: Arc::new(PoolMap::new()),
                refreshed_at: None,
            }),
        }
    }

    /// Names of the configured regex pools, i.e. every pool other than
    /// [`DEFAULT_POOL`].
    pub fn regex_pool_names(&self) -> impl Iterator<Item = &str> {
        self.regex_by_pool.keys().map(String::as_str)
    }

    /// Pool a table is pinned to: the table's own name iff a regex is
    /// configured for it, otherwise the default pool. A table unknown to the
    /// catalog snapshot (`None`) is treated as unpinned.
    pub fn pool_name_for_table<'a>(&'a self, table: Option<&'a str>) -> &'a str {
        match table {
            Some(name) if self.regex_by_pool.contains_key(name) => name,
            _ => DEFAULT_POOL,
        }
    }

    /// All pools whose regex matches the server's resolved host; the default
    /// pool iff none match or the host cannot be resolved.
    pub async fn pool_names_for_host(&self, host: &str) -> Vec<PoolName> {
        let subject: Cow<'_, str> = if self.ip_based_regex {
            Cow::Borrowed(host)
        } else {
            match self.resolver.resolve(host).await {
                Ok(name) => Cow::Owned(name),
                Err(e) => {
                    error!(host, error = %e, "unable to determine host name, grouping into default pool");
                    return vec![DEFAULT_POOL.to_string()];
                }
            }
        };

        let mut pools: Vec<PoolName> = self
            .regex_by_pool
            .iter()
            .filter(|(_, regex)| regex.is_match(&subject))
            .map(|(name, _)| name.clone())
            .collect();
        if pools.is_empty() {
            pools.push(DEFAULT_POOL.to_string());
        }
        pools
    }

    /// Group the current servers by pool name.
    ///
    /// Returns the cached grouping unchanged while it is younger than the
    /// recheck period; afterwards the next call rebuilds unconditionally.
    pub async fn group(&self, current: &ServerMap) -> Arc<PoolMap> {
        let mut cache = self.cache.lock().await;

        if let Some(refreshed_at) = cache.refreshed_at {
            if refreshed_at.elapsed() <= self.recheck_period {
                return Arc::clone(&cache.groups);
            }
        }

        debug!("performing pool recheck, regrouping tablet servers based on host regexes");
        let mut groups = PoolMap::new();
        for (server, status) in current {
            for pool in self.pool_names_for_host(server.host()).await {
                groups
                    .entry(pool)
                    .or_default()
                    .insert(server.clone(), status.clone());
            }
        }

        cache.groups = Arc::new(groups);
        cache.refreshed_at = Some(Instant::now());
        Arc::clone(&cache.groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ResolveError;
    use crate::types::{ServerId, ServerStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Resolver that returns the host unchanged and counts invocations.
    struct EchoResolver {
        calls: AtomicUsize,
    }

    impl EchoResolver {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::Relaxed)
        }
    }

    #[async_trait::async_trait]
    impl HostResolver for EchoResolver {
        async fn resolve(&self, host: &str) -> Result<String, ResolveError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(host.to_string())
        }
    }

    struct FailingResolver;

    #[async_trait::async_trait]
    impl HostResolver for FailingResolver {
        async fn resolve(&self, host: &str) -> Result<String, ResolveError> {
            Err(ResolveError::Unresolvable {
                host: host.to_string(),
                reason: "lookup refused".to_string(),
            })
        }
    }

    fn regexes(pairs: &[(&str, &str)]) -> HashMap<PoolName, Regex> {
        pairs
            .iter()
            .map(|(name, pattern)| (name.to_string(), compile_host_regex(pattern).unwrap()))
            .collect()
    }

    fn fleet(hosts: &[&str]) -> ServerMap {
        hosts
            .iter()
            .map(|h| (ServerId::new(*h, 9997), ServerStatus::default()))
            .collect()
    }

    fn grouper(pairs: &[(&str, &str)], period: Duration) -> PoolGrouper {
        PoolGrouper::new(regexes(pairs), false, period, Arc::new(EchoResolver::new()))
    }

    #[tokio::test]
    async fn test_two_pool_split() {
        let grouper = grouper(
            &[("tableA", r".*-a\..*"), ("tableB", r".*-b\..*")],
            Duration::from_secs(60),
        );
        let current = fleet(&["host1-a.x", "host2-a.x", "host3-b.x"]);

        let pools = grouper.group(&current).await;

        let a: Vec<_> = pools["tableA"].keys().map(|s| s.host().to_string()).collect();
        let b: Vec<_> = pools["tableB"].keys().map(|s| s.host().to_string()).collect();
        assert_eq!(a, vec!["host1-a.x", "host2-a.x"]);
        assert_eq!(b, vec!["host3-b.x"]);
        assert!(pools.get(DEFAULT_POOL).is_none());
    }

    #[tokio::test]
    async fn test_unmatched_server_lands_in_default_pool() {
        let grouper = grouper(
            &[("tableA", r".*-a\..*"), ("tableB", r".*-b\..*")],
            Duration::from_secs(60),
        );
        let current = fleet(&["host1-a.x", "host2-a.x", "host3-b.x", "host4-c.x"]);

        let pools = grouper.group(&current).await;

        assert_eq!(pools["tableA"].len(), 2);
        assert_eq!(pools["tableB"].len(), 1);
        let default: Vec<_> = pools[DEFAULT_POOL]
            .keys()
            .map(|s| s.host().to_string())
            .collect();
        assert_eq!(default, vec!["host4-c.x"]);
    }

    #[tokio::test]
    async fn test_overlapping_regexes_share_server() {
        let grouper = grouper(
            &[("tableA", r"host1\..*"), ("tableB", r"host1\.example\.com")],
            Duration::from_secs(60),
        );
        let current = fleet(&["host1.example.com"]);

        let pools = grouper.group(&current).await;

        assert!(pools["tableA"].contains_key(&ServerId::new("host1.example.com", 9997)));
        assert!(pools["tableB"].contains_key(&ServerId::new("host1.example.com", 9997)));
        assert!(pools.get(DEFAULT_POOL).is_none());
    }

    #[tokio::test]
    async fn test_total_coverage() {
        let grouper = grouper(&[("tableA", r".*-a\..*")], Duration::from_secs(60));
        let current = fleet(&["host1-a.x", "host4-c.x", "host5-c.x"]);

        let pools = grouper.group(&current).await;

        for server in current.keys() {
            assert!(
                pools.values().any(|pool| pool.contains_key(server)),
                "server {server} missing from every pool"
            );
        }
    }

    #[tokio::test]
    async fn test_pool_views_preserve_ordering() {
        let grouper = grouper(&[("tableA", r".*-a\..*")], Duration::from_secs(60));
        // Insertion order scrambled on purpose; BTreeMap re-sorts.
        let mut current = ServerMap::new();
        for host in ["host9-a.x", "host1-a.x", "host5-a.x"] {
            current.insert(ServerId::new(host, 9997), ServerStatus::default());
        }

        let pools = grouper.group(&current).await;

        let view: Vec<_> = pools["tableA"].keys().cloned().collect();
        let mut sorted = view.clone();
        sorted.sort();
        assert_eq!(view, sorted);
        assert_eq!(view[0].host(), "host1-a.x");
    }

    #[tokio::test]
    async fn test_matching_is_anchored() {
        // Unanchored, "host1" would also match "host10.x".
        let grouper = grouper(&[("tableA", r"host1\.x")], Duration::from_secs(60));
        let current = fleet(&["host1.x", "host10.x"]);

        let pools = grouper.group(&current).await;

        assert_eq!(pools["tableA"].len(), 1);
        assert!(pools["tableA"].contains_key(&ServerId::new("host1.x", 9997)));
        assert!(pools[DEFAULT_POOL].contains_key(&ServerId::new("host10.x", 9997)));
    }

    #[tokio::test]
    async fn test_group_caches_within_period() {
        let grouper = grouper(&[("tableA", r".*-a\..*")], Duration::from_secs(3600));
        let current = fleet(&["host1-a.x"]);

        let first = grouper.group(&current).await;
        // Even a different input map returns the cached grouping.
        let second = grouper.group(&fleet(&["host2-a.x"])).await;
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_group_rebuilds_after_period() {
        let grouper = grouper(&[("tableA", r".*-a\..*")], Duration::ZERO);
        let current = fleet(&["host1-a.x"]);

        let first = grouper.group(&current).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = grouper.group(&current).await;

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(*first, *second);
    }

    #[tokio::test]
    async fn test_resolution_failure_falls_back_to_default_pool() {
        let grouper = PoolGrouper::new(
            regexes(&[("tableA", r".*")]),
            false,
            Duration::from_secs(60),
            Arc::new(FailingResolver),
        );

        let pools = grouper.pool_names_for_host("host1-a.x").await;
        assert_eq!(pools, vec![DEFAULT_POOL.to_string()]);
    }

    #[tokio::test]
    async fn test_ip_mode_skips_resolution() {
        let resolver = Arc::new(EchoResolver::new());
        let grouper = PoolGrouper::new(
            regexes(&[("tableA", r"10\.0\..*")]),
            true,
            Duration::from_secs(60),
            Arc::clone(&resolver) as Arc<dyn HostResolver>,
        );

        let pools = grouper.pool_names_for_host("10.0.1.7").await;
        assert_eq!(pools, vec!["tableA".to_string()]);
        assert_eq!(resolver.calls(), 0);
    }

    #[test]
    fn test_pool_name_for_table() {
        let grouper = grouper(&[("tableA", r".*")], Duration::from_secs(60));
        assert_eq!(grouper.pool_name_for_table(Some("tableA")), "tableA");
        assert_eq!(grouper.pool_name_for_table(Some("tableB")), DEFAULT_POOL);
        assert_eq!(grouper.pool_name_for_table(None), DEFAULT_POOL);
    }
}
