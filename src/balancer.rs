//! Host-regex balancer
//!
//! Entry points driven by the master tick. Delegates per-table assignment and
//! balancing to the inner per-table balancer, constrained to the table's pool,
//! and runs the out-of-bounds scan on its own period.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::catalog::TableCatalog;
use crate::config::{host_regex_pool_name, BalancerSettings, ConfigError, HOST_BALANCER_PREFIX};
use crate::oob::{OobScanner, TabletClient};
use crate::pools::{compile_host_regex, PoolGrouper, DEFAULT_POOL};
use crate::resolver::HostResolver;
use crate::types::{Migration, PoolName, ServerId, ServerMap, TableId, TableName, TabletExtent};

/// Floor for the next-tick delay hint returned by [`HostRegexBalancer::balance`].
pub const MIN_BALANCE_DELAY: Duration = Duration::from_millis(5_000);

/// Per-table balancer the core delegates to. Receives only the restricted
/// pool view and must not assume the complete fleet.
#[async_trait::async_trait]
pub trait TabletBalancer: Send + Sync {
    /// Choose a server for each unassigned tablet, merging decisions into
    /// `assignments`.
    async fn get_assignments(
        &self,
        current: &ServerMap,
        unassigned: &HashMap<TabletExtent, Option<ServerId>>,
        assignments: &mut HashMap<TabletExtent, ServerId>,
    );

    /// Propose migrations within the view; returns a next-tick delay hint and
    /// the proposals.
    async fn balance(
        &self,
        current: &ServerMap,
        migrations: &HashSet<TabletExtent>,
    ) -> (Duration, Vec<Migration>);
}

/// Lookup of the per-table balancer for a table.
pub trait BalancerRegistry: Send + Sync {
    fn balancer_for_table(&self, table: &str) -> Arc<dyn TabletBalancer>;
}

/// Initialization errors
#[derive(Error, Debug)]
pub enum BalancerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Table catalog unavailable: {0}")]
    Catalog(String),

    #[error("Invalid host regex for pool {pool}: {source}")]
    InvalidRegex {
        pool: String,
        #[source]
        source: regex::Error,
    },
}

/// Balancer that groups tablet servers into pools with operator-supplied host
/// regexes and keeps each table's tablets inside its pool.
pub struct HostRegexBalancer {
    settings: BalancerSettings,
    table_name_by_id: HashMap<TableId, TableName>,
    grouper: PoolGrouper,
    oob: OobScanner,
    catalog: Arc<dyn TableCatalog>,
    client: Arc<dyn TabletClient>,
    registry: Arc<dyn BalancerRegistry>,
}

impl HostRegexBalancer {
    /// Load properties and snapshot the catalog. Must be called before either
    /// entry point; a missing catalog or a malformed property is fatal here.
    pub async fn init(
        site: &HashMap<String, String>,
        catalog: Arc<dyn TableCatalog>,
        client: Arc<dyn TabletClient>,
        registry: Arc<dyn BalancerRegistry>,
        resolver: Arc<dyn HostResolver>,
    ) -> Result<Self, BalancerError> {
        let settings = BalancerSettings::from_properties(site)?;

        let id_map = catalog
            .table_id_map()
            .await
            .map_err(|e| BalancerError::Catalog(e.to_string()))?;

        let mut table_name_by_id = HashMap::with_capacity(id_map.len());
        let mut regex_by_pool: HashMap<PoolName, Regex> = HashMap::new();
        for (name, id) in &id_map {
            table_name_by_id.insert(id.clone(), name.clone());

            let props = catalog
                .properties_with_prefix(name, HOST_BALANCER_PREFIX)
                .await
                .map_err(|e| BalancerError::Catalog(e.to_string()))?;
            for (key, pattern) in &props {
                if let Some(pool) = host_regex_pool_name(key) {
                    let regex = compile_host_regex(pattern).map_err(|source| {
                        BalancerError::InvalidRegex {
                            pool: pool.to_string(),
                            source,
                        }
                    })?;
                    regex_by_pool.insert(pool.to_string(), regex);
                }
            }
        }

        info!(
            tables = table_name_by_id.len(),
            regex_pools = regex_by_pool.len(),
            oob_period = ?settings.oob_period,
            pool_recheck_period = ?settings.pool_recheck_period,
            ip_based = settings.ip_based_regex,
            "host regex balancer initialized"
        );

        let grouper = PoolGrouper::new(
            regex_by_pool,
            settings.ip_based_regex,
            settings.pool_recheck_period,
            resolver,
        );
        let oob = OobScanner::new(settings.oob_period);

        Ok(Self {
            settings,
            table_name_by_id,
            grouper,
            oob,
            catalog,
            client,
            registry,
        })
    }

    pub fn settings(&self) -> &BalancerSettings {
        &self.settings
    }

    /// Assign each unassigned tablet within its table's pool.
    ///
    /// Tablets of a table whose pool has no live servers fall back to the
    /// default pool; if that is empty too they stay unassigned this tick.
    #[instrument(skip_all)]
    pub async fn get_assignments(
        &self,
        current: &ServerMap,
        unassigned: &HashMap<TabletExtent, Option<ServerId>>,
        assignments: &mut HashMap<TabletExtent, ServerId>,
    ) {
        let pools = self.grouper.group(current).await;

        let mut grouped: HashMap<&str, HashMap<TabletExtent, Option<ServerId>>> = HashMap::new();
        for (extent, last_server) in unassigned {
            grouped
                .entry(extent.table_id())
                .or_default()
                .insert(extent.clone(), last_server.clone());
        }

        for (table_id, table_unassigned) in grouped {
            let table_name = self.table_name_by_id.get(table_id).map(String::as_str);
            let pool_name = self.grouper.pool_name_for_table(table_name);

            let mut view = pools.get(pool_name).filter(|pool| !pool.is_empty());
            if view.is_none() {
                warn!(
                    table = table_name.unwrap_or(table_id),
                    "no tablet servers online for table, assigning within default pool"
                );
                view = pools.get(DEFAULT_POOL);
            }
            let Some(view) = view else {
                error!(
                    table = table_name.unwrap_or(table_id),
                    "no tablet servers exist in the default pool, unable to assign tablets"
                );
                continue;
            };

            debug!(
                tablets = table_unassigned.len(),
                table = table_name.unwrap_or(table_id),
                pool = pool_name,
                "delegating assignment to per-table balancer"
            );
            self.registry
                .balancer_for_table(table_id)
                .get_assignments(view, &table_unassigned, assignments)
                .await;
        }
    }

    /// Balance each table within its pool, running the out-of-bounds scan
    /// first when due. Returns a next-tick delay hint, never below
    /// [`MIN_BALANCE_DELAY`].
    #[instrument(skip_all)]
    pub async fn balance(
        &self,
        current: &ServerMap,
        migrations: &HashSet<TabletExtent>,
        migrations_out: &mut Vec<Migration>,
    ) -> Duration {
        let id_map = match self.catalog.table_id_map().await {
            Ok(map) => map,
            Err(e) => {
                warn!(error = %e, "table catalog unavailable, skipping balance pass");
                return MIN_BALANCE_DELAY;
            }
        };

        let pools = self.grouper.group(current).await;

        if self.oob.due() {
            let proposals = self
                .oob
                .scan(
                    current,
                    migrations,
                    &self.grouper,
                    &pools,
                    &id_map,
                    self.client.as_ref(),
                )
                .await;
            migrations_out.extend(proposals);
        }

        if !migrations.is_empty() {
            warn!(
                outstanding = migrations.len(),
                "not balancing tables due to outstanding migrations"
            );
            return MIN_BALANCE_DELAY;
        }

        let mut min_delay: Option<Duration> = None;
        for table_id in id_map.values() {
            let table_name = self.table_name_by_id.get(table_id).map(String::as_str);
            let pool_name = self.grouper.pool_name_for_table(table_name);
            let Some(view) = pools.get(pool_name) else {
                warn!(
                    table = table_name.unwrap_or(table_id),
                    recheck_ms = self.settings.pool_recheck_period.as_millis() as u64,
                    "skipping balance for table, no tablet servers online in its pool"
                );
                continue;
            };

            let (delay, new_migrations) = self
                .registry
                .balancer_for_table(table_id)
                .balance(view, migrations)
                .await;
            min_delay = Some(min_delay.map_or(delay, |d| d.min(delay)));
            migrations_out.extend(new_migrations);
        }

        min_delay.unwrap_or(MIN_BALANCE_DELAY).max(MIN_BALANCE_DELAY)
    }
}
