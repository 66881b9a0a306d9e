//! Out-of-bounds scanner
//!
//! Walks the live servers looking for tablets hosted outside their table's
//! pool and proposes migrations back into the pool. Covers the case where the
//! regex configuration changed and the master restarted while tablet servers
//! stayed up.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, instrument, warn};

use crate::pools::PoolGrouper;
use crate::types::{Migration, PoolMap, ServerId, ServerMap, TableId, TableName, TabletExtent, TabletStat};

/// Per-server RPC interface consumed by the scan.
#[async_trait::async_trait]
pub trait TabletClient: Send + Sync {
    /// Tablets of one table currently online on one server. May fail with a
    /// transport error; the scan logs and moves on.
    async fn online_tablets_for_table(
        &self,
        server: &ServerId,
        table: &str,
    ) -> Result<Vec<TabletStat>, Box<dyn std::error::Error + Send + Sync>>;
}

/// Scans for out-of-bounds tablets at most once per period.
///
/// The last-check timestamp is an atomic millisecond counter relative to a
/// construction-time epoch, so the first scan only becomes due one full
/// period after startup.
pub struct OobScanner {
    period: Duration,
    epoch: Instant,
    last_check_ms: AtomicU64,
}

impl OobScanner {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            epoch: Instant::now(),
            last_check_ms: AtomicU64::new(0),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Whether a full period has passed since the last scan attempt.
    pub fn due(&self) -> bool {
        let last = self.last_check_ms.load(Ordering::Relaxed);
        self.now_ms().saturating_sub(last) > self.period.as_millis() as u64
    }

    /// Sweep every live server for tablets outside their table's pool.
    ///
    /// The timestamp advances unconditionally once the sweep finishes, even
    /// when individual RPCs failed, so a transient RPC storm cannot cause
    /// back-to-back full sweeps.
    #[instrument(skip_all)]
    pub async fn scan(
        &self,
        current: &ServerMap,
        migrations: &HashSet<TabletExtent>,
        grouper: &PoolGrouper,
        pools: &PoolMap,
        table_ids: &HashMap<TableName, TableId>,
        client: &dyn TabletClient,
    ) -> Vec<Migration> {
        let mut proposals = Vec::new();

        for server in current.keys() {
            let assigned_pools = grouper.pool_names_for_host(server.host()).await;

            for table in grouper.regex_pool_names() {
                if assigned_pools.iter().any(|pool| pool == table) {
                    // The server legitimately hosts this table's tablets.
                    continue;
                }

                let Some(table_id) = table_ids.get(table) else {
                    warn!(
                        table,
                        "unable to check for out of bounds tablets, table may have been deleted or renamed"
                    );
                    continue;
                };

                let stats = match client.online_tablets_for_table(server, table_id).await {
                    Ok(stats) => stats,
                    Err(e) => {
                        error!(
                            table_id = %table_id,
                            server = %server,
                            error = %e,
                            "error getting tablets during out of bounds check"
                        );
                        continue;
                    }
                };

                for stat in stats {
                    let extent = stat.extent;
                    if migrations.contains(&extent) {
                        debug!(extent = %extent, "migration for out of bounds tablet already requested");
                        continue;
                    }

                    let pool_name = grouper.pool_name_for_table(Some(table));
                    match pools.get(pool_name).and_then(|view| view.keys().next()) {
                        Some(target) => {
                            info!(
                                extent = %extent,
                                from = %server,
                                to = %target,
                                "tablet is outside the bounds of its pool, migrating"
                            );
                            proposals.push(Migration {
                                extent,
                                from: server.clone(),
                                to: target.clone(),
                            });
                        }
                        None => {
                            warn!(
                                pool = pool_name,
                                "no tablet servers online for pool, unable to migrate out of bounds tablets"
                            );
                        }
                    }
                }
            }
        }

        self.last_check_ms.store(self.now_ms(), Ordering::Relaxed);
        proposals
    }
}
