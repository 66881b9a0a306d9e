//! TableGrid Balancer Service (development harness)
//!
//! Runs the host-regex balancer against an in-process mock fleet so the
//! control loop can be observed stand-alone: a static catalog with two
//! regex-pinned tables, a tablet client that reports one stray tablet, and an
//! even-spread inner balancer. In production the balancer is embedded in the
//! master and driven by its tick.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use clap::Parser;
use tokio::signal;
use tracing::{info, Level};

use tablegrid_balancer::catalog::CatalogResult;
use tablegrid_balancer::config::{
    HOST_BALANCER_IS_IP, HOST_BALANCER_OOB_PERIOD, HOST_BALANCER_POOL_RECHECK,
};
use tablegrid_balancer::{
    BalancerRegistry, HostRegexBalancer, HostResolver, Migration, ResolveError, ServerId,
    ServerMap, ServerStatus, TableCatalog, TabletBalancer, TabletClient, TabletExtent, TabletStat,
};

#[derive(Parser)]
#[command(name = "tablegrid-balancer")]
#[command(about = "TableGrid host-regex balancer development harness")]
struct Cli {
    /// Interval between out-of-bounds scans (e.g. 30s, 5m)
    #[arg(long, default_value = "30s")]
    oob_period: String,

    /// Interval between pool re-derivations
    #[arg(long, default_value = "10s")]
    pool_check: String,

    /// Match regexes against raw host strings instead of resolved names
    #[arg(long, default_value = "false")]
    ip_based: bool,

    /// Seconds between ticks
    #[arg(long, default_value = "5")]
    tick_secs: u64,

    /// Tablet servers per pool in the mock fleet
    #[arg(long, default_value = "3")]
    servers: usize,
}

// =============================================================================
// MOCK COLLABORATORS (development fleet)
// =============================================================================

struct DemoCatalog;

#[async_trait::async_trait]
impl TableCatalog for DemoCatalog {
    async fn table_id_map(&self) -> CatalogResult<HashMap<String, String>> {
        Ok(HashMap::from([
            ("orders".to_string(), "1".to_string()),
            ("metrics".to_string(), "2".to_string()),
            ("scratch".to_string(), "3".to_string()),
        ]))
    }

    async fn properties_with_prefix(
        &self,
        table: &str,
        prefix: &str,
    ) -> CatalogResult<HashMap<String, String>> {
        let mut props = HashMap::new();
        let regex = match table {
            "orders" => Some(r".*-ord\..*"),
            "metrics" => Some(r".*-met\..*"),
            _ => None,
        };
        if let Some(regex) = regex {
            props.insert(format!("{prefix}{table}"), regex.to_string());
        }
        Ok(props)
    }
}

/// Reports one stray orders tablet on the general-purpose server so the
/// out-of-bounds scan has something to find.
struct DemoTabletClient;

#[async_trait::async_trait]
impl TabletClient for DemoTabletClient {
    async fn online_tablets_for_table(
        &self,
        server: &ServerId,
        table: &str,
    ) -> Result<Vec<TabletStat>, Box<dyn std::error::Error + Send + Sync>> {
        if server.host().contains("-gen.") && table == "1" {
            let extent = TabletExtent::new("1", Some(Bytes::from_static(b"m")), None);
            return Ok(vec![TabletStat::new(extent)]);
        }
        Ok(Vec::new())
    }
}

struct IdentityResolver;

#[async_trait::async_trait]
impl HostResolver for IdentityResolver {
    async fn resolve(&self, host: &str) -> Result<String, ResolveError> {
        Ok(host.to_string())
    }
}

/// Spreads unassigned tablets across the view round-robin.
struct EvenSpreadBalancer;

#[async_trait::async_trait]
impl TabletBalancer for EvenSpreadBalancer {
    async fn get_assignments(
        &self,
        current: &ServerMap,
        unassigned: &HashMap<TabletExtent, Option<ServerId>>,
        assignments: &mut HashMap<TabletExtent, ServerId>,
    ) {
        if current.is_empty() {
            return;
        }
        for (extent, server) in unassigned.keys().zip(current.keys().cycle()) {
            assignments.insert(extent.clone(), server.clone());
        }
    }

    async fn balance(
        &self,
        _current: &ServerMap,
        _migrations: &HashSet<TabletExtent>,
    ) -> (Duration, Vec<Migration>) {
        (Duration::from_secs(60), Vec::new())
    }
}

struct DemoRegistry(Arc<EvenSpreadBalancer>);

impl BalancerRegistry for DemoRegistry {
    fn balancer_for_table(&self, _table: &str) -> Arc<dyn TabletBalancer> {
        Arc::clone(&self.0) as Arc<dyn TabletBalancer>
    }
}

fn demo_fleet(per_pool: usize) -> ServerMap {
    let mut fleet = ServerMap::new();
    for i in 0..per_pool {
        fleet.insert(
            ServerId::new(format!("tsrv{i}-ord.example.net"), 9997),
            ServerStatus::default(),
        );
        fleet.insert(
            ServerId::new(format!("tsrv{i}-met.example.net"), 9997),
            ServerStatus::default(),
        );
    }
    fleet.insert(
        ServerId::new("tsrv9-gen.example.net", 9997),
        ServerStatus::default(),
    );
    fleet
}

fn demo_unassigned() -> HashMap<TabletExtent, Option<ServerId>> {
    let mut unassigned = HashMap::new();
    for (table, rows) in [("1", &["c", "g", "p"][..]), ("2", &["h", "t"][..])] {
        let mut prev: Option<Bytes> = None;
        for row in rows {
            let end = Bytes::copy_from_slice(row.as_bytes());
            unassigned.insert(
                TabletExtent::new(table, Some(end.clone()), prev.take()),
                None,
            );
            prev = Some(end);
        }
    }
    unassigned
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_target(true)
        .init();

    let cli = Cli::parse();

    let mut site = HashMap::new();
    site.insert(HOST_BALANCER_OOB_PERIOD.to_string(), cli.oob_period.clone());
    site.insert(HOST_BALANCER_POOL_RECHECK.to_string(), cli.pool_check.clone());
    site.insert(HOST_BALANCER_IS_IP.to_string(), cli.ip_based.to_string());

    info!(
        oob_period = %cli.oob_period,
        pool_check = %cli.pool_check,
        ip_based = cli.ip_based,
        tick_secs = cli.tick_secs,
        "starting TableGrid balancer harness"
    );

    let balancer = HostRegexBalancer::init(
        &site,
        Arc::new(DemoCatalog),
        Arc::new(DemoTabletClient),
        Arc::new(DemoRegistry(Arc::new(EvenSpreadBalancer))),
        Arc::new(IdentityResolver),
    )
    .await?;

    let current = demo_fleet(cli.servers);
    let migrations = HashSet::new();

    let mut assignments = HashMap::new();
    balancer
        .get_assignments(&current, &demo_unassigned(), &mut assignments)
        .await;
    for (extent, server) in &assignments {
        info!(extent = %extent, server = %server, "assigned");
    }

    loop {
        let mut proposals = Vec::new();
        let delay = balancer.balance(&current, &migrations, &mut proposals).await;
        for migration in &proposals {
            info!(migration = %migration, "proposed migration");
        }
        info!(
            proposals = proposals.len(),
            next_tick_hint_ms = delay.as_millis() as u64,
            "balance pass complete"
        );

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(cli.tick_secs)) => {},
            _ = signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    Ok(())
}
