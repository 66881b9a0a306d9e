//! TableGrid Host-Regex Balancer Library
//!
//! This crate provides the master-side tablet balancer for TableGrid.
//!
//! Operators partition the tablet-server fleet into named pools by applying
//! regular expressions to server host names (or IP addresses), and pin each
//! table to the pool named after it. On every master tick the balancer:
//! - Regroups the live servers into pools (cached, time-bounded)
//! - Detects tablets hosted outside their table's pool and proposes migrations
//! - Delegates per-table assignment and balancing to an inner per-table
//!   balancer restricted to the table's pool

pub mod balancer;
pub mod catalog;
pub mod config;
pub mod oob;
pub mod pools;
pub mod resolver;
pub mod types;

// Re-export main types
pub use balancer::{BalancerError, BalancerRegistry, HostRegexBalancer, TabletBalancer, MIN_BALANCE_DELAY};
pub use catalog::TableCatalog;
pub use config::{BalancerSettings, ConfigError};
pub use oob::{OobScanner, TabletClient};
pub use pools::{PoolGrouper, DEFAULT_POOL};
pub use resolver::{DnsResolver, HostResolver, ResolveError};
pub use types::{
    Migration, PoolMap, PoolName, ServerId, ServerMap, ServerStatus, TableId, TableName,
    TabletExtent, TabletStat,
};
