//! Core data model shared by the balancer components.
//!
//! Servers, tablet extents and migration proposals are supplied by (and
//! returned to) the master each tick; nothing in here is persisted.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use bytes::Bytes;

/// Stable table identifier assigned by the catalog.
pub type TableId = String;

/// User-facing table name.
pub type TableName = String;

/// Name of a server pool. Equals a table name when that table has a host
/// regex configured, otherwise the reserved default-pool sentinel.
pub type PoolName = String;

/// Logical identity of a tablet server.
///
/// Ordered by `(host, port)`; every ordered view derived from a caller-supplied
/// server map inherits this ordering, so the inner balancer always sees a
/// consistently sorted server set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServerId {
    pub host: String,
    pub port: u16,
}

impl ServerId {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Host string reported by the server (name or IP).
    pub fn host(&self) -> &str {
        &self.host
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Liveness/load snapshot of one tablet server, opaque to the balancer core.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerStatus {
    /// Milliseconds since the master last heard from the server.
    pub last_contact_ms: u64,
    /// Number of tablets currently hosted.
    pub hosted_tablets: usize,
}

/// Identity of one tablet: a table plus a contiguous key range.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TabletExtent {
    pub table_id: TableId,
    /// Exclusive upper row bound; `None` for the last tablet of the table.
    pub end_row: Option<Bytes>,
    /// End row of the preceding tablet; `None` for the first tablet.
    pub prev_end_row: Option<Bytes>,
}

impl TabletExtent {
    pub fn new(table_id: impl Into<TableId>, end_row: Option<Bytes>, prev_end_row: Option<Bytes>) -> Self {
        Self {
            table_id: table_id.into(),
            end_row,
            prev_end_row,
        }
    }

    pub fn table_id(&self) -> &str {
        &self.table_id
    }
}

impl fmt::Display for TabletExtent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn row(r: &Option<Bytes>) -> std::borrow::Cow<'_, str> {
            match r {
                Some(b) => String::from_utf8_lossy(b),
                None => std::borrow::Cow::Borrowed("<"),
            }
        }
        write!(
            f,
            "{};{};{}",
            self.table_id,
            row(&self.end_row),
            row(&self.prev_end_row)
        )
    }
}

/// Per-tablet status reported by one server during the out-of-bounds scan.
#[derive(Debug, Clone)]
pub struct TabletStat {
    pub extent: TabletExtent,
    pub num_entries: u64,
}

impl TabletStat {
    pub fn new(extent: TabletExtent) -> Self {
        Self {
            extent,
            num_entries: 0,
        }
    }
}

/// A proposed tablet move. The balancer only proposes; an external
/// orchestrator enacts the migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub extent: TabletExtent,
    pub from: ServerId,
    pub to: ServerId,
}

impl fmt::Display for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} -> {}", self.extent, self.from, self.to)
    }
}

/// Ordered view of live servers, as supplied by the master.
pub type ServerMap = BTreeMap<ServerId, ServerStatus>;

/// Live servers grouped by pool name. Each sub-map preserves the ordering of
/// the input server map.
pub type PoolMap = HashMap<PoolName, ServerMap>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_id_ordering() {
        let a = ServerId::new("host1.example.com", 9997);
        let b = ServerId::new("host2.example.com", 9997);
        let c = ServerId::new("host2.example.com", 9998);
        assert!(a < b);
        assert!(b < c);

        let mut map = ServerMap::new();
        map.insert(c.clone(), ServerStatus::default());
        map.insert(a.clone(), ServerStatus::default());
        map.insert(b.clone(), ServerStatus::default());
        let keys: Vec<_> = map.keys().cloned().collect();
        assert_eq!(keys, vec![a, b, c]);
    }

    #[test]
    fn test_server_id_display() {
        let id = ServerId::new("tserver1.example.com", 9997);
        assert_eq!(id.to_string(), "tserver1.example.com:9997");
    }

    #[test]
    fn test_extent_display() {
        let e = TabletExtent::new("2", Some(Bytes::from_static(b"m")), None);
        assert_eq!(e.to_string(), "2;m;<");

        let whole = TabletExtent::new("2", None, None);
        assert_eq!(whole.to_string(), "2;<;<");
    }

    #[test]
    fn test_extent_identity() {
        let a = TabletExtent::new("1", Some(Bytes::from_static(b"m")), None);
        let b = TabletExtent::new("1", Some(Bytes::from_static(b"m")), None);
        let c = TabletExtent::new("1", Some(Bytes::from_static(b"n")), None);
        assert_eq!(a, b);
        assert_ne!(a, c);

        let mut set = std::collections::HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
        assert!(!set.contains(&c));
    }
}
