//! Table catalog adapter
//!
//! Narrow view of the table-metadata service the balancer runs against. The
//! master supplies a concrete implementation; tests supply static ones.

use std::collections::HashMap;

use crate::types::{TableId, TableName};

pub type CatalogResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Read-only access to table metadata.
///
/// Failure to reach the catalog at init is fatal; during balancing it degrades
/// the pass to the floor delay.
#[async_trait::async_trait]
pub trait TableCatalog: Send + Sync {
    /// Current mapping of table name to table id.
    async fn table_id_map(&self) -> CatalogResult<HashMap<TableName, TableId>>;

    /// Custom properties of one table whose keys start with `prefix`. Keys are
    /// returned in full, prefix included.
    async fn properties_with_prefix(
        &self,
        table: &str,
        prefix: &str,
    ) -> CatalogResult<HashMap<String, String>>;
}
