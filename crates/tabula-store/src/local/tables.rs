//! Redb table definitions for the embedded backend.

use redb::TableDefinition;
use tabula_common::TableName;

/// Logical tables that have been created, with their creation time (ms)
pub const CATALOG: TableDefinition<&str, u64> = TableDefinition::new("catalog");

/// Keyspaces and their requested replication factor
pub const KEYSPACES: TableDefinition<&str, u32> = TableDefinition::new("keyspaces");

/// Cells of one logical table, keyed by [`super::codec::cell_key`]
pub type CellTable<'a> = TableDefinition<'a, &'static [u8], &'static [u8]>;

// Logical names are restricted to [A-Za-z0-9_], so the prefix cannot
// collide with the bookkeeping tables above.
#[must_use]
pub fn physical_name(table: &TableName) -> String {
    format!("cells.{table}")
}

#[must_use]
pub fn logical_name(physical: &str) -> &str {
    physical.strip_prefix("cells.").unwrap_or(physical)
}

#[must_use]
pub fn cells(physical: &str) -> CellTable<'_> {
    TableDefinition::new(physical)
}
