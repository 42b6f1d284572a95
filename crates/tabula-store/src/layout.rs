//! Canonical physical schema shared by every logical table.
//!
//! Whatever a logical table stores, it is materialised as the same three
//! columns: `key` (blob), `column` (text) and `value` (blob), with primary
//! key `(key, column)`. This module renders the statement text for that
//! layout; identifiers are always double-quoted.

use crate::session::ScanBound;
use tabula_common::TableName;

/// The three-column layout used for every table
pub struct ColumnLayout;

impl ColumnLayout {
    /// Partition key column (blob)
    pub const KEY: &'static str = "key";
    /// Clustering column holding the logical column name (text)
    pub const COLUMN: &'static str = "column";
    /// Cell payload (blob)
    pub const VALUE: &'static str = "value";

    /// `CREATE TABLE IF NOT EXISTS` for the canonical layout
    #[must_use]
    pub fn create_table(table: &TableName) -> String {
        format!(
            r#"CREATE TABLE IF NOT EXISTS "{table}" ("{k}" blob, "{c}" text, "{v}" blob, PRIMARY KEY ("{k}", "{c}"))"#,
            k = Self::KEY,
            c = Self::COLUMN,
            v = Self::VALUE,
        )
    }

    #[must_use]
    pub fn drop_table(table: &TableName) -> String {
        format!(r#"DROP TABLE IF EXISTS "{table}""#)
    }

    #[must_use]
    pub fn create_keyspace(keyspace: &str, replication_factor: u32) -> String {
        format!(
            r#"CREATE KEYSPACE IF NOT EXISTS "{keyspace}" WITH REPLICATION = {{'class': 'SimpleStrategy', 'replication_factor': {replication_factor}}}"#
        )
    }

    /// Cell insert; the TTL is bound per execution (0 disables expiry)
    #[must_use]
    pub fn insert(table: &TableName) -> String {
        format!(
            r#"INSERT INTO "{table}" ("{k}", "{c}", "{v}") VALUES (?, ?, ?) USING TTL ?"#,
            k = Self::KEY,
            c = Self::COLUMN,
            v = Self::VALUE,
        )
    }

    /// Unprepared single-cell insert with an inline TTL
    #[must_use]
    pub fn insert_cell(table: &TableName, ttl: Option<u32>) -> String {
        let ttl = ttl.map(|t| format!(" USING TTL {t}")).unwrap_or_default();
        format!(
            r#"INSERT INTO "{table}" ("{k}", "{c}", "{v}") VALUES (?, ?, ?){ttl}"#,
            k = Self::KEY,
            c = Self::COLUMN,
            v = Self::VALUE,
        )
    }

    /// Whole-row delete of a single key
    #[must_use]
    pub fn delete_row(table: &TableName) -> String {
        format!(r#"DELETE FROM "{table}" WHERE "{k}" = ?"#, k = Self::KEY)
    }

    /// Whole-row delete of a key set
    #[must_use]
    pub fn delete_rows(table: &TableName) -> String {
        format!(r#"DELETE FROM "{table}" WHERE "{k}" IN ?"#, k = Self::KEY)
    }

    #[must_use]
    pub fn select_cells(table: &TableName) -> String {
        format!(
            r#"SELECT "{k}", "{c}", "{v}" FROM "{table}" WHERE "{k}" IN ? AND "{c}" IN ?"#,
            k = Self::KEY,
            c = Self::COLUMN,
            v = Self::VALUE,
        )
    }

    #[must_use]
    pub fn select_cell(table: &TableName) -> String {
        format!(
            r#"SELECT "{k}", "{c}", "{v}" FROM "{table}" WHERE "{k}" = ? AND "{c}" = ?"#,
            k = Self::KEY,
            c = Self::COLUMN,
            v = Self::VALUE,
        )
    }

    /// Token-bounded range read
    ///
    /// Without a column restriction every column is returned and no
    /// filtering clause is needed.
    #[must_use]
    pub fn select_range(
        table: &TableName,
        start: &ScanBound,
        end: &ScanBound,
        start_inclusive: bool,
        end_inclusive: bool,
        restrict_columns: bool,
        limit: Option<usize>,
    ) -> String {
        let gt = if start_inclusive { ">=" } else { ">" };
        let lt = if end_inclusive { "<=" } else { "<" };
        let mut cql = format!(
            r#"SELECT "{k}", "{c}", "{v}" FROM "{table}" WHERE token("{k}") {gt} {start} AND token("{k}") {lt} {end}"#,
            k = Self::KEY,
            c = Self::COLUMN,
            v = Self::VALUE,
            start = bound_marker(start),
            end = bound_marker(end),
        );
        if restrict_columns {
            cql.push_str(&format!(r#" AND "{}" IN ?"#, Self::COLUMN));
        }
        if let Some(limit) = limit {
            cql.push_str(&format!(" LIMIT {limit}"));
        }
        if restrict_columns {
            cql.push_str(" ALLOW FILTERING");
        }
        cql
    }
}

const fn bound_marker(bound: &ScanBound) -> &'static str {
    match bound {
        ScanBound::Key(_) => "token(?)",
        ScanBound::Token(_) => "?",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn table() -> TableName {
        TableName::new("ENTITIES__").unwrap()
    }

    #[test]
    fn test_create_and_drop_are_idempotent_forms() {
        let create = ColumnLayout::create_table(&table());
        assert!(create.starts_with(r#"CREATE TABLE IF NOT EXISTS "ENTITIES__""#));
        assert!(create.contains(r#"PRIMARY KEY ("key", "column")"#));
        assert_eq!(
            ColumnLayout::drop_table(&table()),
            r#"DROP TABLE IF EXISTS "ENTITIES__""#
        );
    }

    #[test]
    fn test_insert_binds_ttl() {
        assert!(ColumnLayout::insert(&table()).ends_with("USING TTL ?"));
        assert!(!ColumnLayout::insert_cell(&table(), None).contains("TTL"));
        assert!(ColumnLayout::insert_cell(&table(), Some(30)).ends_with("USING TTL 30"));
    }

    #[test]
    fn test_select_range_operators() {
        let cql = ColumnLayout::select_range(
            &table(),
            &ScanBound::Key(Bytes::from("a")),
            &ScanBound::MAX,
            false,
            true,
            true,
            Some(20),
        );
        assert_eq!(
            cql,
            r#"SELECT "key", "column", "value" FROM "ENTITIES__" WHERE token("key") > token(?) AND token("key") <= ? AND "column" IN ? LIMIT 20 ALLOW FILTERING"#
        );
    }

    #[test]
    fn test_select_range_all_columns_unlimited() {
        let cql = ColumnLayout::select_range(
            &table(),
            &ScanBound::MIN,
            &ScanBound::MAX,
            true,
            false,
            false,
            None,
        );
        assert!(cql.contains(r#"token("key") >= ? AND token("key") < ?"#));
        assert!(!cql.contains("LIMIT"));
        assert!(!cql.contains("ALLOW FILTERING"));
    }
}
