//! First-time preparation of a keyspace.

use crate::connection::ClusterConnection;
use crate::metadata::{MetadataStore, PRIMED_KEY, VERSION_INFO_KEY, expected_version_text};
use crate::session::{RangeSelect, ScanBound, Statement};
use tabula_common::{Error, Result, TableName};
use tracing::info;

/// Table whose contents decide whether a deployment already holds data
pub const ENTITY_TABLE: &str = "ENTITIES__";

/// Tables every primed deployment starts with
pub const INITIAL_TABLES: &[&str] = &[
    "ASC_PROPERTY__",
    "DSC_PROPERTY__",
    "APP_IDS__",
    ENTITY_TABLE,
    "KINDS__",
    "COMPOSITE_INDEXES__",
    "JOURNAL__",
    "METADATA__",
];

/// Create the keyspace and initial tables, then mark the deployment primed
///
/// Safe to re-run. The data-layout version is only recorded while the
/// entity table is empty, so priming never claims a layout for data written
/// by an older release.
pub async fn prime(
    conn: &ClusterConnection,
    metadata: &MetadataStore,
    keyspace: &str,
    replication_factor: u32,
) -> Result<()> {
    if replication_factor == 0 {
        return Err(Error::argument("replication factor must be at least 1"));
    }
    if keyspace.is_empty() {
        return Err(Error::argument("keyspace name cannot be empty"));
    }

    info!(
        "Creating keyspace {} with replication factor {}",
        keyspace, replication_factor
    );
    conn.execute(
        "prime",
        &Statement::CreateKeyspace {
            keyspace: keyspace.to_string(),
            replication_factor,
        },
    )
    .await?;

    for name in INITIAL_TABLES {
        let table = TableName::new(*name)?;
        info!("Trying to create {}", table);
        conn.execute("prime", &Statement::CreateTable { table }).await?;
    }
    info!("Trying to create {}", metadata.table());
    metadata.ensure_exists().await?;

    if entity_table_is_empty(conn).await? {
        let version = expected_version_text();
        info!("Setting data layout version to {}", version);
        metadata.set(VERSION_INFO_KEY, &version).await?;
    } else {
        info!("Existing entities found, leaving the data layout version unchanged");
    }

    metadata.set(PRIMED_KEY, "true").await?;
    info!("Keyspace {} is primed", keyspace);
    Ok(())
}

async fn entity_table_is_empty(conn: &ClusterConnection) -> Result<bool> {
    let first_cell = Statement::SelectRange(RangeSelect {
        table: TableName::new(ENTITY_TABLE)?,
        columns: None,
        start: ScanBound::MIN,
        end: ScanBound::MAX,
        start_inclusive: true,
        end_inclusive: true,
        limit: Some(1),
    });
    Ok(conn.execute("prime", &first_cell).await?.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalCluster;
    use crate::testing;
    use bytes::Bytes;
    use std::sync::Arc;

    async fn setup(cluster: &LocalCluster) -> (Arc<ClusterConnection>, MetadataStore) {
        let conn = Arc::new(testing::connection(cluster).await);
        let metadata = MetadataStore::new(conn.clone()).unwrap();
        (conn, metadata)
    }

    #[tokio::test]
    async fn test_prime_fresh_deployment() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = testing::cluster(&dir);
        let (conn, metadata) = setup(&cluster).await;
        assert!(!metadata.is_primed().await.unwrap());

        prime(&conn, &metadata, "Keyspace1", 1).await.unwrap();
        for name in INITIAL_TABLES {
            assert!(cluster.table_exists(&TableName::new(*name).unwrap()).unwrap());
        }
        assert_eq!(cluster.keyspace_replication("Keyspace1").unwrap(), Some(1));
        assert!(metadata.is_primed().await.unwrap());
        assert!(metadata.is_valid_version().await.unwrap());

        // Idempotent
        prime(&conn, &metadata, "Keyspace1", 1).await.unwrap();
        assert!(metadata.is_primed().await.unwrap());
    }

    #[tokio::test]
    async fn test_prime_keeps_version_of_existing_data() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = testing::cluster(&dir);
        let (conn, metadata) = setup(&cluster).await;

        let entities = testing::create_table(&conn, ENTITY_TABLE).await;
        conn.execute(
            "put",
            &Statement::InsertCell {
                table: entities,
                key: Bytes::from("app\x00kind:1"),
                column: "entity".to_string(),
                value: Bytes::from("payload"),
                ttl: None,
            },
        )
        .await
        .unwrap();

        prime(&conn, &metadata, "Keyspace1", 1).await.unwrap();
        assert!(metadata.is_primed().await.unwrap());
        assert_eq!(metadata.get(VERSION_INFO_KEY).await.unwrap(), None);
        assert!(!metadata.is_valid_version().await.unwrap());
    }

    #[tokio::test]
    async fn test_prime_rejects_zero_replication() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = testing::cluster(&dir);
        let (conn, metadata) = setup(&cluster).await;

        let err = prime(&conn, &metadata, "Keyspace1", 0).await.unwrap_err();
        assert!(err.is_argument());
        assert_eq!(cluster.keyspace_replication("Keyspace1").unwrap(), None);
    }
}
