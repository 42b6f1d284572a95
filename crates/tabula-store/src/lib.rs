//! Tabula Store - entity storage on a wide-column cluster
//!
//! Maps the row/column entity model onto the canonical three-column layout
//! and provides the only read, write, scan and atomic-mutation path into the
//! cluster. The cluster is reached through the [`session`] driver boundary;
//! [`local`] implements that boundary on an embedded `redb` database.

pub mod connection;
pub mod datastore;
pub mod layout;
pub mod local;
pub mod metadata;
pub mod mutation;
pub mod prime;
pub mod retry;
pub mod scan;
pub mod session;

#[cfg(test)]
mod testing;

pub use connection::{ClusterConnection, ConnectOptions};
pub use datastore::Datastore;
pub use layout::ColumnLayout;
pub use local::{LocalCluster, LocalConnector};
pub use metadata::{EXPECTED_DATA_VERSION, MetadataStore, PRIMED_KEY, VERSION_INFO_KEY};
pub use mutation::Mutator;
pub use retry::{RetryDecision, RetryPolicy, StatementClass};
pub use scan::{RangeScanner, ScanBound, ScanRequest, ScanResults};
pub use session::{ClusterConnector, ClusterSession};
