//! Configuration for database wrappers

use serde::Deserialize;
use sqlx_sqlite_cluster::{ClusterConfig, PRIMARY_NODE};

/// Maps read/write intent onto node selectors of a pool cluster.
///
/// Selectors are glob patterns over node names; `*` matches any run of
/// characters and several matching nodes are used round-robin.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationTopology {
   /// Selector for statements that modify data
   ///
   /// Default: `PRIMARY`
   pub write: String,

   /// Selector for SELECT statements
   ///
   /// Default: `REPLICA*`
   pub read: String,
}

impl Default for ReplicationTopology {
   fn default() -> Self {
      Self {
         write: PRIMARY_NODE.to_string(),
         read: "REPLICA*".to_string(),
      }
   }
}

/// Settings for a [`DatabaseWrapper`](crate::DatabaseWrapper).
///
/// # Examples
///
/// ```
/// use sqlwrap::{ReplicationTopology, WrapperConfig};
///
/// // Route reads to every replica, writes to the primary
/// let config = WrapperConfig::default();
///
/// // Send everything to one node
/// let config = WrapperConfig {
///    replication: Some(ReplicationTopology {
///       write: "PRIMARY".into(),
///       read: "PRIMARY".into(),
///    }),
///    ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WrapperConfig {
   /// Read/write routing
   ///
   /// `None` acquires from any node of the cluster, which only suits
   /// clusters whose nodes can all write.
   ///
   /// Default: `PRIMARY` for writes, `REPLICA*` for reads
   pub replication: Option<ReplicationTopology>,

   /// Rows buffered between a streaming query and its consumer
   ///
   /// Default: 64
   pub stream_capacity: usize,

   /// Pool settings used when the wrapper opens its own cluster
   pub pool: ClusterConfig,
}

impl Default for WrapperConfig {
   fn default() -> Self {
      Self {
         replication: Some(ReplicationTopology::default()),
         stream_capacity: 64,
         pool: ClusterConfig::default(),
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn default_topology_routes_to_primary_and_replicas() {
      let config = WrapperConfig::default();
      let topology = config.replication.unwrap();

      assert_eq!(topology.write, "PRIMARY");
      assert_eq!(topology.read, "REPLICA*");
   }

   #[test]
   fn missing_fields_fall_back_to_defaults() {
      let config: WrapperConfig = serde_json::from_str(r#"{"streamCapacity":8}"#).unwrap();

      assert_eq!(config.stream_capacity, 8);
      assert_eq!(config.replication, Some(ReplicationTopology::default()));
   }

   #[test]
   fn explicit_null_replication_disables_routing() {
      let config: WrapperConfig = serde_json::from_str(r#"{"replication":null}"#).unwrap();

      assert_eq!(config.replication, None);
   }
}
