//! Configuration for SQLite pool clusters

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Pool settings shared by every node of a [`PoolCluster`](crate::PoolCluster)
///
/// # Examples
///
/// ```
/// use sqlx_sqlite_cluster::ClusterConfig;
/// use std::time::Duration;
///
/// // Use defaults
/// let config = ClusterConfig::default();
///
/// // Override specific fields
/// let config = ClusterConfig {
///     max_read_connections: 3,
///     acquire_timeout: Duration::from_secs(5),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClusterConfig {
   /// Maximum number of connections for read-only nodes
   ///
   /// Read-write nodes always hold a single connection since SQLite serializes
   /// writers anyway.
   ///
   /// Default: 6
   pub max_read_connections: u32,

   /// Idle timeout for pooled connections
   ///
   /// Default: 30 seconds
   pub idle_timeout: Duration,

   /// How long an acquisition waits for a free connection before failing
   ///
   /// Default: 30 seconds
   pub acquire_timeout: Duration,
}

impl Default for ClusterConfig {
   fn default() -> Self {
      Self {
         max_read_connections: 6,
         idle_timeout: Duration::from_secs(30),
         acquire_timeout: Duration::from_secs(30),
      }
   }
}

/// Whether a node may write to its database file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeAccess {
   /// Read-write connections; the file is created if missing and switched to WAL
   ReadWrite,
   /// Read-only connections
   ReadOnly,
}

/// One named node of a cluster.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
   /// Node name used by selectors (e.g. `PRIMARY`, `REPLICA1`)
   pub name: String,
   /// Database file the node's pool connects to
   pub path: PathBuf,
   /// Access mode of the node's connections
   pub access: NodeAccess,
   /// Pool size override; falls back to the cluster config when `None`
   #[serde(default)]
   pub max_connections: Option<u32>,
}

impl NodeSpec {
   /// Create a read-write node spec.
   pub fn read_write(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
      Self {
         name: name.into(),
         path: path.into(),
         access: NodeAccess::ReadWrite,
         max_connections: None,
      }
   }

   /// Create a read-only node spec.
   pub fn read_only(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
      Self {
         name: name.into(),
         path: path.into(),
         access: NodeAccess::ReadOnly,
         max_connections: None,
      }
   }

   /// Set the pool size for this node.
   pub fn max_connections(mut self, max: u32) -> Self {
      self.max_connections = Some(max);
      self
   }

   pub(crate) fn pool_size(&self, config: &ClusterConfig) -> u32 {
      match (self.max_connections, self.access) {
         (Some(max), _) => max.max(1),
         (None, NodeAccess::ReadWrite) => 1,
         (None, NodeAccess::ReadOnly) => config.max_read_connections.max(1),
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn read_write_nodes_default_to_one_connection() {
      let config = ClusterConfig::default();
      let node = NodeSpec::read_write("PRIMARY", "db.sqlite");

      assert_eq!(node.pool_size(&config), 1);
   }

   #[test]
   fn read_only_nodes_use_configured_pool_size() {
      let config = ClusterConfig {
         max_read_connections: 4,
         ..Default::default()
      };

      assert_eq!(NodeSpec::read_only("REPLICA", "db.sqlite").pool_size(&config), 4);
      assert_eq!(
         NodeSpec::read_only("REPLICA", "db.sqlite")
            .max_connections(2)
            .pool_size(&config),
         2
      );
   }

   #[test]
   fn node_spec_deserializes_from_camel_case() {
      let node: NodeSpec = serde_json::from_str(
         r#"{"name":"REPLICA1","path":"/tmp/a.db","access":"readOnly","maxConnections":3}"#,
      )
      .unwrap();

      assert_eq!(node.name, "REPLICA1");
      assert_eq!(node.access, NodeAccess::ReadOnly);
      assert_eq!(node.max_connections, Some(3));
   }
}
