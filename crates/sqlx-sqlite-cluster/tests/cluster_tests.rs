//! Integration tests for node selection, lease accounting, and lifecycle.

use std::time::Duration;

use sqlx_sqlite_cluster::{
   ClusterConfig, Error, NodeAccess, NodeSpec, PRIMARY_NODE, PoolCluster, REPLICA_NODE,
};
use tempfile::TempDir;

async fn setup_cluster() -> (std::sync::Arc<PoolCluster>, TempDir) {
   let temp_dir = TempDir::new().unwrap();
   let cluster = PoolCluster::connect(temp_dir.path().join("test.db"), None)
      .await
      .unwrap();

   (cluster, temp_dir)
}

// ============================================================================
// Default Layout
// ============================================================================

#[tokio::test]
async fn test_connect_creates_primary_and_replica() {
   let (cluster, _temp) = setup_cluster().await;

   assert_eq!(cluster.node_names(), vec![PRIMARY_NODE, REPLICA_NODE]);
   assert_eq!(cluster.node_access(PRIMARY_NODE), Some(NodeAccess::ReadWrite));
   assert_eq!(cluster.node_access(REPLICA_NODE), Some(NodeAccess::ReadOnly));
   assert_eq!(cluster.node_access("MISSING"), None);

   cluster.remove().await.unwrap();
}

#[tokio::test]
async fn test_replica_rejects_writes_and_sees_primary_commits() {
   let (cluster, _temp) = setup_cluster().await;

   let mut writer = cluster.acquire(Some(PRIMARY_NODE)).await.unwrap();
   sqlx::query("CREATE TABLE t (id INTEGER PRIMARY KEY)")
      .execute(&mut *writer)
      .await
      .unwrap();
   sqlx::query("INSERT INTO t (id) VALUES (1)")
      .execute(&mut *writer)
      .await
      .unwrap();
   writer.release();

   let mut reader = cluster.acquire(Some(REPLICA_NODE)).await.unwrap();
   let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM t")
      .fetch_one(&mut *reader)
      .await
      .unwrap();
   assert_eq!(count, 1);

   let write_attempt = sqlx::query("INSERT INTO t (id) VALUES (2)")
      .execute(&mut *reader)
      .await;
   assert!(write_attempt.is_err());
   reader.release();

   cluster.remove().await.unwrap();
}

// ============================================================================
// Selection
// ============================================================================

#[tokio::test]
async fn test_selector_routes_to_named_node() {
   let (cluster, _temp) = setup_cluster().await;

   let writer = cluster.acquire(Some("PRIMARY")).await.unwrap();
   assert_eq!(writer.node(), PRIMARY_NODE);
   drop(writer);

   let reader = cluster.acquire(Some("REPLICA*")).await.unwrap();
   assert_eq!(reader.node(), REPLICA_NODE);
   drop(reader);

   cluster.remove().await.unwrap();
}

#[tokio::test]
async fn test_wildcard_selector_rotates_over_matching_nodes() {
   let temp_dir = TempDir::new().unwrap();
   let path = temp_dir.path().join("test.db");
   let cluster = PoolCluster::with_nodes(
      vec![
         NodeSpec::read_write("PRIMARY", &path),
         NodeSpec::read_only("REPLICA1", &path),
         NodeSpec::read_only("REPLICA2", &path),
      ],
      None,
   )
   .await
   .unwrap();

   let mut seen = Vec::new();
   for _ in 0..4 {
      let conn = cluster.acquire(Some("REPLICA*")).await.unwrap();
      seen.push(conn.node().to_string());
   }

   assert!(seen.iter().all(|name| name.starts_with("REPLICA")));
   assert!(seen.contains(&"REPLICA1".to_string()));
   assert!(seen.contains(&"REPLICA2".to_string()));

   cluster.remove().await.unwrap();
}

#[tokio::test]
async fn test_unmatched_selector_is_an_error() {
   let (cluster, _temp) = setup_cluster().await;

   let err = cluster.acquire(Some("SLAVE*")).await.unwrap_err();

   assert!(matches!(err, Error::NoMatchingNode { ref pattern } if pattern == "SLAVE*"));
   assert_eq!(cluster.outstanding_leases(), 0);

   cluster.remove().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_and_empty_node_lists_are_rejected() {
   let temp_dir = TempDir::new().unwrap();
   let path = temp_dir.path().join("test.db");

   let empty = PoolCluster::with_nodes(vec![], None).await;
   assert!(matches!(empty, Err(Error::EmptyCluster)));

   let duplicate = PoolCluster::with_nodes(
      vec![
         NodeSpec::read_write("A", &path),
         NodeSpec::read_only("A", &path),
      ],
      None,
   )
   .await;
   assert!(matches!(duplicate, Err(Error::DuplicateNode(ref name)) if name == "A"));
}

// ============================================================================
// Lease Accounting
// ============================================================================

#[tokio::test]
async fn test_leases_are_counted_until_release_or_drop() {
   let (cluster, _temp) = setup_cluster().await;

   let first = cluster.acquire(Some(REPLICA_NODE)).await.unwrap();
   let second = cluster.acquire(Some(REPLICA_NODE)).await.unwrap();
   assert_eq!(cluster.outstanding_leases(), 2);

   first.release();
   assert_eq!(cluster.outstanding_leases(), 1);

   drop(second);
   assert_eq!(cluster.outstanding_leases(), 0);

   cluster.remove().await.unwrap();
}

#[tokio::test]
async fn test_single_writer_times_out_while_leased() {
   let temp_dir = TempDir::new().unwrap();
   let config = ClusterConfig {
      acquire_timeout: Duration::from_millis(200),
      ..Default::default()
   };
   let cluster = PoolCluster::connect(temp_dir.path().join("test.db"), Some(config))
      .await
      .unwrap();

   let held = cluster.acquire(Some(PRIMARY_NODE)).await.unwrap();
   let err = cluster.acquire(Some(PRIMARY_NODE)).await.unwrap_err();
   assert!(matches!(err, Error::Sqlx(sqlx::Error::PoolTimedOut)));

   held.release();
   let again = cluster.acquire(Some(PRIMARY_NODE)).await.unwrap();
   again.release();

   cluster.remove().await.unwrap();
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_closed_cluster_rejects_acquisition() {
   let (cluster, _temp) = setup_cluster().await;

   cluster.close().await.unwrap();
   assert!(cluster.is_closed());

   let err = cluster.acquire(None).await.unwrap_err();
   assert!(matches!(err, Error::ClusterClosed));
}

#[tokio::test]
async fn test_remove_deletes_database_files() {
   let temp_dir = TempDir::new().unwrap();
   let path = temp_dir.path().join("nested").join("test.db");
   let cluster = PoolCluster::connect(&path, None).await.unwrap();
   assert!(path.exists());

   cluster.remove().await.unwrap();

   assert!(!path.exists());
   assert!(!temp_dir.path().join("nested").join("test.db-wal").exists());
}
