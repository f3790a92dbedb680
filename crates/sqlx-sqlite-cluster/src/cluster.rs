//! Named SQLite pools with pattern-based node selection

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use regex::Regex;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use tracing::{debug, trace};

use crate::config::{ClusterConfig, NodeAccess, NodeSpec};
use crate::error::{Error, Result};
use crate::lease::PooledConnection;

/// Name of the read-write node created by [`PoolCluster::connect`].
pub const PRIMARY_NODE: &str = "PRIMARY";

/// Name of the read-only node created by [`PoolCluster::connect`].
pub const REPLICA_NODE: &str = "REPLICA";

/// One named pool of the cluster.
#[derive(Debug)]
struct PoolNode {
   name: Arc<str>,
   pool: Pool<Sqlite>,
   path: PathBuf,
   access: NodeAccess,
}

/// A set of named SQLite connection pools.
///
/// ## Architecture
///
/// Each node owns its own SQLx pool. Connections are acquired through a
/// selector, a glob pattern over node names where `*` matches any run of
/// characters:
///
/// - `acquire(Some("PRIMARY"))` always leases from the `PRIMARY` node
/// - `acquire(Some("REPLICA*"))` rotates over every node whose name starts
///   with `REPLICA`
/// - `acquire(None)` rotates over every node
///
/// ## State Management
///
/// - **`next`**: Round-robin position shared by all selectors
/// - **`leases`**: Number of connections currently leased out
/// - **`closed`**: Prevents use after the cluster has been closed
/// - **`selectors`**: Compiled selector patterns, keyed by pattern text
#[derive(Debug)]
pub struct PoolCluster {
   nodes: Vec<PoolNode>,
   next: AtomicUsize,
   leases: Arc<AtomicUsize>,
   closed: AtomicBool,
   selectors: Mutex<HashMap<String, Regex>>,
}

impl PoolCluster {
   /// Open `path` with the default two-node layout.
   ///
   /// - `PRIMARY`: read-write, single connection, WAL journal
   /// - `REPLICA`: read-only, `max_read_connections` connections
   ///
   /// The database file is created if it does not exist.
   pub async fn connect(
      path: impl AsRef<Path>,
      config: Option<ClusterConfig>,
   ) -> Result<Arc<Self>> {
      let path = path.as_ref();

      if let Some(parent) = path.parent()
         && !parent.as_os_str().is_empty()
      {
         tokio::fs::create_dir_all(parent).await?;
      }

      Self::with_nodes(
         vec![
            NodeSpec::read_write(PRIMARY_NODE, path),
            NodeSpec::read_only(REPLICA_NODE, path),
         ],
         config,
      )
      .await
   }

   /// Open a cluster from explicit node specs.
   ///
   /// Read-write nodes are connected first so that read-only nodes pointing
   /// at the same file find it created and in WAL mode.
   pub async fn with_nodes(nodes: Vec<NodeSpec>, config: Option<ClusterConfig>) -> Result<Arc<Self>> {
      if nodes.is_empty() {
         return Err(Error::EmptyCluster);
      }

      let mut seen = HashSet::new();
      for spec in &nodes {
         if !seen.insert(spec.name.as_str()) {
            return Err(Error::DuplicateNode(spec.name.clone()));
         }
      }

      let config = config.unwrap_or_default();
      let mut ordered: Vec<&NodeSpec> = nodes.iter().collect();
      ordered.sort_by_key(|spec| spec.access == NodeAccess::ReadOnly);

      let mut opened = HashMap::with_capacity(nodes.len());
      for spec in ordered {
         let pool = open_pool(spec, &config).await?;
         debug!(node = %spec.name, path = %spec.path.display(), access = ?spec.access, "Pool node connected");
         opened.insert(spec.name.clone(), pool);
      }

      // Keep the caller's node order for round-robin selection
      let nodes = nodes
         .into_iter()
         .filter_map(|spec| {
            opened.remove(&spec.name).map(|pool| PoolNode {
               name: Arc::from(spec.name.as_str()),
               pool,
               path: spec.path,
               access: spec.access,
            })
         })
         .collect();

      Ok(Arc::new(Self {
         nodes,
         next: AtomicUsize::new(0),
         leases: Arc::new(AtomicUsize::new(0)),
         closed: AtomicBool::new(false),
         selectors: Mutex::new(HashMap::new()),
      }))
   }

   /// Lease a connection from a node matching `selector`.
   ///
   /// `None` selects among all nodes. Waiting for a free connection is bounded
   /// by the configured acquire timeout; the timeout surfaces as an SQLx
   /// pool error.
   pub async fn acquire(&self, selector: Option<&str>) -> Result<PooledConnection> {
      if self.closed.load(Ordering::SeqCst) {
         return Err(Error::ClusterClosed);
      }

      let node = self.select(selector)?;
      trace!(node = %node.name, selector = ?selector, "Acquiring connection");

      let conn = node.pool.acquire().await?;
      Ok(PooledConnection::new(conn, node.name.clone(), self.leases.clone()))
   }

   /// Number of connections currently leased out.
   pub fn outstanding_leases(&self) -> usize {
      self.leases.load(Ordering::SeqCst)
   }

   /// Node names in configuration order.
   pub fn node_names(&self) -> Vec<&str> {
      self.nodes.iter().map(|node| node.name.as_ref()).collect()
   }

   /// Access mode of a node, if it exists.
   pub fn node_access(&self, name: &str) -> Option<NodeAccess> {
      self
         .nodes
         .iter()
         .find(|node| node.name.as_ref() == name)
         .map(|node| node.access)
   }

   /// Whether [`close`](Self::close) has been called.
   pub fn is_closed(&self) -> bool {
      self.closed.load(Ordering::SeqCst)
   }

   /// Close every node pool, waiting for leased connections to come back.
   pub async fn close(&self) -> Result<()> {
      if self.closed.swap(true, Ordering::SeqCst) {
         return Ok(());
      }

      // Close read-only nodes first so the last connection to a file is the
      // writer, which checkpoints the WAL on close
      for node in self.nodes.iter().filter(|n| n.access == NodeAccess::ReadOnly) {
         node.pool.close().await;
      }
      for node in self.nodes.iter().filter(|n| n.access == NodeAccess::ReadWrite) {
         node.pool.close().await;
      }

      debug!(nodes = self.nodes.len(), "Pool cluster closed");
      Ok(())
   }

   /// Close the cluster and delete every database file it points at,
   /// including `-wal` and `-shm` companions.
   pub async fn remove(&self) -> Result<()> {
      self.close().await?;

      let paths: HashSet<&PathBuf> = self.nodes.iter().map(|node| &node.path).collect();
      for path in paths {
         for suffix in ["", "-wal", "-shm"] {
            let mut file = path.clone().into_os_string();
            file.push(suffix);
            match tokio::fs::remove_file(&file).await {
               Ok(()) => {}
               Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
               Err(e) => return Err(e.into()),
            }
         }
      }

      Ok(())
   }

   fn select(&self, selector: Option<&str>) -> Result<&PoolNode> {
      let candidates: Vec<&PoolNode> = match selector {
         None => self.nodes.iter().collect(),
         Some(pattern) => {
            let matcher = self.matcher(pattern)?;
            self
               .nodes
               .iter()
               .filter(|node| matcher.is_match(&node.name))
               .collect()
         }
      };

      if candidates.is_empty() {
         return Err(Error::NoMatchingNode {
            pattern: selector.unwrap_or("*").to_string(),
         });
      }

      let position = self.next.fetch_add(1, Ordering::Relaxed);
      Ok(candidates[position % candidates.len()])
   }

   fn matcher(&self, pattern: &str) -> Result<Regex> {
      let mut selectors = self.selectors.lock();
      if let Some(regex) = selectors.get(pattern) {
         return Ok(regex.clone());
      }

      let regex = compile_selector(pattern)?;
      selectors.insert(pattern.to_string(), regex.clone());
      Ok(regex)
   }
}

/// Compile a glob selector (`*` wildcard only) into an anchored regex.
fn compile_selector(pattern: &str) -> Result<Regex> {
   let body = regex::escape(pattern).replace(r"\*", ".*");
   Regex::new(&format!("^{body}$")).map_err(|e| Error::InvalidPattern {
      pattern: pattern.to_string(),
      reason: e.to_string(),
   })
}

async fn open_pool(spec: &NodeSpec, config: &ClusterConfig) -> Result<Pool<Sqlite>> {
   let mut options = SqliteConnectOptions::new().filename(&spec.path);

   options = match spec.access {
      NodeAccess::ReadWrite => options
         .create_if_missing(true)
         .journal_mode(SqliteJournalMode::Wal),
      NodeAccess::ReadOnly => options.read_only(true),
   };

   let pool = SqlitePoolOptions::new()
      .max_connections(spec.pool_size(config))
      .idle_timeout(config.idle_timeout)
      .acquire_timeout(config.acquire_timeout)
      .connect_with(options)
      .await?;

   Ok(pool)
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn selector_wildcard_matches_prefix() {
      let regex = compile_selector("REPLICA*").unwrap();

      assert!(regex.is_match("REPLICA"));
      assert!(regex.is_match("REPLICA2"));
      assert!(!regex.is_match("PRIMARY"));
   }

   #[test]
   fn selector_without_wildcard_is_exact() {
      let regex = compile_selector("PRIMARY").unwrap();

      assert!(regex.is_match("PRIMARY"));
      assert!(!regex.is_match("PRIMARY2"));
   }

   #[test]
   fn selector_escapes_regex_metacharacters() {
      let regex = compile_selector("node.(1)").unwrap();

      assert!(regex.is_match("node.(1)"));
      assert!(!regex.is_match("nodeX(1)"));
   }
}
