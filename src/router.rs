//! Resolving read/write intent to a leased connection.
//!
//! Two routers implement [`Acquire`]:
//!
//! - [`PoolRouter`] leases a fresh connection per statement, picking the
//!   node group from the replication topology
//! - [`PinnedConnection`] hands out the same connection on every call and
//!   ignores intent; it backs [`Session`](crate::Session)

use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use regex::Regex;
use sqlx::sqlite::SqliteConnection;
use sqlx_sqlite_cluster::{PoolCluster, PooledConnection};
use tokio::runtime::Handle;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{trace, warn};

use crate::Result;
use crate::config::ReplicationTopology;

/// Whether a statement reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
   Read,
   Write,
}

/// Classify a statement by its leading keyword.
///
/// A statement reads iff its trimmed text starts with `SELECT`
/// (case-insensitive). CTEs (`WITH … SELECT`) and other read-only forms are
/// classified as writes and routed to the write group.
pub fn classify(sql: &str) -> Intent {
   static RE: OnceLock<Regex> = OnceLock::new();
   let re = RE.get_or_init(|| Regex::new(r"(?i)^SELECT\b").expect("invalid regex"));

   if re.is_match(sql.trim_start()) {
      Intent::Read
   } else {
      Intent::Write
   }
}

/// A connection leased for one statement or one stream.
///
/// Dereferences to the underlying SQLite connection.
#[must_use = "if unused, the connection is immediately released"]
#[derive(Debug)]
pub enum Lease {
   /// Taken from a pool node; goes back to the pool on release
   Pooled(PooledConnection),
   /// Borrowed from a pinned session; stays pinned on release
   Pinned(OwnedMutexGuard<PooledConnection>),
}

impl Lease {
   /// Whether this lease borrows a session's pinned connection.
   pub fn is_pinned(&self) -> bool {
      matches!(self, Lease::Pinned(_))
   }

   /// Name of the pool node the connection belongs to.
   pub fn node(&self) -> &str {
      match self {
         Lease::Pooled(conn) => conn.node(),
         Lease::Pinned(guard) => guard.node(),
      }
   }

   /// Hand the connection back.
   ///
   /// Pooled connections return to their node; a pinned connection is only
   /// unlocked for the session's next statement.
   pub fn release(self) {
      match self {
         Lease::Pooled(conn) => conn.release(),
         Lease::Pinned(guard) => drop(guard),
      }
   }
}

impl Deref for Lease {
   type Target = SqliteConnection;

   fn deref(&self) -> &Self::Target {
      match self {
         Lease::Pooled(conn) => conn,
         Lease::Pinned(guard) => guard,
      }
   }
}

impl DerefMut for Lease {
   fn deref_mut(&mut self) -> &mut Self::Target {
      match self {
         Lease::Pooled(conn) => conn,
         Lease::Pinned(guard) => guard,
      }
   }
}

/// Source of connections for the executor.
pub trait Acquire: Clone + Send + Sync + 'static {
   /// Lease a connection suitable for `intent`.
   fn acquire(&self, intent: Intent) -> impl Future<Output = Result<Lease>> + Send;
}

/// Routes each statement to a node of a pool cluster.
#[derive(Debug, Clone)]
pub struct PoolRouter {
   cluster: Arc<PoolCluster>,
   topology: Option<ReplicationTopology>,
}

impl PoolRouter {
   pub fn new(cluster: Arc<PoolCluster>, topology: Option<ReplicationTopology>) -> Self {
      Self { cluster, topology }
   }

   /// The cluster connections are leased from.
   pub fn cluster(&self) -> &Arc<PoolCluster> {
      &self.cluster
   }

   /// Node selector for `intent`, or `None` for any node.
   pub fn selector(&self, intent: Intent) -> Option<&str> {
      self.topology.as_ref().map(|topology| match intent {
         Intent::Read => topology.read.as_str(),
         Intent::Write => topology.write.as_str(),
      })
   }

   pub(crate) async fn acquire_pooled(&self, intent: Intent) -> Result<PooledConnection> {
      let selector = self.selector(intent);
      let conn = self.cluster.acquire(selector).await?;
      trace!(?intent, node = conn.node(), "Routed connection");
      Ok(conn)
   }
}

impl Acquire for PoolRouter {
   fn acquire(&self, intent: Intent) -> impl Future<Output = Result<Lease>> + Send {
      async move { Ok(Lease::Pooled(self.acquire_pooled(intent).await?)) }
   }
}

/// A single connection shared by every statement of a session.
///
/// Statements take turns on the connection; the connection returns to its
/// pool once the session and every handle cloned from it are dropped. If a
/// transaction is still open at that point it is rolled back first.
#[derive(Debug, Clone)]
pub struct PinnedConnection {
   state: Arc<PinnedState>,
}

#[derive(Debug)]
struct PinnedState {
   id: String,
   conn: Arc<Mutex<PooledConnection>>,
   in_transaction: AtomicBool,
}

impl PinnedConnection {
   pub(crate) fn new(conn: PooledConnection) -> Self {
      Self {
         state: Arc::new(PinnedState {
            id: uuid::Uuid::new_v4().to_string(),
            conn: Arc::new(Mutex::new(conn)),
            in_transaction: AtomicBool::new(false),
         }),
      }
   }

   /// Unique id of the session owning this connection.
   pub fn id(&self) -> &str {
      &self.state.id
   }

   /// Name of the node the connection was leased from.
   pub async fn node(&self) -> String {
      self.state.conn.lock().await.node().to_string()
   }

   pub(crate) fn in_transaction(&self) -> bool {
      self.state.in_transaction.load(Ordering::SeqCst)
   }

   pub(crate) fn set_in_transaction(&self, active: bool) {
      self.state.in_transaction.store(active, Ordering::SeqCst);
   }
}

impl Acquire for PinnedConnection {
   fn acquire(&self, _intent: Intent) -> impl Future<Output = Result<Lease>> + Send {
      let conn = Arc::clone(&self.state.conn);
      async move { Ok(Lease::Pinned(conn.lock_owned().await)) }
   }
}

impl Drop for PinnedState {
   fn drop(&mut self) {
      if !*self.in_transaction.get_mut() {
         return;
      }

      let id = std::mem::take(&mut self.id);
      let Ok(handle) = Handle::try_current() else {
         warn!(session = %id, "Session dropped outside a runtime with an open transaction");
         return;
      };

      warn!(session = %id, "Session dropped with an open transaction; rolling back");
      let conn = Arc::clone(&self.conn);
      handle.spawn(async move {
         let mut guard = conn.lock_owned().await;
         if let Err(e) = sqlx::query("ROLLBACK").execute(&mut **guard).await {
            warn!(session = %id, error = %e, "Rollback of dropped session failed");
         }
      });
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn select_is_read() {
      assert_eq!(classify("SELECT * FROM t"), Intent::Read);
   }

   #[test]
   fn classification_is_case_insensitive_and_trims() {
      assert_eq!(classify("  \n sElEcT 1"), Intent::Read);
   }

   #[test]
   fn other_statements_are_writes() {
      assert_eq!(classify("INSERT INTO t VALUES (1)"), Intent::Write);
      assert_eq!(classify("UPDATE t SET a = 1"), Intent::Write);
      assert_eq!(classify("BEGIN IMMEDIATE"), Intent::Write);
   }

   #[test]
   fn cte_is_classified_as_write() {
      assert_eq!(classify("WITH x AS (SELECT 1) SELECT * FROM x"), Intent::Write);
   }

   #[test]
   fn select_must_be_a_whole_word() {
      assert_eq!(classify("SELECTED"), Intent::Write);
   }
}
