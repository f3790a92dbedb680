//! Leased connections handed out by a pool cluster

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use sqlx::Sqlite;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::SqliteConnection;
use tracing::trace;

/// A connection leased from one node of a [`PoolCluster`](crate::PoolCluster).
///
/// The connection goes back to its node's pool exactly once: either through
/// [`release`](Self::release) or when the lease is dropped. The cluster's
/// outstanding-lease counter is decremented at the same moment.
#[must_use = "if unused, the connection is immediately returned to its pool"]
pub struct PooledConnection {
   conn: Option<PoolConnection<Sqlite>>,
   node: Arc<str>,
   leases: Arc<AtomicUsize>,
}

impl PooledConnection {
   pub(crate) fn new(
      conn: PoolConnection<Sqlite>,
      node: Arc<str>,
      leases: Arc<AtomicUsize>,
   ) -> Self {
      leases.fetch_add(1, Ordering::SeqCst);
      Self {
         conn: Some(conn),
         node,
         leases,
      }
   }

   /// Name of the node this connection was acquired from.
   pub fn node(&self) -> &str {
      &self.node
   }

   /// Return the connection to its pool.
   pub fn release(self) {
      drop(self);
   }
}

impl Deref for PooledConnection {
   type Target = SqliteConnection;

   fn deref(&self) -> &Self::Target {
      // Only `Drop` takes the connection out
      self.conn.as_deref().expect("connection present until drop")
   }
}

impl DerefMut for PooledConnection {
   fn deref_mut(&mut self) -> &mut Self::Target {
      self.conn.as_deref_mut().expect("connection present until drop")
   }
}

impl Drop for PooledConnection {
   fn drop(&mut self) {
      if let Some(conn) = self.conn.take() {
         drop(conn);
         self.leases.fetch_sub(1, Ordering::SeqCst);
         trace!(node = %self.node, "Connection released");
      }
   }
}

impl std::fmt::Debug for PooledConnection {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("PooledConnection")
         .field("node", &self.node)
         .finish_non_exhaustive()
   }
}
