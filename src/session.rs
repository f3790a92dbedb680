//! Sessions pinned to one pooled connection.

use tracing::{debug, warn};

use crate::router::PinnedConnection;
use crate::wrapper::DatabaseWrapper;
use crate::{Error, Result};

/// A [`DatabaseWrapper`] whose statements all run on one connection.
///
/// Obtained from [`DatabaseWrapper::connection`]. Reads and writes alike use
/// the pinned connection, so a session sees its own uncommitted writes.
/// Handles cloned from a session (including builders) share its connection.
pub type Session = DatabaseWrapper<PinnedConnection>;

impl DatabaseWrapper<PinnedConnection> {
   /// Unique id of this session.
   pub fn id(&self) -> &str {
      self.router().id()
   }

   /// Name of the pool node the session's connection came from.
   pub async fn node(&self) -> String {
      self.router().node().await
   }

   /// Whether a transaction opened with [`begin`](Self::begin) is open.
   pub fn in_transaction(&self) -> bool {
      self.router().in_transaction()
   }

   /// Begin a transaction (`BEGIN IMMEDIATE`).
   pub async fn begin(&self) -> Result<()> {
      if self.in_transaction() {
         return Err(Error::TransactionAlreadyActive(self.id().to_string()));
      }

      self.query("BEGIN IMMEDIATE", vec![]).await?;
      self.router().set_in_transaction(true);
      debug!(session = %self.id(), "Transaction started");
      Ok(())
   }

   /// Commit the open transaction.
   pub async fn commit(&self) -> Result<()> {
      if !self.in_transaction() {
         return Err(Error::NoActiveTransaction(self.id().to_string()));
      }

      self.query("COMMIT", vec![]).await?;
      self.router().set_in_transaction(false);
      debug!(session = %self.id(), "Transaction committed");
      Ok(())
   }

   /// Roll back the open transaction.
   pub async fn rollback(&self) -> Result<()> {
      if !self.in_transaction() {
         return Err(Error::NoActiveTransaction(self.id().to_string()));
      }

      self.query("ROLLBACK", vec![]).await?;
      self.router().set_in_transaction(false);
      debug!(session = %self.id(), "Transaction rolled back");
      Ok(())
   }

   /// End the session.
   ///
   /// An open transaction is rolled back first. The connection returns to
   /// its pool once every handle cloned from this session is dropped too.
   pub async fn release(self) -> Result<()> {
      if self.in_transaction() {
         warn!(session = %self.id(), "Releasing session with an open transaction; rolling back");
         self.rollback().await?;
      }

      debug!(session = %self.id(), "Session released");
      Ok(())
   }
}
