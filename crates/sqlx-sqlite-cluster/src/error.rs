//! Error types for sqlx-sqlite-cluster

use thiserror::Error;

/// Errors that may occur when working with a pool cluster
#[derive(Error, Debug)]
pub enum Error {
   /// IO error when accessing database files. Standard library IO errors
   /// are converted to this variant.
   #[error("IO error: {0}")]
   Io(#[from] std::io::Error),

   /// Error from the sqlx library. Standard sqlx errors are converted to this variant
   #[error("Sqlx error: {0}")]
   Sqlx(#[from] sqlx::Error),

   /// Cluster has been closed and cannot be used
   #[error("Pool cluster has been closed")]
   ClusterClosed,

   /// A cluster needs at least one node
   #[error("Pool cluster requires at least one node")]
   EmptyCluster,

   /// Two nodes were configured with the same name
   #[error("Duplicate pool node name: {0}")]
   DuplicateNode(String),

   /// No node name matches the requested selector
   #[error("No pool node matches selector '{pattern}'")]
   NoMatchingNode { pattern: String },

   /// Selector could not be compiled into a matcher
   #[error("Invalid node selector '{pattern}': {reason}")]
   InvalidPattern { pattern: String, reason: String },
}

/// A type alias for Results with our Error type
pub type Result<T> = std::result::Result<T, Error>;
