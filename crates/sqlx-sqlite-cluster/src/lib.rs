//! # sqlx-sqlite-cluster
//!
//! A small cluster of named SQLite connection pools built on SQLx.
//!
//! ## Core Types
//!
//! - **[`PoolCluster`]**: Set of named pool nodes with pattern-based selection
//! - **[`NodeSpec`]**: Describes one node (name, file, access mode, pool size)
//! - **[`ClusterConfig`]**: Pool settings shared by every node
//! - **[`PooledConnection`]**: Leased connection that returns to its node exactly once
//! - **[`Error`]**: Error type for cluster operations
//!
//! ## Architecture
//!
//! - **Named nodes**: Each node owns an SQLx pool; nodes are addressed by name
//! - **Selectors**: Callers acquire through a glob pattern (`REPLICA*`); matching
//!   nodes are used round-robin
//! - **Default layout**: [`PoolCluster::connect`] opens a file as a single-connection
//!   read-write `PRIMARY` node and a read-only `REPLICA` node
//! - **Lease accounting**: The cluster counts outstanding leases, so callers can
//!   verify every acquired connection was handed back

mod cluster;
mod config;
mod error;
mod lease;

pub use cluster::{PRIMARY_NODE, PoolCluster, REPLICA_NODE};
pub use config::{ClusterConfig, NodeAccess, NodeSpec};
pub use error::{Error, Result};
pub use lease::PooledConnection;
