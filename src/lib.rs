//! # sqlwrap
//!
//! A routed SQL executor for SQLite with Relay-style cursor pagination.
//!
//! ## Core Types
//!
//! - **[`DatabaseWrapper`]**: Query surface (raw statements, table helpers,
//!   builders, streams) over a connection router
//! - **[`Session`]**: The same surface pinned to one connection, with
//!   explicit transactions
//! - **[`CursorRequest`] / [`PageResult`]**: Keyset pagination over an
//!   arbitrary compound order with opaque cursors
//! - **[`Statement`]**: SQL text plus result-shaping flags (nested tables,
//!   match count, offset pagination)
//! - **[`Error`]**: Error type with stable [`error_code`](Error::error_code)s
//!
//! ## Architecture
//!
//! - **Routing**: Statements starting with `SELECT` are reads and go to the
//!   topology's read selector (`REPLICA*` by default); everything else goes
//!   to the write selector (`PRIMARY`)
//! - **Leases**: Each statement leases a connection and releases it when it
//!   finishes, fails, or (for streams) when the consumer stops reading
//! - **Placeholders**: `?` binds a value, `??` inlines a quoted identifier
//!
//! ## Example
//!
//! ```no_run
//! use sqlwrap::{CursorRequest, DatabaseWrapper, OrderSpec, Param};
//!
//! # async fn example() -> sqlwrap::Result<()> {
//! let db = DatabaseWrapper::connect("app.db", None).await?;
//!
//! db.query("CREATE TABLE posts (id INTEGER PRIMARY KEY, title TEXT)", vec![])
//!    .await?;
//! db.query("INSERT INTO posts (title) VALUES (?)", vec![Param::from("hello")])
//!    .await?;
//!
//! let page = db
//!    .build()
//!    .select()
//!    .from("posts")
//!    .paginate(CursorRequest::new([OrderSpec::asc("id")]).first(10))
//!    .await?;
//!
//! if page.page_info.has_next_page {
//!    let _next = CursorRequest::new([OrderSpec::asc("id")])
//!       .first(10)
//!       .after(page.end_cursor().unwrap_or_default());
//! }
//! # Ok(())
//! # }
//! ```

mod builders;
mod config;
mod cursor;
mod decode;
mod error;
mod executor;
mod pagination;
mod router;
mod scan;
mod session;
mod statement;
mod stream;
mod wrapper;

pub use builders::{Build, DeleteBuilder, InsertBuilder, RunOptions, RunOutcome, SelectBuilder, UpdateBuilder};
pub use config::{ReplicationTopology, WrapperConfig};
pub use cursor::{DeserializeFn, OrderSpec, SerializeFn, SortDirection, decode_cursor, encode_cursor};
pub use error::{Error, Result};
pub use executor::{QueryOutcome, WriteQueryResult};
pub use pagination::{CursorRequest, Edge, PageInfo, PageResult};
pub use router::{Acquire, Intent, Lease, PinnedConnection, PoolRouter, classify};
pub use session::Session;
pub use statement::{PageRequest, Param, Query, Statement};
pub use stream::RowStream;
pub use wrapper::{DatabaseWrapper, RowSet, SelectTarget};

pub use sqlx_sqlite_cluster::{ClusterConfig, NodeAccess, NodeSpec, PRIMARY_NODE, PoolCluster, REPLICA_NODE};

/// A decoded result row: column label to JSON value, in column order.
pub type Row = indexmap::IndexMap<String, serde_json::Value>;
