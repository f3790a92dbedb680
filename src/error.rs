/// Result type alias for wrapper operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for query execution, routing, and cursor pagination.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// Error reported by SQLx while running a statement.
   #[error(transparent)]
   Sqlx(#[from] sqlx::Error),

   /// Error acquiring a connection from the pool cluster.
   #[error(transparent)]
   Cluster(#[from] sqlx_sqlite_cluster::Error),

   /// SQLite type that cannot be mapped to JSON.
   #[error("unsupported datatype: {0}")]
   UnsupportedDatatype(String),

   /// Transaction failed and rollback also failed.
   #[error("transaction failed: {transaction_error}; rollback also failed: {rollback_error}")]
   TransactionRollbackFailed {
      transaction_error: String,
      rollback_error: String,
   },

   /// A transaction is already open on this session.
   #[error("transaction already active for session: {0}")]
   TransactionAlreadyActive(String),

   /// No transaction is open on this session.
   #[error("no active transaction for session: {0}")]
   NoActiveTransaction(String),

   /// Cursor pagination requires at least one order field.
   #[error("cursor pagination requires at least one orderBy field")]
   EmptyOrderBy,

   /// Results per page must be greater than zero.
   #[error("results per page must be greater than zero")]
   InvalidPageSize,

   /// Page numbers start at 1.
   #[error("page number must be greater than zero")]
   InvalidPage,

   /// Cursor base query must not contain top-level ORDER BY or LIMIT clauses.
   #[error(
      "cursor pagination base query must not contain top-level ORDER BY or LIMIT clauses (these are added automatically; subquery usage is fine)"
   )]
   InvalidPaginationQuery,

   /// Order field name contains invalid characters.
   ///
   /// Field names must match `[a-zA-Z_][a-zA-Z0-9_.]*` (letters, digits,
   /// underscores, and dots for qualified names like `table.column`).
   #[error("invalid order field name '{name}': must match [a-zA-Z_][a-zA-Z0-9_.]*")]
   InvalidColumnName { name: String },

   /// Cursor token is not valid base64 or not valid UTF-8.
   #[error("malformed cursor: {reason}")]
   CursorDecode { reason: String },

   /// Cursor value count does not match the order field count.
   #[error("cursor has {cursor_len} values but orderBy has {order_len} fields")]
   CursorLengthMismatch { cursor_len: usize, order_len: usize },

   /// Order field not found in a result row while building its cursor.
   #[error("order field '{column}' not found in query results")]
   CursorColumnNotFound { column: String },

   /// A value was supplied for an identifier placeholder or vice versa.
   #[error("parameter {position} does not fit its placeholder: expected {expected}")]
   PlaceholderMismatch {
      position: usize,
      expected: &'static str,
   },

   /// Number of parameters differs from the number of placeholders.
   #[error("statement has {placeholders} placeholders but {params} parameters were supplied")]
   ParameterCountMismatch { placeholders: usize, params: usize },

   /// Insert-style operation called without any rows.
   #[error("at least one row is required")]
   EmptyRowSet,

   /// Cursor pagination was requested on a builder that is not a SELECT.
   #[error("cursor pagination is only available for SELECT builders")]
   CursorRequiresSelect,

   /// Generic error for operations that don't fit other categories.
   #[error("{0}")]
   Other(String),
}

impl Error {
   /// Extract a structured error code from the error type.
   ///
   /// This provides machine-readable error codes for error handling.
   pub fn error_code(&self) -> String {
      match self {
         Error::Sqlx(e) => sqlx_error_code(e),
         Error::Cluster(e) => match e {
            sqlx_sqlite_cluster::Error::Sqlx(inner) => sqlx_error_code(inner),
            sqlx_sqlite_cluster::Error::ClusterClosed => "CLUSTER_CLOSED".to_string(),
            sqlx_sqlite_cluster::Error::NoMatchingNode { .. } => "NO_MATCHING_NODE".to_string(),
            _ => "CONNECTION_ERROR".to_string(),
         },
         Error::UnsupportedDatatype(_) => "UNSUPPORTED_DATATYPE".to_string(),
         Error::TransactionRollbackFailed { .. } => "TRANSACTION_ROLLBACK_FAILED".to_string(),
         Error::TransactionAlreadyActive(_) => "TRANSACTION_ALREADY_ACTIVE".to_string(),
         Error::NoActiveTransaction(_) => "NO_ACTIVE_TRANSACTION".to_string(),
         Error::EmptyOrderBy => "EMPTY_ORDER_BY".to_string(),
         Error::InvalidPageSize => "INVALID_PAGE_SIZE".to_string(),
         Error::InvalidPage => "INVALID_PAGE".to_string(),
         Error::InvalidPaginationQuery => "INVALID_PAGINATION_QUERY".to_string(),
         Error::InvalidColumnName { .. } => "INVALID_COLUMN_NAME".to_string(),
         Error::CursorDecode { .. } => "CURSOR_DECODE".to_string(),
         Error::CursorLengthMismatch { .. } => "CURSOR_LENGTH_MISMATCH".to_string(),
         Error::CursorColumnNotFound { .. } => "CURSOR_COLUMN_NOT_FOUND".to_string(),
         Error::PlaceholderMismatch { .. } => "PLACEHOLDER_MISMATCH".to_string(),
         Error::ParameterCountMismatch { .. } => "PARAMETER_COUNT_MISMATCH".to_string(),
         Error::EmptyRowSet => "EMPTY_ROW_SET".to_string(),
         Error::CursorRequiresSelect => "CURSOR_REQUIRES_SELECT".to_string(),
         Error::Other(_) => "ERROR".to_string(),
      }
   }
}

fn sqlx_error_code(e: &sqlx::Error) -> String {
   if let Some(code) = e.as_database_error().and_then(|db_err| db_err.code()) {
      return format!("SQLITE_{}", code);
   }
   match e {
      sqlx::Error::PoolTimedOut => "POOL_TIMED_OUT".to_string(),
      _ => "SQLX_ERROR".to_string(),
   }
}
