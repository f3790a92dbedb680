use std::path::Path;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use sqlx_sqlite_cluster::PoolCluster;
use tracing::debug;

use crate::builders::Build;
use crate::config::WrapperConfig;
use crate::executor::{QueryOutcome, WriteQueryResult, execute, execute_one, execute_stream};
use crate::pagination::{self, CursorRequest, PageResult};
use crate::router::{Acquire, Intent, PinnedConnection, PoolRouter};
use crate::session::Session;
use crate::statement::{PageRequest, Param, Query, quote_identifier};
use crate::stream::RowStream;
use crate::{Error, Result, Row};

/// Query surface over a connection router.
///
/// `DatabaseWrapper<PoolRouter>` routes every statement to a pool node by
/// its read/write intent. A [`Session`] is the same surface pinned to one
/// connection.
///
/// Placeholders are positional: `?` binds a [`Param::Value`] and `??`
/// inlines a quoted [`Param::Identifier`].
#[derive(Debug, Clone)]
pub struct DatabaseWrapper<R: Acquire = PoolRouter> {
   router: R,
   config: Arc<WrapperConfig>,
}

/// Table and columns read by [`DatabaseWrapper::select`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectTarget {
   pub table: String,
   /// Column expressions, inserted as written; empty selects `*`
   pub fields: Vec<String>,
   /// Appends `LIMIT/OFFSET` for one page; no count is returned
   pub paginate: Option<PageRequest>,
}

impl SelectTarget {
   pub fn new(table: impl Into<String>) -> Self {
      Self {
         table: table.into(),
         fields: Vec::new(),
         paginate: None,
      }
   }

   pub fn fields<I>(mut self, fields: I) -> Self
   where
      I: IntoIterator,
      I::Item: Into<String>,
   {
      self.fields = fields.into_iter().map(Into::into).collect();
      self
   }

   pub fn paginate(mut self, page: PageRequest) -> Self {
      self.paginate = Some(page);
      self
   }
}

impl From<&str> for SelectTarget {
   fn from(table: &str) -> Self {
      Self::new(table)
   }
}

impl From<String> for SelectTarget {
   fn from(table: String) -> Self {
      Self::new(table)
   }
}

/// One or more rows for insert-style operations.
///
/// Columns are taken from the first row; later rows are read in that column
/// order, with missing columns inserted as NULL.
#[derive(Debug, Clone, PartialEq)]
pub struct RowSet(Vec<Row>);

impl From<Row> for RowSet {
   fn from(row: Row) -> Self {
      Self(vec![row])
   }
}

impl From<Vec<Row>> for RowSet {
   fn from(rows: Vec<Row>) -> Self {
      Self(rows)
   }
}

/// Append ` WHERE ?? = ? AND …` for each entry of `conditions`.
fn push_where_equals(sql: &mut String, params: &mut Vec<Param>, conditions: &Row) {
   if conditions.is_empty() {
      return;
   }

   let clauses: Vec<&str> = conditions
      .iter()
      .map(|(field, value)| {
         params.push(Param::Identifier(field.clone()));
         params.push(Param::Value(value.clone()));
         "?? = ?"
      })
      .collect();

   sql.push_str(" WHERE ");
   sql.push_str(&clauses.join(" AND "));
}

fn select_statement(target: SelectTarget, conditions: &Row) -> Result<(String, Vec<Param>)> {
   let fields = if target.fields.is_empty() {
      "*".to_string()
   } else {
      target.fields.join(", ")
   };

   let mut sql = format!("SELECT {} FROM ??", fields);
   let mut params = vec![Param::Identifier(target.table)];
   push_where_equals(&mut sql, &mut params, conditions);

   if let Some(page) = target.paginate {
      page.validate()?;
      sql.push_str(&format!(
         " LIMIT {} OFFSET {}",
         page.results_per_page,
         page.offset()
      ));
   }

   Ok((sql, params))
}

fn insert_statement(verb: &str, table: &str, rows: RowSet) -> Result<(String, Vec<Param>, Vec<String>)> {
   let RowSet(rows) = rows;
   let Some(first) = rows.first() else {
      return Err(Error::EmptyRowSet);
   };
   let fields: Vec<String> = first.keys().cloned().collect();

   let mut params = vec![Param::Identifier(table.to_string())];
   params.extend(fields.iter().cloned().map(Param::Identifier));

   let tuple = format!("({})", vec!["?"; fields.len()].join(", "));
   let mut tuples = Vec::with_capacity(rows.len());
   for row in &rows {
      for field in &fields {
         params.push(Param::Value(row.get(field).cloned().unwrap_or(JsonValue::Null)));
      }
      tuples.push(tuple.as_str());
   }

   let sql = format!(
      "{} INTO ?? ({}) VALUES {}",
      verb,
      vec!["??"; fields.len()].join(", "),
      tuples.join(", ")
   );

   Ok((sql, params, fields))
}

impl<R: Acquire> DatabaseWrapper<R> {
   pub(crate) fn from_parts(router: R, config: Arc<WrapperConfig>) -> Self {
      Self { router, config }
   }

   /// The router statements are sent through.
   pub fn router(&self) -> &R {
      &self.router
   }

   pub fn config(&self) -> &WrapperConfig {
      &self.config
   }

   /// Run a statement.
   ///
   /// Reads return rows (with a count or page bookkeeping when the
   /// [`Statement`](crate::Statement) asks for it); writes return a
   /// [`WriteQueryResult`].
   pub async fn query(&self, query: impl Into<Query>, params: Vec<Param>) -> Result<QueryOutcome> {
      execute(&self.router, query.into(), params).await
   }

   /// Run a statement and stream its rows.
   pub async fn query_stream(&self, query: impl Into<Query>, params: Vec<Param>) -> Result<RowStream> {
      execute_stream(&self.router, query.into(), params, self.config.stream_capacity).await
   }

   /// Run a statement limited to one row; `None` when nothing matches.
   pub async fn one(&self, query: impl Into<Query>, params: Vec<Param>) -> Result<Option<Row>> {
      execute_one(&self.router, query.into(), params).await
   }

   /// Fetch one cursor page of a base SELECT.
   ///
   /// The base statement must not have its own top-level ORDER BY or LIMIT;
   /// both come from `request`. `nest_tables` is taken from a
   /// [`Statement`](crate::Statement); its other flags are ignored.
   pub async fn paginate(
      &self,
      query: impl Into<Query>,
      params: Vec<Param>,
      request: CursorRequest,
   ) -> Result<PageResult> {
      let statement = query.into().into_statement();
      pagination::paginate(&self.router, &statement.sql, params, &request, statement.nest_tables).await
   }

   /// Read the rows of a table whose columns equal `where_equals`.
   pub async fn select(&self, target: impl Into<SelectTarget>, where_equals: Row) -> Result<Vec<Row>> {
      let (sql, params) = select_statement(target.into(), &where_equals)?;
      Ok(self.query(sql, params).await?.into_rows())
   }

   /// Streaming form of [`select`](Self::select).
   pub async fn select_stream(
      &self,
      target: impl Into<SelectTarget>,
      where_equals: Row,
   ) -> Result<RowStream> {
      let (sql, params) = select_statement(target.into(), &where_equals)?;
      self.query_stream(sql, params).await
   }

   /// First row of [`select`](Self::select), if any.
   pub async fn select_one(&self, target: impl Into<SelectTarget>, where_equals: Row) -> Result<Option<Row>> {
      let (sql, params) = select_statement(target.into(), &where_equals)?;
      self.one(sql, params).await
   }

   /// Insert one or more rows.
   pub async fn insert(&self, table: &str, rows: impl Into<RowSet>) -> Result<WriteQueryResult> {
      let (sql, params, _) = insert_statement("INSERT", table, rows.into())?;
      self.query(sql, params).await?.into_write()
   }

   /// Insert rows, replacing any that conflict on a unique key.
   pub async fn replace(&self, table: &str, rows: impl Into<RowSet>) -> Result<WriteQueryResult> {
      let (sql, params, _) = insert_statement("REPLACE", table, rows.into())?;
      self.query(sql, params).await?.into_write()
   }

   /// Insert rows, updating a conflicting row with the new row's values.
   pub async fn save(&self, table: &str, rows: impl Into<RowSet>) -> Result<WriteQueryResult> {
      let (mut sql, mut params, fields) = insert_statement("INSERT", table, rows.into())?;

      let assignments = vec!["?? = excluded.??"; fields.len()].join(", ");
      sql.push_str(" ON CONFLICT DO UPDATE SET ");
      sql.push_str(&assignments);
      for field in fields {
         params.push(Param::Identifier(field.clone()));
         params.push(Param::Identifier(field));
      }

      self.query(sql, params).await?.into_write()
   }

   /// Set columns on every row whose columns equal `where_equals`.
   pub async fn update(&self, table: &str, set: Row, where_equals: Row) -> Result<WriteQueryResult> {
      if set.is_empty() {
         return Err(Error::EmptyRowSet);
      }

      let mut params = vec![Param::Identifier(table.to_string())];
      let assignments: Vec<&str> = set
         .into_iter()
         .map(|(field, value)| {
            params.push(Param::Identifier(field));
            params.push(Param::Value(value));
            "?? = ?"
         })
         .collect();

      let mut sql = format!("UPDATE ?? SET {}", assignments.join(", "));
      push_where_equals(&mut sql, &mut params, &where_equals);

      self.query(sql, params).await?.into_write()
   }

   /// Delete every row whose columns equal `where_equals`.
   ///
   /// An empty `where_equals` deletes every row of the table.
   pub async fn delete(&self, table: &str, where_equals: Row) -> Result<WriteQueryResult> {
      let mut sql = "DELETE FROM ??".to_string();
      let mut params = vec![Param::Identifier(table.to_string())];
      push_where_equals(&mut sql, &mut params, &where_equals);

      self.query(sql, params).await?.into_write()
   }

   /// Fluent statement builders running through this wrapper.
   pub fn build(&self) -> Build<R> {
      Build::new(self.router.clone(), self.config.stream_capacity)
   }

   /// Quote `value` as an SQL literal using SQLite's own `quote()`.
   pub async fn escape(&self, value: impl Into<JsonValue>) -> Result<String> {
      let row = self
         .one("SELECT quote(?) AS quoted", vec![Param::Value(value.into())])
         .await?;

      match row.as_ref().and_then(|row| row.get("quoted")) {
         Some(JsonValue::String(quoted)) => Ok(quoted.clone()),
         Some(other) => Ok(other.to_string()),
         None => Err(Error::Other("quote() returned no value".to_string())),
      }
   }

   /// Quote `name` as an identifier, one segment per dot.
   pub fn escape_identifier(&self, name: &str) -> String {
      quote_identifier(name)
   }
}

impl DatabaseWrapper<PoolRouter> {
   /// Open `path` with the default PRIMARY/REPLICA layout.
   ///
   /// The database file and its parent directories are created if missing.
   pub async fn connect(path: impl AsRef<Path>, config: Option<WrapperConfig>) -> Result<Self> {
      let config = config.unwrap_or_default();
      let cluster = PoolCluster::connect(path, Some(config.pool.clone())).await?;

      Ok(Self::with_cluster(cluster, Some(config)))
   }

   /// Route statements over an already opened cluster.
   pub fn with_cluster(cluster: Arc<PoolCluster>, config: Option<WrapperConfig>) -> Self {
      let config = config.unwrap_or_default();
      let router = PoolRouter::new(cluster, config.replication.clone());

      Self::from_parts(router, Arc::new(config))
   }

   pub fn cluster(&self) -> &Arc<PoolCluster> {
      self.router.cluster()
   }

   /// Pin a write-capable connection for a sequence of statements.
   ///
   /// Every statement of the session, reads included, runs on that one
   /// connection. The connection goes back to the pool when the session is
   /// [released](Session::release) or dropped.
   pub async fn connection(&self) -> Result<Session> {
      let conn = self.router.acquire_pooled(Intent::Write).await?;
      let pinned = PinnedConnection::new(conn);
      debug!(session = %pinned.id(), "Session opened");

      Ok(DatabaseWrapper::from_parts(pinned, Arc::clone(&self.config)))
   }

   /// Execute multiple write statements atomically within a transaction.
   ///
   /// This method:
   /// 1. Pins a session and begins a transaction (BEGIN IMMEDIATE)
   /// 2. Executes all statements in order
   /// 3. Commits on success (COMMIT)
   /// 4. Rolls back on any error (ROLLBACK)
   ///
   /// Returns the result of each statement execution.
   pub async fn execute_transaction(
      &self,
      statements: Vec<(String, Vec<Param>)>,
   ) -> Result<Vec<WriteQueryResult>> {
      let session = self.connection().await?;
      session.begin().await?;

      let result = async {
         let mut results = Vec::with_capacity(statements.len());
         for (sql, params) in statements {
            results.push(session.query(sql, params).await?.into_write()?);
         }
         Ok::<Vec<WriteQueryResult>, Error>(results)
      }
      .await;

      let outcome = match result {
         Ok(results) => session.commit().await.map(|()| results),
         Err(e) => match session.rollback().await {
            // Rollback succeeded, return original error
            Ok(()) => Err(e),

            // Rollback also failed, return the rollback error and the original error
            Err(rollback_err) => Err(Error::TransactionRollbackFailed {
               transaction_error: e.to_string(),
               rollback_error: rollback_err.to_string(),
            }),
         },
      };

      session.release().await?;
      outcome
   }

   /// Close every pool of the cluster.
   pub async fn close(self) -> Result<()> {
      self.cluster().close().await?;
      Ok(())
   }

   /// Close the cluster and remove all database files
   pub async fn remove(self) -> Result<()> {
      self.cluster().remove().await?;
      Ok(())
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use serde_json::json;

   fn row(value: JsonValue) -> Row {
      serde_json::from_value(value).unwrap()
   }

   // ─── select ───

   #[test]
   fn select_without_conditions() {
      let (sql, params) = select_statement("t".into(), &Row::default()).unwrap();

      assert_eq!(sql, "SELECT * FROM ??");
      assert_eq!(params, vec![Param::identifier("t")]);
   }

   #[test]
   fn select_with_fields_conditions_and_page() {
      let target = SelectTarget::new("t")
         .fields(["id", "name"])
         .paginate(PageRequest::new(3, 10).unwrap());
      let (sql, params) = select_statement(target, &row(json!({ "a": 1, "b": "x" }))).unwrap();

      assert_eq!(
         sql,
         "SELECT id, name FROM ?? WHERE ?? = ? AND ?? = ? LIMIT 10 OFFSET 20"
      );
      assert_eq!(
         params,
         vec![
            Param::identifier("t"),
            Param::identifier("a"),
            Param::value(1),
            Param::identifier("b"),
            Param::value("x"),
         ]
      );
   }

   // ─── insert ───

   #[test]
   fn insert_multiple_rows_uses_first_row_columns() {
      let rows = vec![
         row(json!({ "id": 1, "name": "a" })),
         row(json!({ "name": "b", "id": 2 })),
         row(json!({ "id": 3 })),
      ];
      let (sql, params, fields) = insert_statement("INSERT", "t", rows.into()).unwrap();

      assert_eq!(sql, "INSERT INTO ?? (??, ??) VALUES (?, ?), (?, ?), (?, ?)");
      assert_eq!(fields, vec!["id", "name"]);
      assert_eq!(params.len(), 3 + 6);
      assert_eq!(params[5], Param::value(2));
      assert_eq!(params[6], Param::value("b"));
      assert_eq!(params[8], Param::Value(JsonValue::Null));
   }

   #[test]
   fn insert_requires_a_row() {
      let err = insert_statement("INSERT", "t", Vec::<Row>::new().into()).unwrap_err();
      assert!(matches!(err, Error::EmptyRowSet));
   }
}
