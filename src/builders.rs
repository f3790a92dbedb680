//! Fluent statement builders that run through the executor.
//!
//! Builders assemble SQL text and positional parameters clause by clause.
//! Table, field, and ordering text is inserted as written; values always go
//! through `?` parameters. Awaiting a builder runs it with default
//! [`RunOptions`].

use std::future::{Future, IntoFuture};
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::cursor::SortDirection;
use crate::executor::{QueryOutcome, execute, execute_one, execute_stream};
use crate::pagination::{CursorRequest, PageResult, paginate};
use crate::router::Acquire;
use crate::statement::{PageRequest, Param, Statement};
use crate::stream::RowStream;
use crate::{Error, Result, Row};

/// Options for [`SelectBuilder::run`] and the other builders' `run`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RunOptions {
   /// Page with cursors instead of running the statement directly
   pub cursor: Option<CursorRequest>,
   /// Also return the un-limited match count
   pub result_count: bool,
   /// Offset pagination
   pub paginate: Option<PageRequest>,
   /// Group columns labelled `table.column` under their table
   pub nest_tables: bool,
}

/// Result of running a builder.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RunOutcome {
   Query(QueryOutcome),
   /// A cursor page, when [`RunOptions::cursor`] was set
   Connection(PageResult),
}

impl RunOutcome {
   /// The rows of the outcome, in order.
   pub fn into_rows(self) -> Vec<Row> {
      match self {
         RunOutcome::Query(outcome) => outcome.into_rows(),
         RunOutcome::Connection(page) => page.edges.into_iter().map(|edge| edge.node).collect(),
      }
   }

   pub fn into_query(self) -> Result<QueryOutcome> {
      match self {
         RunOutcome::Query(outcome) => Ok(outcome),
         RunOutcome::Connection(_) => Err(Error::Other("builder returned a cursor page".to_string())),
      }
   }

   pub fn into_page(self) -> Result<PageResult> {
      match self {
         RunOutcome::Connection(page) => Ok(page),
         RunOutcome::Query(_) => Err(Error::Other("builder returned query results".to_string())),
      }
   }
}

/// Entry point for builders bound to one wrapper or session.
#[derive(Debug, Clone)]
pub struct Build<R: Acquire> {
   router: R,
   stream_capacity: usize,
}

impl<R: Acquire> Build<R> {
   pub(crate) fn new(router: R, stream_capacity: usize) -> Self {
      Self {
         router,
         stream_capacity,
      }
   }

   pub fn select(&self) -> SelectBuilder<R> {
      SelectBuilder {
         router: self.router.clone(),
         stream_capacity: self.stream_capacity,
         fields: Vec::new(),
         from: Vec::new(),
         conditions: Conditions::default(),
         group: Vec::new(),
         order: Vec::new(),
         limit: None,
         offset: None,
      }
   }

   pub fn update(&self) -> UpdateBuilder<R> {
      UpdateBuilder {
         router: self.router.clone(),
         table: String::new(),
         set: Vec::new(),
         conditions: Conditions::default(),
      }
   }

   pub fn delete(&self) -> DeleteBuilder<R> {
      DeleteBuilder {
         router: self.router.clone(),
         table: String::new(),
         conditions: Conditions::default(),
      }
   }

   pub fn insert(&self) -> InsertBuilder<R> {
      InsertBuilder {
         router: self.router.clone(),
         table: String::new(),
         set: Vec::new(),
      }
   }
}

/// WHERE conditions, each parenthesized and joined with AND.
#[derive(Debug, Clone, Default)]
struct Conditions {
   clauses: Vec<String>,
   params: Vec<Param>,
}

impl Conditions {
   fn push(&mut self, condition: String, params: impl IntoIterator<Item = Param>) {
      self.clauses.push(condition);
      self.params.extend(params);
   }

   fn render(&self, sql: &mut String, params: &mut Vec<Param>) {
      if self.clauses.is_empty() {
         return;
      }
      sql.push_str(" WHERE ");
      let joined: Vec<String> = self.clauses.iter().map(|c| format!("({})", c)).collect();
      sql.push_str(&joined.join(" AND "));
      params.extend(self.params.iter().cloned());
   }
}

async fn run_statement<R: Acquire>(
   router: &R,
   sql: String,
   params: Vec<Param>,
   options: RunOptions,
   is_select: bool,
) -> Result<RunOutcome> {
   if let Some(request) = &options.cursor {
      if !is_select {
         return Err(Error::CursorRequiresSelect);
      }
      let page = paginate(router, &sql, params, request, options.nest_tables).await?;
      return Ok(RunOutcome::Connection(page));
   }

   let statement = Statement {
      sql,
      nest_tables: options.nest_tables,
      paginate: options.paginate,
      result_count: options.result_count,
   };
   Ok(RunOutcome::Query(execute(router, statement.into(), params).await?))
}

// ─── SELECT ───

/// Builder for SELECT statements.
#[derive(Debug, Clone)]
pub struct SelectBuilder<R: Acquire> {
   router: R,
   stream_capacity: usize,
   fields: Vec<String>,
   from: Vec<String>,
   conditions: Conditions,
   group: Vec<String>,
   order: Vec<(String, SortDirection)>,
   limit: Option<u64>,
   offset: Option<u64>,
}

impl<R: Acquire> SelectBuilder<R> {
   /// Add a result column; with none, every column is selected.
   pub fn field(mut self, field: impl Into<String>) -> Self {
      self.fields.push(field.into());
      self
   }

   pub fn from(mut self, table: impl Into<String>) -> Self {
      self.from.push(table.into());
      self
   }

   /// Add a condition; `params` bind its `?` placeholders in order.
   pub fn where_(mut self, condition: impl Into<String>, params: impl IntoIterator<Item = Param>) -> Self {
      self.conditions.push(condition.into(), params);
      self
   }

   /// Add `condition` bound to `value` only when a value is present.
   ///
   /// `None` leaves the statement untouched.
   pub fn where_if_defined<V: Into<Param>>(self, condition: impl Into<String>, value: Option<V>) -> Self {
      match value {
         Some(value) => self.where_(condition, [value.into()]),
         None => self,
      }
   }

   pub fn group(mut self, field: impl Into<String>) -> Self {
      self.group.push(field.into());
      self
   }

   pub fn order(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
      self.order.push((field.into(), direction));
      self
   }

   pub fn limit(mut self, limit: u64) -> Self {
      self.limit = Some(limit);
      self
   }

   pub fn offset(mut self, offset: u64) -> Self {
      self.offset = Some(offset);
      self
   }

   /// The SQL text and parameters built so far.
   pub fn to_param(&self) -> (String, Vec<Param>) {
      let mut params = Vec::new();
      let mut sql = String::from("SELECT ");

      if self.fields.is_empty() {
         sql.push('*');
      } else {
         sql.push_str(&self.fields.join(", "));
      }
      if !self.from.is_empty() {
         sql.push_str(" FROM ");
         sql.push_str(&self.from.join(", "));
      }
      self.conditions.render(&mut sql, &mut params);
      if !self.group.is_empty() {
         sql.push_str(" GROUP BY ");
         sql.push_str(&self.group.join(", "));
      }
      if !self.order.is_empty() {
         let order: Vec<String> = self
            .order
            .iter()
            .map(|(field, direction)| format!("{} {}", field, direction.keyword()))
            .collect();
         sql.push_str(" ORDER BY ");
         sql.push_str(&order.join(", "));
      }
      if let Some(limit) = self.limit {
         sql.push_str(&format!(" LIMIT {}", limit));
      }
      if let Some(offset) = self.offset {
         sql.push_str(&format!(" OFFSET {}", offset));
      }

      (sql, params)
   }

   /// Run the statement.
   ///
   /// With [`RunOptions::cursor`] set, the statement is the base of a cursor
   /// page and must not carry its own ORDER BY or LIMIT.
   pub async fn run(self, options: RunOptions) -> Result<RunOutcome> {
      let (sql, params) = self.to_param();
      run_statement(&self.router, sql, params, options, true).await
   }

   /// Run the statement with `LIMIT 1`, returning the row if there is one.
   pub async fn one(self) -> Result<Option<Row>> {
      let (sql, params) = self.to_param();
      execute_one(&self.router, sql.into(), params).await
   }

   /// Fetch one cursor page.
   pub async fn paginate(self, request: CursorRequest) -> Result<PageResult> {
      let (sql, params) = self.to_param();
      paginate(&self.router, &sql, params, &request, false).await
   }

   /// Stream the rows instead of collecting them.
   pub async fn stream(self) -> Result<RowStream> {
      let (sql, params) = self.to_param();
      execute_stream(&self.router, sql.into(), params, self.stream_capacity).await
   }
}

impl<R: Acquire> IntoFuture for SelectBuilder<R> {
   type Output = Result<RunOutcome>;
   type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

   fn into_future(self) -> Self::IntoFuture {
      Box::pin(self.run(RunOptions::default()))
   }
}

// ─── UPDATE ───

/// Builder for UPDATE statements.
#[derive(Debug, Clone)]
pub struct UpdateBuilder<R: Acquire> {
   router: R,
   table: String,
   set: Vec<(String, Param)>,
   conditions: Conditions,
}

impl<R: Acquire> UpdateBuilder<R> {
   pub fn table(mut self, table: impl Into<String>) -> Self {
      self.table = table.into();
      self
   }

   pub fn set(mut self, field: impl Into<String>, value: impl Into<Param>) -> Self {
      self.set.push((field.into(), value.into()));
      self
   }

   pub fn where_(mut self, condition: impl Into<String>, params: impl IntoIterator<Item = Param>) -> Self {
      self.conditions.push(condition.into(), params);
      self
   }

   pub fn where_if_defined<V: Into<Param>>(self, condition: impl Into<String>, value: Option<V>) -> Self {
      match value {
         Some(value) => self.where_(condition, [value.into()]),
         None => self,
      }
   }

   pub fn to_param(&self) -> (String, Vec<Param>) {
      let mut params = Vec::new();
      let assignments: Vec<String> = self
         .set
         .iter()
         .map(|(field, value)| {
            params.push(value.clone());
            format!("{} = ?", field)
         })
         .collect();

      let mut sql = format!("UPDATE {} SET {}", self.table, assignments.join(", "));
      self.conditions.render(&mut sql, &mut params);

      (sql, params)
   }

   pub async fn run(self, options: RunOptions) -> Result<RunOutcome> {
      let (sql, params) = self.to_param();
      run_statement(&self.router, sql, params, options, false).await
   }
}

impl<R: Acquire> IntoFuture for UpdateBuilder<R> {
   type Output = Result<RunOutcome>;
   type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

   fn into_future(self) -> Self::IntoFuture {
      Box::pin(self.run(RunOptions::default()))
   }
}

// ─── DELETE ───

/// Builder for DELETE statements.
#[derive(Debug, Clone)]
pub struct DeleteBuilder<R: Acquire> {
   router: R,
   table: String,
   conditions: Conditions,
}

impl<R: Acquire> DeleteBuilder<R> {
   pub fn from(mut self, table: impl Into<String>) -> Self {
      self.table = table.into();
      self
   }

   pub fn where_(mut self, condition: impl Into<String>, params: impl IntoIterator<Item = Param>) -> Self {
      self.conditions.push(condition.into(), params);
      self
   }

   pub fn where_if_defined<V: Into<Param>>(self, condition: impl Into<String>, value: Option<V>) -> Self {
      match value {
         Some(value) => self.where_(condition, [value.into()]),
         None => self,
      }
   }

   pub fn to_param(&self) -> (String, Vec<Param>) {
      let mut params = Vec::new();
      let mut sql = format!("DELETE FROM {}", self.table);
      self.conditions.render(&mut sql, &mut params);
      (sql, params)
   }

   pub async fn run(self, options: RunOptions) -> Result<RunOutcome> {
      let (sql, params) = self.to_param();
      run_statement(&self.router, sql, params, options, false).await
   }
}

impl<R: Acquire> IntoFuture for DeleteBuilder<R> {
   type Output = Result<RunOutcome>;
   type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

   fn into_future(self) -> Self::IntoFuture {
      Box::pin(self.run(RunOptions::default()))
   }
}

// ─── INSERT ───

/// Builder for single-row INSERT statements.
#[derive(Debug, Clone)]
pub struct InsertBuilder<R: Acquire> {
   router: R,
   table: String,
   set: Vec<(String, Param)>,
}

impl<R: Acquire> InsertBuilder<R> {
   pub fn into(mut self, table: impl Into<String>) -> Self {
      self.table = table.into();
      self
   }

   pub fn set(mut self, field: impl Into<String>, value: impl Into<Param>) -> Self {
      self.set.push((field.into(), value.into()));
      self
   }

   pub fn to_param(&self) -> (String, Vec<Param>) {
      let fields: Vec<&str> = self.set.iter().map(|(field, _)| field.as_str()).collect();
      let placeholders = vec!["?"; fields.len()];
      let sql = format!(
         "INSERT INTO {} ({}) VALUES ({})",
         self.table,
         fields.join(", "),
         placeholders.join(", ")
      );
      let params = self.set.iter().map(|(_, value)| value.clone()).collect();

      (sql, params)
   }

   pub async fn run(self, options: RunOptions) -> Result<RunOutcome> {
      let (sql, params) = self.to_param();
      run_statement(&self.router, sql, params, options, false).await
   }
}

impl<R: Acquire> IntoFuture for InsertBuilder<R> {
   type Output = Result<RunOutcome>;
   type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

   fn into_future(self) -> Self::IntoFuture {
      Box::pin(self.run(RunOptions::default()))
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::router::{Intent, Lease};
   use serde_json::json;

   /// Router for SQL-generation tests; never asked for a connection.
   #[derive(Debug, Clone)]
   struct NoConnection;

   impl Acquire for NoConnection {
      async fn acquire(&self, _intent: Intent) -> Result<Lease> {
         Err(Error::Other("no connection in unit tests".to_string()))
      }
   }

   fn build() -> Build<NoConnection> {
      Build::new(NoConnection, 8)
   }

   // ─── SELECT ───

   #[test]
   fn select_defaults_to_every_column() {
      let (sql, params) = build().select().from("t").to_param();
      assert_eq!(sql, "SELECT * FROM t");
      assert!(params.is_empty());
   }

   #[test]
   fn select_with_every_clause() {
      let (sql, params) = build()
         .select()
         .field("kind")
         .field("COUNT(*) AS n")
         .from("t")
         .where_("a = ?", [Param::from(1)])
         .where_("b IN (?, ?)", [Param::from("x"), Param::from("y")])
         .group("kind")
         .order("n", SortDirection::Desc)
         .limit(10)
         .offset(20)
         .to_param();

      assert_eq!(
         sql,
         "SELECT kind, COUNT(*) AS n FROM t WHERE (a = ?) AND (b IN (?, ?)) GROUP BY kind ORDER BY n DESC LIMIT 10 OFFSET 20"
      );
      assert_eq!(
         params,
         vec![Param::from(1), Param::from("x"), Param::from("y")]
      );
   }

   #[test]
   fn where_if_defined_elides_missing_values() {
      let missing: Option<i64> = None;
      let (sql, params) = build()
         .select()
         .from("t")
         .where_if_defined("a = ?", missing)
         .where_if_defined("b = ?", Some("x"))
         .to_param();

      assert_eq!(sql, "SELECT * FROM t WHERE (b = ?)");
      assert_eq!(params, vec![Param::Value(json!("x"))]);
   }

   #[test]
   fn where_if_defined_without_values_has_no_where() {
      let (sql, _) = build()
         .select()
         .from("t")
         .where_if_defined("a = ?", None::<i64>)
         .to_param();

      assert_eq!(sql, "SELECT * FROM t");
   }

   // ─── UPDATE / DELETE / INSERT ───

   #[test]
   fn update_renders_assignments_before_conditions() {
      let (sql, params) = build()
         .update()
         .table("t")
         .set("a", 1)
         .set("b", "two")
         .where_("id = ?", [Param::from(3)])
         .to_param();

      assert_eq!(sql, "UPDATE t SET a = ?, b = ? WHERE (id = ?)");
      assert_eq!(params, vec![Param::from(1), Param::from("two"), Param::from(3)]);
   }

   #[test]
   fn delete_renders_conditions() {
      let (sql, params) = build()
         .delete()
         .from("t")
         .where_("id = ?", [Param::from(3)])
         .to_param();

      assert_eq!(sql, "DELETE FROM t WHERE (id = ?)");
      assert_eq!(params, vec![Param::from(3)]);
   }

   #[test]
   fn insert_renders_columns_and_placeholders() {
      let (sql, params) = build().insert().into("t").set("a", 1).set("b", true).to_param();

      assert_eq!(sql, "INSERT INTO t (a, b) VALUES (?, ?)");
      assert_eq!(params, vec![Param::from(1), Param::from(true)]);
   }

   // ─── Options ───

   #[tokio::test]
   async fn cursor_on_non_select_is_rejected() {
      let options = RunOptions {
         cursor: Some(CursorRequest::new(["id"]).first(1)),
         ..Default::default()
      };
      let err = build().delete().from("t").run(options).await.unwrap_err();

      assert!(matches!(err, Error::CursorRequiresSelect));
   }

   #[test]
   fn run_options_deserialize_from_camel_case() {
      let options: RunOptions = serde_json::from_value(json!({
         "resultCount": true,
         "nestTables": true,
         "cursor": { "orderBy": "id", "first": 2 }
      }))
      .unwrap();

      assert!(options.result_count);
      assert!(options.nest_tables);
      assert_eq!(options.cursor.unwrap().first, Some(2));
   }
}
