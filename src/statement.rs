//! Statements, parameters, and the normalizer that turns them into
//! executable SQL.
//!
//! A [`Query`] is either raw SQL text or a structured [`Statement`] carrying
//! result-shaping flags. Normalizing a query produces a [`Plan`]: the SQL to
//! run, the optional follow-up count statement, and the shape of the result.
//!
//! Placeholders are positional. `?` binds a value and `??` inlines an
//! identifier, quoted per dot-separated segment (`t.col` → `"t"."col"`).

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::scan::{self, PlaceholderKind};
use crate::{Error, Result};

/// A positional statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
   /// Bound for a `?` placeholder
   Value(JsonValue),
   /// Quoted and inlined for a `??` placeholder
   Identifier(String),
}

impl Param {
   /// Create a value parameter.
   pub fn value(value: impl Into<JsonValue>) -> Self {
      Param::Value(value.into())
   }

   /// Create an identifier parameter (table or column name).
   pub fn identifier(name: impl Into<String>) -> Self {
      Param::Identifier(name.into())
   }
}

impl From<JsonValue> for Param {
   fn from(value: JsonValue) -> Self {
      Param::Value(value)
   }
}

impl From<&str> for Param {
   fn from(value: &str) -> Self {
      Param::Value(JsonValue::from(value))
   }
}

impl From<String> for Param {
   fn from(value: String) -> Self {
      Param::Value(JsonValue::from(value))
   }
}

impl From<i64> for Param {
   fn from(value: i64) -> Self {
      Param::Value(JsonValue::from(value))
   }
}

impl From<i32> for Param {
   fn from(value: i32) -> Self {
      Param::Value(JsonValue::from(value))
   }
}

impl From<f64> for Param {
   fn from(value: f64) -> Self {
      Param::Value(JsonValue::from(value))
   }
}

impl From<bool> for Param {
   fn from(value: bool) -> Self {
      Param::Value(JsonValue::from(value))
   }
}

/// Offset pagination request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
   /// 1-based page number
   pub page: u64,
   /// Rows per page
   #[serde(alias = "perPage")]
   pub results_per_page: u64,
}

impl PageRequest {
   /// Create a page request; both values must be at least 1.
   pub fn new(page: u64, results_per_page: u64) -> Result<Self> {
      let request = Self {
         page,
         results_per_page,
      };
      request.validate()?;
      Ok(request)
   }

   pub(crate) fn validate(&self) -> Result<()> {
      if self.page == 0 {
         return Err(Error::InvalidPage);
      }
      if self.results_per_page == 0 {
         return Err(Error::InvalidPageSize);
      }
      Ok(())
   }

   pub(crate) fn offset(&self) -> u64 {
      (self.page - 1).saturating_mul(self.results_per_page)
   }
}

/// SQL text with result-shaping flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Statement {
   /// SQL text with `?` / `??` placeholders
   pub sql: String,
   /// Group each row's columns by table (`table.column` labels)
   pub nest_tables: bool,
   /// Replace any LIMIT with a page window and report page counts
   pub paginate: Option<PageRequest>,
   /// Report the number of rows the statement matches without its LIMIT
   pub result_count: bool,
}

impl Statement {
   /// Create a statement with default flags.
   pub fn new(sql: impl Into<String>) -> Self {
      Self {
         sql: sql.into(),
         ..Default::default()
      }
   }

   /// Group each row's columns by table.
   pub fn nest_tables(mut self) -> Self {
      self.nest_tables = true;
      self
   }

   /// Request an offset page of results.
   pub fn paginate(mut self, request: PageRequest) -> Self {
      self.paginate = Some(request);
      self
   }

   /// Request the total row count alongside the results.
   pub fn result_count(mut self) -> Self {
      self.result_count = true;
      self
   }
}

/// Raw SQL text or a structured statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
   Text(String),
   Statement(Statement),
}

impl Query {
   /// Resolve into a statement; raw text gets default flags.
   pub fn into_statement(self) -> Statement {
      match self {
         Query::Text(sql) => Statement::new(sql),
         Query::Statement(statement) => statement,
      }
   }
}

impl From<&str> for Query {
   fn from(sql: &str) -> Self {
      Query::Text(sql.to_string())
   }
}

impl From<String> for Query {
   fn from(sql: String) -> Self {
      Query::Text(sql)
   }
}

impl From<&String> for Query {
   fn from(sql: &String) -> Self {
      Query::Text(sql.clone())
   }
}

impl From<Statement> for Query {
   fn from(statement: Statement) -> Self {
      Query::Statement(statement)
   }
}

/// How the executor shapes the rows of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Shape {
   Rows,
   Counted,
   Paginated(PageRequest),
}

/// Normalized statement ready for rendering and execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Plan {
   pub sql: String,
   /// Trailing parameters belong to a stripped LIMIT and are discarded
   pub lenient: bool,
   /// Follow-up count statement, bound with a prefix of the parameters
   pub count_sql: Option<String>,
   pub nest_tables: bool,
   pub shape: Shape,
}

impl Plan {
   /// Plan a statement whose rows are wanted as-is.
   pub fn rows(sql: String, nest_tables: bool) -> Self {
      Self {
         sql,
         lenient: false,
         count_sql: None,
         nest_tables,
         shape: Shape::Rows,
      }
   }
}

/// Remove a trailing LIMIT clause and any trailing `;`.
///
/// Returns the stripped text and whether a LIMIT was removed. The match is
/// textual: a literal ` LIMIT ` earlier in the statement (inside a string or
/// subquery) is treated as the clause.
pub(crate) fn strip_limit(sql: &str) -> (String, bool) {
   static RE: OnceLock<Regex> = OnceLock::new();
   let re = RE.get_or_init(|| {
      // Everything from the first whitespace-delimited LIMIT to the end
      Regex::new(r"(?is)\sLIMIT\s.*$").expect("invalid regex")
   });
   let stripped = re.replace(sql, "");
   let removed = stripped.len() != sql.len();
   (trim_statement(&stripped).to_string(), removed)
}

pub(crate) fn trim_statement(sql: &str) -> &str {
   sql.trim().trim_end_matches(';').trim_end()
}

pub(crate) fn count_statement(sql: &str) -> String {
   format!("SELECT COUNT(*) AS count FROM ({})", sql)
}

/// Rewrite a query for execution.
///
/// - `paginate`: the LIMIT is replaced with `LIMIT n OFFSET (page-1)*n` and
///   a count of the un-limited statement follows
/// - `result_count`: the statement runs unchanged and a count of the
///   un-limited statement follows
pub(crate) fn normalize(query: Query) -> Result<Plan> {
   let statement = query.into_statement();

   if let Some(page) = statement.paginate {
      page.validate()?;
      let (stripped, removed) = strip_limit(&statement.sql);
      return Ok(Plan {
         sql: format!(
            "{} LIMIT {} OFFSET {}",
            stripped,
            page.results_per_page,
            page.offset()
         ),
         lenient: removed,
         count_sql: Some(count_statement(&stripped)),
         nest_tables: statement.nest_tables,
         shape: Shape::Paginated(page),
      });
   }

   if statement.result_count {
      let (stripped, _) = strip_limit(&statement.sql);
      return Ok(Plan {
         sql: statement.sql,
         lenient: false,
         count_sql: Some(count_statement(&stripped)),
         nest_tables: statement.nest_tables,
         shape: Shape::Counted,
      });
   }

   Ok(Plan::rows(statement.sql, statement.nest_tables))
}

/// Rewrite a query to fetch at most one row.
pub(crate) fn normalize_one(query: Query) -> Plan {
   let statement = query.into_statement();
   let (stripped, removed) = strip_limit(&statement.sql);

   Plan {
      sql: format!("{} LIMIT 1", stripped),
      lenient: removed,
      count_sql: None,
      nest_tables: statement.nest_tables,
      shape: Shape::Rows,
   }
}

/// Quote an identifier for SQLite, one double-quoted segment per
/// dot-separated part.
///
/// Embedded double quotes are doubled per SQL standard (`"` → `""`).
pub(crate) fn quote_identifier(name: &str) -> String {
   name
      .split('.')
      .map(|segment| format!("\"{}\"", segment.replace('"', "\"\"")))
      .collect::<Vec<_>>()
      .join(".")
}

/// Inline identifier parameters and collect the values to bind.
///
/// Parameters align with placeholders left to right. With `lenient`, extra
/// trailing parameters are dropped instead of rejected.
pub(crate) fn render(sql: &str, params: &[Param], lenient: bool) -> Result<(String, Vec<JsonValue>)> {
   let found = scan::placeholders(sql);

   if params.len() < found.len() || (!lenient && params.len() > found.len()) {
      return Err(Error::ParameterCountMismatch {
         placeholders: found.len(),
         params: params.len(),
      });
   }

   let mut rendered = String::with_capacity(sql.len());
   let mut values = Vec::new();
   let mut cursor = 0;

   for (position, (placeholder, param)) in found.iter().zip(params).enumerate() {
      rendered.push_str(&sql[cursor..placeholder.start]);
      match (placeholder.kind, param) {
         (PlaceholderKind::Value, Param::Value(value)) => {
            rendered.push('?');
            values.push(value.clone());
         }
         (PlaceholderKind::Identifier, Param::Identifier(name)) => {
            rendered.push_str(&quote_identifier(name));
         }
         (PlaceholderKind::Value, Param::Identifier(_)) => {
            return Err(Error::PlaceholderMismatch {
               position,
               expected: "value",
            });
         }
         (PlaceholderKind::Identifier, Param::Value(_)) => {
            return Err(Error::PlaceholderMismatch {
               position,
               expected: "identifier",
            });
         }
      }
      cursor = placeholder.end;
   }
   rendered.push_str(&sql[cursor..]);

   Ok((rendered, values))
}
