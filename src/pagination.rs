//! Relay-style cursor pagination.
//!
//! A [`CursorRequest`] is turned into keyset SQL over a base SELECT:
//!
//! - `after`/`before` cursors become a boundary predicate on the compound
//!   order key, spliced into the base statement's WHERE clause
//! - the order is appended as `ORDER BY`, flipped when paging backward with
//!   `last` so the rows closest to the boundary come first
//! - `first` (or `last` when paging backward) becomes the LIMIT
//!
//! The statement runs with a follow-up count of the boundary-filtered rows on
//! the same connection. Rows fetched backward are reversed back into the
//! requested order before edges are built.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::cursor::{OrderSpec, SortDirection, decode_cursor, encode_cursor};
use crate::executor::execute_plan;
use crate::router::Acquire;
use crate::scan;
use crate::statement::{Param, Plan, Shape, count_statement, trim_statement};
use crate::{Error, Result, Row};

/// A cursor pagination request.
///
/// `first` pages forward from `after`; `last` alone (or with `before`) pages
/// backward. With neither, every matching row is returned.
///
/// # Examples
///
/// ```
/// use sqlwrap::{CursorRequest, OrderSpec};
///
/// let request = CursorRequest::new([OrderSpec::desc("created_at"), OrderSpec::asc("id")]).first(20);
///
/// let from_json: CursorRequest =
///    serde_json::from_str(r#"{"orderBy":["name","id"],"last":5}"#).unwrap();
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CursorRequest {
   /// Fields defining the order; the last one must be unique-valued
   #[serde(deserialize_with = "one_or_many")]
   pub order_by: Vec<OrderSpec>,
   pub first: Option<u64>,
   pub last: Option<u64>,
   /// Cursor the page starts strictly after
   pub after: Option<String>,
   /// Cursor the page ends strictly before
   pub before: Option<String>,
}

impl CursorRequest {
   pub fn new<I>(order_by: I) -> Self
   where
      I: IntoIterator,
      I::Item: Into<OrderSpec>,
   {
      Self {
         order_by: order_by.into_iter().map(Into::into).collect(),
         ..Default::default()
      }
   }

   pub fn first(mut self, n: u64) -> Self {
      self.first = Some(n);
      self
   }

   pub fn last(mut self, n: u64) -> Self {
      self.last = Some(n);
      self
   }

   pub fn after(mut self, cursor: impl Into<String>) -> Self {
      self.after = Some(cursor.into());
      self
   }

   pub fn before(mut self, cursor: impl Into<String>) -> Self {
      self.before = Some(cursor.into());
      self
   }

   /// Whether rows are scanned against the requested order.
   fn reversed(&self) -> bool {
      self.last.is_some() && self.first.is_none()
   }
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<OrderSpec>, D::Error>
where
   D: Deserializer<'de>,
{
   #[derive(Deserialize)]
   #[serde(untagged)]
   enum OneOrMany {
      Many(Vec<OrderSpec>),
      One(OrderSpec),
   }

   Ok(match OneOrMany::deserialize(deserializer)? {
      OneOrMany::Many(specs) => specs,
      OneOrMany::One(spec) => vec![spec],
   })
}

/// Page-existence flags of a [`PageResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
   pub has_next_page: bool,
   pub has_previous_page: bool,
}

/// A row and the cursor pointing at it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Edge {
   pub node: Row,
   pub cursor: String,
}

/// One page of a cursor-paginated query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResult {
   /// Rows matching the boundaries, ignoring the page limit
   pub result_count: u64,
   pub page_info: PageInfo,
   pub edges: Vec<Edge>,
}

impl PageResult {
   /// Rows of the page, in order.
   pub fn nodes(&self) -> impl Iterator<Item = &Row> {
      self.edges.iter().map(|edge| &edge.node)
   }

   /// Cursor of the last edge, to request the next page with `after`.
   pub fn end_cursor(&self) -> Option<&str> {
      self.edges.last().map(|edge| edge.cursor.as_str())
   }

   /// Cursor of the first edge, to request the previous page with `before`.
   pub fn start_cursor(&self) -> Option<&str> {
      self.edges.first().map(|edge| edge.cursor.as_str())
   }
}

// ─── Predicates ───

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparison {
   Eq,
   Gt,
   Lt,
}

impl Comparison {
   fn symbol(self) -> &'static str {
      match self {
         Comparison::Eq => "=",
         Comparison::Gt => ">",
         Comparison::Lt => "<",
      }
   }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Boundary {
   After,
   Before,
}

impl Boundary {
   /// Comparison selecting rows on this side of a value, for one field.
   fn comparison(self, direction: SortDirection) -> Comparison {
      match (self, direction) {
         (Boundary::After, SortDirection::Asc) | (Boundary::Before, SortDirection::Desc) => {
            Comparison::Gt
         }
         (Boundary::After, SortDirection::Desc) | (Boundary::Before, SortDirection::Asc) => {
            Comparison::Lt
         }
      }
   }
}

/// Boundary condition on the compound order key.
#[derive(Debug, Clone, PartialEq)]
enum Predicate {
   Compare {
      field: String,
      op: Comparison,
      value: JsonValue,
   },
   /// Row-value comparison `(a, b) > (?, ?)`
   RowCompare {
      fields: Vec<String>,
      op: Comparison,
      values: Vec<JsonValue>,
   },
   And(Vec<Predicate>),
   Or(Vec<Predicate>),
}

impl Predicate {
   /// Rows strictly on `side` of `values` in the order of `specs`.
   ///
   /// For k fields this is the union over i of "the first i-1 fields equal
   /// and field i strictly past its value". When every field compares the
   /// same way the union is a single row-value comparison.
   fn boundary(specs: &[OrderSpec], values: &[JsonValue], side: Boundary) -> Predicate {
      let ops: Vec<Comparison> = specs
         .iter()
         .map(|spec| side.comparison(spec.direction))
         .collect();
      let fields: Vec<String> = specs.iter().map(|spec| spec.field.clone()).collect();

      if let [field] = fields.as_slice() {
         return Predicate::Compare {
            field: field.clone(),
            op: ops[0],
            value: values[0].clone(),
         };
      }

      if ops.iter().all(|op| *op == ops[0]) {
         return Predicate::RowCompare {
            fields,
            op: ops[0],
            values: values.to_vec(),
         };
      }

      let branches = (0..fields.len())
         .map(|i| {
            let mut terms: Vec<Predicate> = (0..i)
               .map(|j| Predicate::Compare {
                  field: fields[j].clone(),
                  op: Comparison::Eq,
                  value: values[j].clone(),
               })
               .collect();
            terms.push(Predicate::Compare {
               field: fields[i].clone(),
               op: ops[i],
               value: values[i].clone(),
            });

            if terms.len() == 1 {
               terms.remove(0)
            } else {
               Predicate::And(terms)
            }
         })
         .collect();

      Predicate::Or(branches)
   }

   fn is_compound(&self) -> bool {
      matches!(self, Predicate::And(_) | Predicate::Or(_))
   }

   /// Append the predicate as `??`/`?` SQL, pushing one parameter per
   /// placeholder as it is written.
   fn render(&self, sql: &mut String, params: &mut Vec<Param>) {
      match self {
         Predicate::Compare { field, op, value } => {
            sql.push_str("?? ");
            sql.push_str(op.symbol());
            sql.push_str(" ?");
            params.push(Param::Identifier(field.clone()));
            params.push(Param::Value(value.clone()));
         }
         Predicate::RowCompare { fields, op, values } => {
            sql.push('(');
            for (i, field) in fields.iter().enumerate() {
               if i > 0 {
                  sql.push_str(", ");
               }
               sql.push_str("??");
               params.push(Param::Identifier(field.clone()));
            }
            sql.push_str(") ");
            sql.push_str(op.symbol());
            sql.push_str(" (");
            for (i, value) in values.iter().enumerate() {
               if i > 0 {
                  sql.push_str(", ");
               }
               sql.push('?');
               params.push(Param::Value(value.clone()));
            }
            sql.push(')');
         }
         Predicate::And(terms) => render_joined(terms, " AND ", sql, params),
         Predicate::Or(terms) => render_joined(terms, " OR ", sql, params),
      }
   }
}

fn render_joined(terms: &[Predicate], separator: &str, sql: &mut String, params: &mut Vec<Param>) {
   for (i, term) in terms.iter().enumerate() {
      if i > 0 {
         sql.push_str(separator);
      }
      if term.is_compound() {
         sql.push('(');
         term.render(sql, params);
         sql.push(')');
      } else {
         term.render(sql, params);
      }
   }
}

// ─── Query construction ───

/// Keyset SQL for one page, before parameter rendering.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CursorQuery {
   pub sql: String,
   pub params: Vec<Param>,
   /// Count of the boundary-filtered rows
   pub count_sql: String,
   pub reversed: bool,
}

/// Build the page and count statements for `request` over `sql`.
pub(crate) fn build_cursor_query(
   sql: &str,
   params: Vec<Param>,
   request: &CursorRequest,
) -> Result<CursorQuery> {
   if request.order_by.is_empty() {
      return Err(Error::EmptyOrderBy);
   }
   for spec in &request.order_by {
      spec.validate()?;
   }

   let base = trim_statement(sql);
   if scan::has_top_level_order_or_limit(base) {
      return Err(Error::InvalidPaginationQuery);
   }

   let specs = &request.order_by;
   let reversed = request.reversed();

   let mut boundaries = Vec::new();
   if let Some(token) = &request.after {
      let values = decode_cursor(specs, token)?;
      boundaries.push(Predicate::boundary(specs, &values, Boundary::After));
   }
   if let Some(token) = &request.before {
      let values = decode_cursor(specs, token)?;
      boundaries.push(Predicate::boundary(specs, &values, Boundary::Before));
   }

   let (filtered, mut params) = match boundaries.len() {
      0 => (base.to_string(), params),
      1 => apply_filter(base, params, &boundaries.remove(0)),
      _ => apply_filter(base, params, &Predicate::And(boundaries)),
   };
   let count_sql = count_statement(&filtered);

   let mut sql = filtered;
   sql.push_str(" ORDER BY ");
   for (i, spec) in specs.iter().enumerate() {
      let direction = if reversed {
         spec.direction.reversed()
      } else {
         spec.direction
      };
      if i > 0 {
         sql.push_str(", ");
      }
      sql.push_str("?? ");
      sql.push_str(direction.keyword());
      params.push(Param::Identifier(spec.field.clone()));
   }

   let limit = if reversed { request.last } else { request.first };
   if let Some(limit) = limit {
      sql.push_str(&format!(" LIMIT {}", limit));
   }

   Ok(CursorQuery {
      sql,
      params,
      count_sql,
      reversed,
   })
}

/// Splice `predicate` into the WHERE clause of `base`.
///
/// An existing condition is parenthesized so its own OR terms keep their
/// meaning. The filter goes before any top-level GROUP BY, HAVING or
/// WINDOW clause, and its parameters are inserted at the matching position.
fn apply_filter(base: &str, mut params: Vec<Param>, predicate: &Predicate) -> (String, Vec<Param>) {
   let mut fragment = String::new();
   let mut filter_params = Vec::new();
   predicate.render(&mut fragment, &mut filter_params);

   let split = scan::top_level_grouping(base).unwrap_or(base.len());
   let (head, tail) = base.split_at(split);
   let head = head.trim_end();

   let filtered = match scan::top_level_where(head) {
      Some(pos) => {
         let (clause, condition) = head.split_at(pos + "WHERE".len());
         format!("{} ({}) AND ({})", clause, condition.trim(), fragment)
      }
      None => format!("{} WHERE ({})", head, fragment),
   };

   let at = scan::placeholders(head).len().min(params.len());
   params.splice(at..at, filter_params);

   if tail.is_empty() {
      (filtered, params)
   } else {
      (format!("{} {}", filtered, tail), params)
   }
}

/// Run one page of `request` over the base statement `sql`.
pub(crate) async fn paginate<R: Acquire>(
   router: &R,
   sql: &str,
   params: Vec<Param>,
   request: &CursorRequest,
   nest_tables: bool,
) -> Result<PageResult> {
   let query = build_cursor_query(sql, params, request)?;
   debug!(
      reversed = query.reversed,
      first = ?request.first,
      last = ?request.last,
      "Paginating with cursors"
   );

   let plan = Plan {
      sql: query.sql,
      lenient: false,
      count_sql: Some(query.count_sql),
      nest_tables,
      shape: Shape::Counted,
   };
   let outcome = execute_plan(router, plan, query.params).await?;

   let result_count = outcome.result_count().unwrap_or_default();
   let mut rows = outcome.into_rows();
   if query.reversed {
      if let Some(last) = request.last {
         rows.truncate(usize::try_from(last).unwrap_or(usize::MAX));
      }
      rows.reverse();
   }

   let edges = rows
      .into_iter()
      .map(|node| {
         let cursor = encode_cursor(&request.order_by, &node)?;
         Ok(Edge { node, cursor })
      })
      .collect::<Result<Vec<_>>>()?;

   Ok(PageResult {
      result_count,
      page_info: PageInfo {
         has_next_page: request.first.is_some_and(|first| result_count > first),
         has_previous_page: request.last.is_some_and(|last| result_count > last),
      },
      edges,
   })
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::statement::render;
   use base64::Engine;
   use base64::engine::general_purpose::STANDARD;
   use serde_json::json;

   fn cursor(text: &str) -> String {
      STANDARD.encode(text)
   }

   fn rendered(query: &CursorQuery) -> (String, Vec<JsonValue>) {
      render(&query.sql, &query.params, false).unwrap()
   }

   // ─── Order and limit ───

   #[test]
   fn forward_page_orders_and_limits() {
      let request = CursorRequest::new(["id"]).first(2);
      let query = build_cursor_query("SELECT * FROM t", vec![], &request).unwrap();

      let (sql, values) = rendered(&query);
      assert_eq!(sql, r#"SELECT * FROM t ORDER BY "id" ASC LIMIT 2"#);
      assert!(values.is_empty());
      assert_eq!(query.count_sql, "SELECT COUNT(*) AS count FROM (SELECT * FROM t)");
      assert!(!query.reversed);
   }

   #[test]
   fn backward_page_flips_every_field() {
      let request = CursorRequest::new([OrderSpec::asc("name"), OrderSpec::desc("id")]).last(3);
      let query = build_cursor_query("SELECT * FROM t", vec![], &request).unwrap();

      let (sql, _) = rendered(&query);
      assert_eq!(sql, r#"SELECT * FROM t ORDER BY "name" DESC, "id" ASC LIMIT 3"#);
      assert!(query.reversed);
   }

   #[test]
   fn first_and_last_together_page_forward() {
      let request = CursorRequest::new(["id"]).first(2).last(5);
      let query = build_cursor_query("SELECT * FROM t", vec![], &request).unwrap();

      let (sql, _) = rendered(&query);
      assert_eq!(sql, r#"SELECT * FROM t ORDER BY "id" ASC LIMIT 2"#);
      assert!(!query.reversed);
   }

   #[test]
   fn no_limit_without_first_or_last() {
      let request = CursorRequest::new(["id"]);
      let query = build_cursor_query("SELECT * FROM t;", vec![], &request).unwrap();

      let (sql, _) = rendered(&query);
      assert_eq!(sql, r#"SELECT * FROM t ORDER BY "id" ASC"#);
   }

   #[test]
   fn qualified_fields_are_quoted_per_segment() {
      let request = CursorRequest::new(["t.id"]).first(1);
      let query = build_cursor_query("SELECT * FROM t", vec![], &request).unwrap();

      let (sql, _) = rendered(&query);
      assert_eq!(sql, r#"SELECT * FROM t ORDER BY "t"."id" ASC LIMIT 1"#);
   }

   // ─── Boundaries ───

   #[test]
   fn after_single_field() {
      let request = CursorRequest::new(["id"]).first(10).after(cursor("4"));
      let query = build_cursor_query("SELECT * FROM t", vec![], &request).unwrap();

      let (sql, values) = rendered(&query);
      assert_eq!(
         sql,
         r#"SELECT * FROM t WHERE ("id" > ?) ORDER BY "id" ASC LIMIT 10"#
      );
      assert_eq!(values, vec![json!(4)]);
      assert_eq!(
         query.count_sql,
         r#"SELECT COUNT(*) AS count FROM (SELECT * FROM t WHERE (?? > ?))"#
      );
   }

   #[test]
   fn before_keeps_logical_comparison_when_reversed() {
      let request = CursorRequest::new(["id"]).last(1).before(cursor("3"));
      let query = build_cursor_query("SELECT * FROM t", vec![], &request).unwrap();

      let (sql, _) = rendered(&query);
      assert_eq!(
         sql,
         r#"SELECT * FROM t WHERE ("id" < ?) ORDER BY "id" DESC LIMIT 1"#
      );
   }

   #[test]
   fn uniform_directions_use_row_value_comparison() {
      let request = CursorRequest::new(["field", "id"]).first(5).after(cursor("foo#1"));
      let query = build_cursor_query("SELECT * FROM t", vec![], &request).unwrap();

      let (sql, values) = rendered(&query);
      assert_eq!(
         sql,
         r#"SELECT * FROM t WHERE (("field", "id") > (?, ?)) ORDER BY "field" ASC, "id" ASC LIMIT 5"#
      );
      assert_eq!(values, vec![json!("foo"), json!(1)]);
   }

   #[test]
   fn mixed_directions_expand_to_union() {
      let request = CursorRequest::new([OrderSpec::desc("score"), OrderSpec::asc("id")])
         .first(5)
         .after(cursor("10#7"));
      let query = build_cursor_query("SELECT * FROM t", vec![], &request).unwrap();

      let (sql, values) = rendered(&query);
      assert_eq!(
         sql,
         r#"SELECT * FROM t WHERE ("score" < ? OR ("score" = ? AND "id" > ?)) ORDER BY "score" DESC, "id" ASC LIMIT 5"#
      );
      assert_eq!(values, vec![json!(10), json!(10), json!(7)]);
   }

   #[test]
   fn after_and_before_combine() {
      let request = CursorRequest::new(["id"])
         .first(10)
         .after(cursor("2"))
         .before(cursor("8"));
      let query = build_cursor_query("SELECT * FROM t", vec![], &request).unwrap();

      let (sql, values) = rendered(&query);
      assert_eq!(
         sql,
         r#"SELECT * FROM t WHERE ("id" > ? AND "id" < ?) ORDER BY "id" ASC LIMIT 10"#
      );
      assert_eq!(values, vec![json!(2), json!(8)]);
   }

   #[test]
   fn existing_where_is_parenthesized_and_params_stay_aligned() {
      let request = CursorRequest::new(["id"]).first(2).after(cursor("5"));
      let query = build_cursor_query(
         "SELECT * FROM t WHERE kind = ? OR kind = ?",
         vec![Param::from("a"), Param::from("b")],
         &request,
      )
      .unwrap();

      let (sql, values) = rendered(&query);
      assert_eq!(
         sql,
         r#"SELECT * FROM t WHERE (kind = ? OR kind = ?) AND ("id" > ?) ORDER BY "id" ASC LIMIT 2"#
      );
      assert_eq!(values, vec![json!("a"), json!("b"), json!(5)]);
   }

   #[test]
   fn filter_goes_before_group_by() {
      let request = CursorRequest::new(["kind"]).first(2).after(cursor("a"));
      let query = build_cursor_query(
         "SELECT kind, COUNT(*) AS n FROM t GROUP BY kind HAVING COUNT(*) > ?",
         vec![Param::from(1)],
         &request,
      )
      .unwrap();

      let (sql, values) = rendered(&query);
      assert_eq!(
         sql,
         r#"SELECT kind, COUNT(*) AS n FROM t WHERE ("kind" > ?) GROUP BY kind HAVING COUNT(*) > ? ORDER BY "kind" ASC LIMIT 2"#
      );
      assert_eq!(values, vec![json!("a"), json!(1)]);
   }

   #[test]
   fn subquery_where_is_not_the_statement_where() {
      let request = CursorRequest::new(["id"]).first(1).after(cursor("1"));
      let query = build_cursor_query(
         "SELECT * FROM (SELECT * FROM t WHERE id > 0) AS sub",
         vec![],
         &request,
      )
      .unwrap();

      let (sql, _) = rendered(&query);
      assert_eq!(
         sql,
         r#"SELECT * FROM (SELECT * FROM t WHERE id > 0) AS sub WHERE ("id" > ?) ORDER BY "id" ASC LIMIT 1"#
      );
   }

   // ─── Validation ───

   #[test]
   fn rejects_empty_order() {
      let err = build_cursor_query("SELECT * FROM t", vec![], &CursorRequest::default()).unwrap_err();
      assert!(matches!(err, Error::EmptyOrderBy));
   }

   #[test]
   fn rejects_top_level_order_or_limit() {
      let request = CursorRequest::new(["id"]).first(1);
      for sql in ["SELECT * FROM t ORDER BY id", "SELECT * FROM t LIMIT 5"] {
         let err = build_cursor_query(sql, vec![], &request).unwrap_err();
         assert!(matches!(err, Error::InvalidPaginationQuery), "{sql}");
      }
   }

   #[test]
   fn rejects_unsafe_field_names() {
      let request = CursorRequest::new(["id; DROP TABLE t"]).first(1);
      let err = build_cursor_query("SELECT * FROM t", vec![], &request).unwrap_err();
      assert!(matches!(err, Error::InvalidColumnName { .. }));
   }

   #[test]
   fn rejects_cursor_for_other_order() {
      let request = CursorRequest::new(["id"]).first(1).after(cursor("foo#1"));
      let err = build_cursor_query("SELECT * FROM t", vec![], &request).unwrap_err();
      assert!(matches!(err, Error::CursorLengthMismatch { .. }));
   }

   // ─── Request deserialization ───

   #[test]
   fn deserializes_single_order_field() {
      let request: CursorRequest =
         serde_json::from_value(json!({ "orderBy": "id", "first": 3, "after": "MQ==" })).unwrap();

      assert_eq!(request.order_by.len(), 1);
      assert_eq!(request.first, Some(3));
      assert_eq!(request.after.as_deref(), Some("MQ=="));
   }

   #[test]
   fn deserializes_order_object_and_list() {
      let one: CursorRequest =
         serde_json::from_value(json!({ "orderBy": { "field": "id", "direction": "desc" } })).unwrap();
      assert_eq!(one.order_by[0].direction, SortDirection::Desc);

      let many: CursorRequest =
         serde_json::from_value(json!({ "orderBy": ["name", { "field": "id", "direction": "ASC" }], "last": 2 }))
            .unwrap();
      assert_eq!(many.order_by.len(), 2);
      assert_eq!(many.last, Some(2));
   }
}
