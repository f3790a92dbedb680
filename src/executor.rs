//! Running normalized statements on leased connections.
//!
//! Every path follows the same protocol: render parameters, classify,
//! acquire, run, release. The lease is released explicitly once the last
//! statement of the call has finished, on success and on error alike.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::sqlite::{SqliteArguments, SqliteConnection};
use sqlx::{Row as _, Sqlite, query::Query as SqlxQuery};
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::decode::{decode_row, decode_rows};
use crate::router::{Acquire, Intent, classify};
use crate::statement::{Param, Plan, Query, Shape, normalize, normalize_one, render};
use crate::stream::RowStream;
use crate::{Error, Result, Row};

/// Result returned from write operations (e.g. INSERT, UPDATE, DELETE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteQueryResult {
   /// The number of rows affected by the write operation.
   ///
   /// SQLite does not distinguish matched from changed rows, so this is
   /// also the changed-row count of an UPDATE.
   pub rows_affected: u64,
   /// The last inserted row ID (SQLite ROWID).
   ///
   /// Only set for INSERT operations on tables with a ROWID.
   /// Tables created with `WITHOUT ROWID` will not set this value (returns 0).
   pub last_insert_id: i64,
}

/// Result of [`DatabaseWrapper::query`](crate::DatabaseWrapper::query).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryOutcome {
   /// Rows of a plain read
   Rows(Vec<Row>),
   /// Rows plus the un-limited match count
   #[serde(rename_all = "camelCase")]
   Counted { result_count: u64, results: Vec<Row> },
   /// One offset page plus page bookkeeping
   #[serde(rename_all = "camelCase")]
   Paginated {
      result_count: u64,
      page_count: u64,
      current_page: u64,
      results: Vec<Row>,
   },
   /// Outcome of a write statement
   Write(WriteQueryResult),
}

impl QueryOutcome {
   /// The rows of a read outcome; empty for writes.
   pub fn into_rows(self) -> Vec<Row> {
      match self {
         QueryOutcome::Rows(rows) => rows,
         QueryOutcome::Counted { results, .. } | QueryOutcome::Paginated { results, .. } => results,
         QueryOutcome::Write(_) => Vec::new(),
      }
   }

   /// The match count, when one was requested.
   pub fn result_count(&self) -> Option<u64> {
      match self {
         QueryOutcome::Counted { result_count, .. } | QueryOutcome::Paginated { result_count, .. } => {
            Some(*result_count)
         }
         _ => None,
      }
   }

   /// The write result, or an error for read outcomes.
   pub fn into_write(self) -> Result<WriteQueryResult> {
      match self {
         QueryOutcome::Write(result) => Ok(result),
         _ => Err(Error::Other(
            "statement returned rows where a write result was expected".to_string(),
         )),
      }
   }
}

/// Helper function to bind a JSON value to a SQLx query
pub(crate) fn bind_value<'a>(
   query: SqlxQuery<'a, Sqlite, SqliteArguments<'a>>,
   value: JsonValue,
) -> SqlxQuery<'a, Sqlite, SqliteArguments<'a>> {
   match value {
      JsonValue::Null => query.bind(None::<JsonValue>),
      JsonValue::String(text) => query.bind(text),
      JsonValue::Bool(flag) => query.bind(flag),
      JsonValue::Number(number) => {
         // Preserve integer precision by binding as i64 when possible
         if let Some(int_val) = number.as_i64() {
            query.bind(int_val)
         } else if let Some(uint_val) = number.as_u64() {
            // Value too large for i64, use f64 (will lose precision)
            query.bind(uint_val as f64)
         } else {
            query.bind(number.as_f64().unwrap_or_default())
         }
      }
      // Arrays and objects are stored as JSON text
      other => query.bind(other),
   }
}

fn build_query(sql: &str, values: Vec<JsonValue>) -> SqlxQuery<'_, Sqlite, SqliteArguments<'_>> {
   let mut q = sqlx::query(sql);
   for value in values {
      q = bind_value(q, value);
   }
   q
}

/// A plan with its parameters rendered, ready to run.
struct Prepared {
   intent: Intent,
   sql: String,
   values: Vec<JsonValue>,
   count: Option<(String, Vec<JsonValue>)>,
   nest_tables: bool,
   shape: Shape,
}

fn prepare(plan: Plan, params: &[Param]) -> Result<Prepared> {
   let (sql, values) = render(&plan.sql, params, plan.lenient)?;
   let count = match plan.count_sql {
      Some(count_sql) => Some(render(&count_sql, params, true)?),
      None => None,
   };

   Ok(Prepared {
      intent: classify(&sql),
      sql,
      values,
      count,
      nest_tables: plan.nest_tables,
      shape: plan.shape,
   })
}

/// Normalize, route, and run a query.
pub(crate) async fn execute<R: Acquire>(
   router: &R,
   query: Query,
   params: Vec<Param>,
) -> Result<QueryOutcome> {
   execute_plan(router, normalize(query)?, params).await
}

/// Run a query that returns at most one row; zero rows is `None`.
pub(crate) async fn execute_one<R: Acquire>(
   router: &R,
   query: Query,
   params: Vec<Param>,
) -> Result<Option<Row>> {
   let outcome = execute_plan(router, normalize_one(query), params).await?;
   Ok(outcome.into_rows().into_iter().next())
}

/// Run an already normalized plan.
pub(crate) async fn execute_plan<R: Acquire>(
   router: &R,
   plan: Plan,
   params: Vec<Param>,
) -> Result<QueryOutcome> {
   let prepared = prepare(plan, &params)?;

   let mut lease = router.acquire(prepared.intent).await?;
   debug!(intent = ?prepared.intent, pinned = lease.is_pinned(), sql = %prepared.sql, "Executing statement");

   let outcome = run(&mut lease, prepared).await;
   lease.release();

   outcome
}

async fn run(conn: &mut SqliteConnection, prepared: Prepared) -> Result<QueryOutcome> {
   let Prepared {
      intent,
      sql,
      values,
      count,
      nest_tables,
      shape,
   } = prepared;

   if intent == Intent::Write && count.is_none() {
      let result = build_query(&sql, values).execute(&mut *conn).await?;
      return Ok(QueryOutcome::Write(WriteQueryResult {
         rows_affected: result.rows_affected(),
         last_insert_id: result.last_insert_rowid(),
      }));
   }

   let rows = build_query(&sql, values).fetch_all(&mut *conn).await?;
   let results = decode_rows(&rows, nest_tables)?;

   // The count runs on the same connection, right after the statement
   let result_count = match count {
      Some((count_sql, count_values)) => {
         let row = build_query(&count_sql, count_values)
            .fetch_one(&mut *conn)
            .await?;
         Some(row.try_get::<i64, _>(0)?.max(0) as u64)
      }
      None => None,
   };

   Ok(match (shape, result_count) {
      (Shape::Paginated(page), Some(result_count)) => QueryOutcome::Paginated {
         result_count,
         page_count: result_count.div_ceil(page.results_per_page),
         current_page: page.page,
         results,
      },
      (_, Some(result_count)) => QueryOutcome::Counted {
         result_count,
         results,
      },
      (_, None) => QueryOutcome::Rows(results),
   })
}

/// Run a query and stream its rows through a channel.
///
/// The lease moves into a background task that owns it for the stream's
/// lifetime. It is released exactly once: after the last row, after the
/// first error, or as soon as the consumer drops the stream. Count and
/// pagination counts are not computed for streams.
pub(crate) async fn execute_stream<R: Acquire>(
   router: &R,
   query: Query,
   params: Vec<Param>,
   capacity: usize,
) -> Result<RowStream> {
   let prepared = prepare(normalize(query)?, &params)?;
   let Prepared {
      intent,
      sql,
      values,
      nest_tables,
      ..
   } = prepared;

   let mut lease = router.acquire(intent).await?;
   debug!(intent = ?intent, pinned = lease.is_pinned(), sql = %sql, "Streaming statement");

   let (tx, rx) = mpsc::channel(capacity.max(1));

   tokio::spawn(async move {
      {
         use futures::StreamExt;

         let mut rows = build_query(&sql, values).fetch(&mut *lease);
         while let Some(item) = rows.next().await {
            let item = item
               .map_err(Error::from)
               .and_then(|row| decode_row(&row, nest_tables));
            let failed = item.is_err();

            if let Err(ref e) = item {
               error!(error = %e, sql = %sql, "Row stream failed");
            }
            // Consumer went away; stop reading
            if tx.send(item).await.is_err() || failed {
               break;
            }
         }
      }

      lease.release();
      drop(tx);
   });

   Ok(RowStream::new(rx))
}
