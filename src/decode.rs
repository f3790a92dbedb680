//! SQLite values and rows to JSON

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Value as JsonValue};
use sqlx::sqlite::{SqliteRow, SqliteValue, SqliteValueRef};
use sqlx::{Column, Row as _, TypeInfo, Value, ValueRef};

use crate::{Error, Result, Row};

/// Convert a SQLite value to JSON by its storage class.
///
/// BLOBs become base64 strings; `BOOLEAN` columns come back as integers.
pub(crate) fn to_json(v: SqliteValueRef) -> Result<JsonValue> {
   if v.is_null() {
      return Ok(JsonValue::Null);
   }

   let value = v.to_owned();
   let decoded = match v.type_info().name() {
      "TEXT" | "DATE" | "TIME" | "DATETIME" => JsonValue::String(decode(&value)?),
      "INTEGER" | "NUMERIC" | "BOOLEAN" => JsonValue::from(decode::<i64>(&value)?),
      "REAL" => JsonValue::from(decode::<f64>(&value)?),
      "BLOB" => JsonValue::String(STANDARD.encode(decode::<Vec<u8>>(&value)?)),
      "NULL" => JsonValue::Null,
      other => return Err(Error::UnsupportedDatatype(other.to_string())),
   };

   Ok(decoded)
}

fn decode<T>(value: &SqliteValue) -> Result<T>
where
   T: for<'r> sqlx::Decode<'r, sqlx::Sqlite>,
{
   value
      .try_decode_unchecked::<T>()
      .map_err(Error::Sqlx)
}

/// Decode one row into a column-label map.
///
/// With `nest_tables`, a label `table.column` is placed under
/// `row[table][column]` and a label without a dot under `row[""][label]`.
pub(crate) fn decode_row(row: &SqliteRow, nest_tables: bool) -> Result<Row> {
   let mut decoded = Row::default();

   for (i, column) in row.columns().iter().enumerate() {
      let value = to_json(row.try_get_raw(i)?)?;

      if !nest_tables {
         decoded.insert(column.name().to_string(), value);
         continue;
      }

      let (table, field) = column.name().split_once('.').unwrap_or(("", column.name()));
      let entry = decoded
         .entry(table.to_string())
         .or_insert_with(|| JsonValue::Object(Map::new()));
      if let JsonValue::Object(fields) = entry {
         fields.insert(field.to_string(), value);
      }
   }

   Ok(decoded)
}

/// Decode a batch of rows.
pub(crate) fn decode_rows(rows: &[SqliteRow], nest_tables: bool) -> Result<Vec<Row>> {
   rows.iter().map(|row| decode_row(row, nest_tables)).collect()
}

/// Look up a field in a decoded row.
///
/// Tries the full label, then a nested `table.column` path, then the
/// label's last segment.
pub(crate) fn lookup<'a>(row: &'a Row, field: &str) -> Option<&'a JsonValue> {
   if let Some(value) = row.get(field) {
      return Some(value);
   }

   if let Some((table, column)) = field.rsplit_once('.') {
      if let Some(value) = row.get(table).and_then(|nested| nested.get(column)) {
         return Some(value);
      }
      return row.get(column);
   }

   None
}
