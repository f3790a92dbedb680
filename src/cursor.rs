//! Order specifications and opaque cursor tokens.
//!
//! A cursor is `base64("v1#v2#…")`: one text value per order field, in order.
//! `#` and `\` inside a value are escaped with a backslash.

use std::fmt;
use std::sync::{Arc, OnceLock};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

use crate::decode::lookup;
use crate::{Error, Result, Row};

/// Turns an order field's value into cursor text.
pub type SerializeFn = Arc<dyn Fn(&JsonValue) -> String + Send + Sync>;

/// Turns cursor text back into a comparable value.
pub type DeserializeFn = Arc<dyn Fn(&str) -> JsonValue + Send + Sync>;

const SEPARATOR: char = '#';
const ESCAPE: char = '\\';

/// Sort direction of one order field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortDirection {
   #[default]
   #[serde(rename = "asc", alias = "ASC")]
   Asc,
   #[serde(rename = "desc", alias = "DESC")]
   Desc,
}

impl SortDirection {
   /// The opposite direction.
   pub fn reversed(self) -> Self {
      match self {
         SortDirection::Asc => SortDirection::Desc,
         SortDirection::Desc => SortDirection::Asc,
      }
   }

   pub(crate) fn keyword(self) -> &'static str {
      match self {
         SortDirection::Asc => "ASC",
         SortDirection::Desc => "DESC",
      }
   }
}

/// One field of a cursor ordering.
///
/// The last field of an ordering must be unique-valued, or rows sharing its
/// value straddle page boundaries.
///
/// # Examples
///
/// ```
/// use serde_json::Value;
/// use sqlwrap::OrderSpec;
///
/// let by_created = OrderSpec::desc("created_at");
/// let by_id = OrderSpec::asc("id").deserialize_with(|text| {
///    text.parse::<i64>().map(Value::from).unwrap_or(Value::Null)
/// });
/// ```
#[derive(Clone)]
pub struct OrderSpec {
   pub field: String,
   pub direction: SortDirection,
   serialize: Option<SerializeFn>,
   deserialize: Option<DeserializeFn>,
}

impl OrderSpec {
   pub fn new(field: impl Into<String>, direction: SortDirection) -> Self {
      Self {
         field: field.into(),
         direction,
         serialize: None,
         deserialize: None,
      }
   }

   pub fn asc(field: impl Into<String>) -> Self {
      Self::new(field, SortDirection::Asc)
   }

   pub fn desc(field: impl Into<String>) -> Self {
      Self::new(field, SortDirection::Desc)
   }

   /// Use `f` to turn this field's value into cursor text.
   pub fn serialize_with(mut self, f: impl Fn(&JsonValue) -> String + Send + Sync + 'static) -> Self {
      self.serialize = Some(Arc::new(f));
      self
   }

   /// Use `f` to turn cursor text into this field's boundary value.
   pub fn deserialize_with(mut self, f: impl Fn(&str) -> JsonValue + Send + Sync + 'static) -> Self {
      self.deserialize = Some(Arc::new(f));
      self
   }

   pub fn is_ascending(&self) -> bool {
      self.direction == SortDirection::Asc
   }

   fn to_text(&self, value: &JsonValue) -> String {
      match &self.serialize {
         Some(f) => f(value),
         None => match value {
            JsonValue::String(text) => text.clone(),
            other => other.to_string(),
         },
      }
   }

   fn from_text(&self, text: &str) -> JsonValue {
      match &self.deserialize {
         Some(f) => f(text),
         None => number_or_text(text),
      }
   }

   /// Reject field names that could not be safely quoted as identifiers.
   pub(crate) fn validate(&self) -> Result<()> {
      static RE: OnceLock<Regex> = OnceLock::new();
      let re = RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.]*$").expect("invalid regex"));

      if re.is_match(&self.field) {
         Ok(())
      } else {
         Err(Error::InvalidColumnName {
            name: self.field.clone(),
         })
      }
   }
}

impl fmt::Debug for OrderSpec {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("OrderSpec")
         .field("field", &self.field)
         .field("direction", &self.direction)
         .field("serialize", &self.serialize.is_some())
         .field("deserialize", &self.deserialize.is_some())
         .finish()
   }
}

impl From<&str> for OrderSpec {
   fn from(field: &str) -> Self {
      Self::asc(field)
   }
}

impl From<String> for OrderSpec {
   fn from(field: String) -> Self {
      Self::asc(field)
   }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OrderSpecRepr {
   Field(String),
   Spec {
      field: String,
      #[serde(default)]
      direction: SortDirection,
   },
}

impl<'de> Deserialize<'de> for OrderSpec {
   fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
      Ok(match OrderSpecRepr::deserialize(deserializer)? {
         OrderSpecRepr::Field(field) => OrderSpec::asc(field),
         OrderSpecRepr::Spec { field, direction } => OrderSpec::new(field, direction),
      })
   }
}

/// Encode the cursor of `row` under `specs`.
pub fn encode_cursor(specs: &[OrderSpec], row: &Row) -> Result<String> {
   let mut joined = String::new();

   for (i, spec) in specs.iter().enumerate() {
      let value = lookup(row, &spec.field).ok_or_else(|| Error::CursorColumnNotFound {
         column: spec.field.clone(),
      })?;

      if i > 0 {
         joined.push(SEPARATOR);
      }
      for ch in spec.to_text(value).chars() {
         if ch == SEPARATOR || ch == ESCAPE {
            joined.push(ESCAPE);
         }
         joined.push(ch);
      }
   }

   Ok(STANDARD.encode(joined))
}

/// Decode a cursor into one boundary value per spec.
pub fn decode_cursor(specs: &[OrderSpec], token: &str) -> Result<Vec<JsonValue>> {
   let bytes = STANDARD.decode(token).map_err(|e| Error::CursorDecode {
      reason: e.to_string(),
   })?;
   let text = String::from_utf8(bytes).map_err(|e| Error::CursorDecode {
      reason: e.to_string(),
   })?;

   let parts = split_escaped(&text);
   if parts.len() != specs.len() {
      return Err(Error::CursorLengthMismatch {
         cursor_len: parts.len(),
         order_len: specs.len(),
      });
   }

   Ok(specs
      .iter()
      .zip(parts)
      .map(|(spec, part)| spec.from_text(&part))
      .collect())
}

/// Numbers written by the default serializer come back as numbers.
///
/// Only text that is exactly a JSON number's rendering converts, so `"007"`
/// stays text. Expression columns have no affinity and SQLite sorts every
/// INTEGER before any TEXT, so a numeric boundary bound as text would match
/// nothing on that side.
fn number_or_text(text: &str) -> JsonValue {
   match serde_json::from_str::<serde_json::Number>(text) {
      Ok(number) if number.to_string() == text => JsonValue::Number(number),
      _ => JsonValue::String(text.to_string()),
   }
}

fn split_escaped(text: &str) -> Vec<String> {
   let mut parts = Vec::new();
   let mut current = String::new();
   let mut chars = text.chars();

   while let Some(ch) = chars.next() {
      match ch {
         ESCAPE => current.push(chars.next().unwrap_or(ESCAPE)),
         SEPARATOR => parts.push(std::mem::take(&mut current)),
         _ => current.push(ch),
      }
   }
   parts.push(current);

   parts
}
