//! Lexical scanning of SQL text.
//!
//! The scanner understands just enough SQL to tell real clauses and
//! placeholders apart from look-alikes: it skips quoted strings, quoted
//! identifiers (`"…"` and `` `…` ``), and comments, and tracks parenthesis
//! depth so subqueries can be told apart from the outer statement.

/// Kind of a positional placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PlaceholderKind {
   /// `?`, bound as a value
   Value,
   /// `??`, replaced by a quoted identifier
   Identifier,
}

/// A placeholder found in SQL text, with its byte span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Placeholder {
   pub start: usize,
   pub end: usize,
   pub kind: PlaceholderKind,
}

/// Check whether `keyword` appears as a standalone keyword at position `i`
/// in the uppercased byte slice `bytes` (length `len`).
///
/// "Standalone" means the character before and after the keyword (if present)
/// is not an identifier character (`[A-Z0-9_]`).
fn is_keyword_at(bytes: &[u8], len: usize, i: usize, keyword: &[u8]) -> bool {
   let klen = keyword.len();
   if i + klen > len {
      return false;
   }
   if &bytes[i..i + klen] != keyword {
      return false;
   }
   let before_ok = i == 0 || (!bytes[i - 1].is_ascii_alphanumeric() && bytes[i - 1] != b'_');
   let after_ok =
      i + klen >= len || (!bytes[i + klen].is_ascii_alphanumeric() && bytes[i + klen] != b'_');

   before_ok && after_ok
}

/// Advance past a quoted literal or identifier.
///
/// `quote` is the opening quote character. Doubled quotes (`''`, `""`,
/// ` `` `) are escapes. Returns the position of the closing quote, or the
/// end of input when unterminated.
fn skip_quoted(bytes: &[u8], len: usize, i: usize, quote: u8) -> usize {
   let mut j = i + 1;
   while j < len {
      if bytes[j] == quote {
         if j + 1 < len && bytes[j + 1] == quote {
            j += 2;
            continue;
         }
         return j;
      }
      j += 1;
   }
   j
}

/// Advance past a `--` line comment (until newline or end).
fn skip_line_comment(bytes: &[u8], len: usize, i: usize) -> usize {
   let mut j = i + 2;
   while j < len && bytes[j] != b'\n' {
      j += 1;
   }
   j
}

/// Advance past a `/* … */` block comment; returns the position of the
/// closing `/`.
fn skip_block_comment(bytes: &[u8], len: usize, i: usize) -> usize {
   let mut j = i + 2;
   while j + 1 < len {
      if bytes[j] == b'*' && bytes[j + 1] == b'/' {
         return j + 1;
      }
      j += 1;
   }
   len.saturating_sub(1)
}

/// Walk `bytes`, skipping quoted sections and comments, and call `visit`
/// with `(position, depth)` for every other byte.
///
/// `visit` returns `Some(n)` to consume `n` bytes at that position (at least
/// one) or `None` to move on by one byte.
fn walk(bytes: &[u8], mut visit: impl FnMut(usize, i32) -> Option<usize>) {
   let len = bytes.len();
   let mut depth: i32 = 0;
   let mut i = 0;

   while i < len {
      match bytes[i] {
         b'(' => depth += 1,
         b')' => depth -= 1,
         quote @ (b'\'' | b'"' | b'`') => {
            i = skip_quoted(bytes, len, i, quote);
         }
         b'-' if i + 1 < len && bytes[i + 1] == b'-' => {
            i = skip_line_comment(bytes, len, i);
         }
         b'/' if i + 1 < len && bytes[i + 1] == b'*' => {
            i = skip_block_comment(bytes, len, i);
         }
         _ => {
            if let Some(consumed) = visit(i, depth) {
               i += consumed.max(1);
               continue;
            }
         }
      }
      i += 1;
   }
}

/// Byte offset of the first of `keywords` at paren depth 0, outside quotes
/// and comments.
fn find_top_level_keyword(query: &str, keywords: &[&[u8]]) -> Option<usize> {
   // ASCII uppercasing keeps byte offsets aligned with the original text
   let upper = query.to_ascii_uppercase();
   let bytes = upper.as_bytes();
   let len = bytes.len();
   let mut found = None;

   walk(bytes, |i, depth| {
      if found.is_none()
         && depth == 0
         && keywords
            .iter()
            .any(|keyword| is_keyword_at(bytes, len, i, keyword))
      {
         found = Some(i);
      }
      None
   });

   found
}

/// Whether the statement has an ORDER BY or LIMIT clause of its own
/// (ignoring subqueries, comments, and string literals).
pub(crate) fn has_top_level_order_or_limit(query: &str) -> bool {
   find_top_level_keyword(query, &[b"ORDER BY", b"LIMIT"]).is_some()
}

/// Offset of the statement's own WHERE keyword.
pub(crate) fn top_level_where(query: &str) -> Option<usize> {
   find_top_level_keyword(query, &[b"WHERE"])
}

/// Offset of the first top-level clause that must follow WHERE
/// (`GROUP BY`, `HAVING`, `WINDOW`).
pub(crate) fn top_level_grouping(query: &str) -> Option<usize> {
   find_top_level_keyword(query, &[b"GROUP BY", b"HAVING", b"WINDOW"])
}

/// Find every `?` and `??` placeholder outside quotes and comments, in
/// left-to-right order.
pub(crate) fn placeholders(sql: &str) -> Vec<Placeholder> {
   let bytes = sql.as_bytes();
   let len = bytes.len();
   let mut found = Vec::new();

   walk(bytes, |i, _| {
      if bytes[i] != b'?' {
         return None;
      }
      if i + 1 < len && bytes[i + 1] == b'?' {
         found.push(Placeholder {
            start: i,
            end: i + 2,
            kind: PlaceholderKind::Identifier,
         });
         Some(2)
      } else {
         found.push(Placeholder {
            start: i,
            end: i + 1,
            kind: PlaceholderKind::Value,
         });
         Some(1)
      }
   });

   found
}

#[cfg(test)]
mod tests {
   use super::*;

   // ─── has_top_level_order_or_limit ───

   #[test]
   fn detects_top_level_order_by() {
      assert!(has_top_level_order_or_limit("SELECT * FROM posts ORDER BY id"));
   }

   #[test]
   fn detects_top_level_limit() {
      assert!(has_top_level_order_or_limit("SELECT * FROM posts LIMIT 10"));
   }

   #[test]
   fn accepts_clean_query() {
      assert!(!has_top_level_order_or_limit(
         "SELECT * FROM posts WHERE category = ?"
      ));
   }

   #[test]
   fn ignores_order_by_and_limit_inside_subquery() {
      assert!(!has_top_level_order_or_limit(
         "SELECT * FROM (SELECT * FROM posts ORDER BY id LIMIT 5)"
      ));
   }

   #[test]
   fn detects_order_by_after_subquery() {
      assert!(has_top_level_order_or_limit(
         "SELECT * FROM (SELECT * FROM posts LIMIT 5) ORDER BY id"
      ));
   }

   #[test]
   fn keyword_must_stand_alone() {
      assert!(!has_top_level_order_or_limit("SELECT limits FROM speed_limit"));
   }

   // ─── comments and quoted sections ───

   #[test]
   fn ignores_order_by_in_line_comment() {
      assert!(!has_top_level_order_or_limit("SELECT * FROM posts -- ORDER BY id"));
   }

   #[test]
   fn ignores_limit_in_block_comment() {
      assert!(!has_top_level_order_or_limit("SELECT * FROM posts /* LIMIT 10 */"));
   }

   #[test]
   fn ignores_keywords_in_escaped_single_quotes() {
      assert!(!has_top_level_order_or_limit(
         "SELECT * FROM t WHERE name = 'order''s ORDER BY clause'"
      ));
   }

   #[test]
   fn ignores_keywords_in_quoted_identifiers() {
      assert!(!has_top_level_order_or_limit(r#"SELECT "ORDER BY" FROM posts"#));
      assert!(!has_top_level_order_or_limit("SELECT `limit` FROM posts"));
   }

   #[test]
   fn detects_limit_after_line_comment() {
      assert!(has_top_level_order_or_limit(
         "SELECT * FROM posts -- comment\nLIMIT 10"
      ));
   }

   #[test]
   fn non_ascii_text_keeps_offsets_aligned() {
      assert!(top_level_where("SELECT 'straße' AS s FROM t WHERE id = 1").is_some());
      assert!(top_level_where("SELECT 'ß WHERE' FROM t").is_none());
   }

   // ─── top_level_where / top_level_grouping ───

   #[test]
   fn finds_top_level_where() {
      assert_eq!(top_level_where("SELECT * FROM posts WHERE id > 5"), Some(20));
   }

   #[test]
   fn no_where_clause() {
      assert_eq!(top_level_where("SELECT * FROM posts"), None);
   }

   #[test]
   fn where_inside_subquery_only() {
      assert_eq!(
         top_level_where("SELECT * FROM (SELECT * FROM posts WHERE id > 5)"),
         None
      );
   }

   #[test]
   fn where_is_case_insensitive() {
      assert_eq!(top_level_where("select * from posts where id > 5"), Some(20));
   }

   #[test]
   fn finds_grouping_clause() {
      let sql = "SELECT kind, COUNT(*) FROM posts GROUP BY kind HAVING COUNT(*) > 1";
      assert_eq!(top_level_grouping(sql), Some(33));
   }

   #[test]
   fn grouping_inside_subquery_is_ignored() {
      let sql = "SELECT * FROM (SELECT kind FROM posts GROUP BY kind) AS k";
      assert_eq!(top_level_grouping(sql), None);
   }

   // ─── placeholders ───

   #[test]
   fn finds_value_and_identifier_placeholders_in_order() {
      let found = placeholders("SELECT ?? FROM ?? WHERE id = ? AND name = ?");
      let kinds: Vec<PlaceholderKind> = found.iter().map(|p| p.kind).collect();

      assert_eq!(
         kinds,
         vec![
            PlaceholderKind::Identifier,
            PlaceholderKind::Identifier,
            PlaceholderKind::Value,
            PlaceholderKind::Value,
         ]
      );
      assert_eq!((found[0].start, found[0].end), (7, 9));
   }

   #[test]
   fn ignores_question_marks_in_literals_and_comments() {
      let found = placeholders("SELECT '?', \"a?\" FROM t /* ? */ WHERE a = ? -- ??");

      assert_eq!(found.len(), 1);
      assert_eq!(found[0].kind, PlaceholderKind::Value);
   }

   #[test]
   fn adjacent_value_placeholders_in_lists() {
      let found = placeholders("INSERT INTO t VALUES (?,?)");

      assert_eq!(found.len(), 2);
      assert!(found.iter().all(|p| p.kind == PlaceholderKind::Value));
   }
}
