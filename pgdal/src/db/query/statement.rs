//! SQL text with positional parameters.

use crate::db::value::Value;

/// A rendered statement: SQL using `$n` placeholders plus the values bound to them, in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub args: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            args: Vec::new(),
        }
    }

    /// A caller-written statement using `?` placeholders (see [`Statement::push_fragment`]).
    pub fn raw(query: &str, args: impl IntoIterator<Item = Value>) -> Self {
        let mut stmt = Self::default();
        stmt.push_fragment(query, args);
        stmt
    }

    pub fn push_str(&mut self, sql: &str) {
        self.sql.push_str(sql);
    }

    /// Register a parameter and return the SQL that refers to it.
    ///
    /// `NULL` is inlined instead of bound.
    pub fn push_arg(&mut self, value: Value) -> String {
        if value.is_null() {
            return "NULL".to_string();
        }
        self.args.push(value);
        format!("${}", self.args.len())
    }

    /// Append a fragment written with `?` placeholders, renumbering them to `$n`.
    ///
    /// `??` produces a literal `?`. Question marks inside quoted text (`'...'`, `E'...'`,
    /// `"..."`, `$tag$...$tag$`) and comments (`--`, `/* */`) are left untouched. Each
    /// placeholder consumes the next value from `args`. Values left over, nulls included, are
    /// bound as they are so the engine reports the arity mismatch.
    pub fn push_fragment(&mut self, fragment: &str, args: impl IntoIterator<Item = Value>) {
        let mut args = args.into_iter();
        let mut pos = 0;
        let mut prev: Option<char> = None;

        while let Some(ch) = fragment[pos..].chars().next() {
            if let Some(len) = verbatim_len(&fragment[pos..], prev) {
                self.sql.push_str(&fragment[pos..pos + len]);
                pos += len;
                prev = fragment[..pos].chars().next_back();
                continue;
            }

            pos += ch.len_utf8();
            prev = Some(ch);
            if ch != '?' {
                self.sql.push(ch);
            } else if fragment[pos..].starts_with('?') {
                pos += 1;
                self.sql.push('?');
            } else if let Some(value) = args.next() {
                let placeholder = self.push_arg(value);
                self.sql.push_str(&placeholder);
            } else {
                self.sql.push('?');
            }
        }

        self.args.extend(args);
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Length of the quoted literal or comment starting `sql`, if one starts there.
///
/// Unterminated literals and comments run to the end of the input.
fn verbatim_len(sql: &str, prev: Option<char>) -> Option<usize> {
    let bytes = sql.as_bytes();
    match bytes.first()? {
        b'-' if sql.starts_with("--") => Some(sql.find('\n').map_or(sql.len(), |i| i + 1)),
        b'/' if sql.starts_with("/*") => {
            let mut depth = 0usize;
            let mut i = 0;
            while i < bytes.len() {
                if bytes[i..].starts_with(b"/*") {
                    depth += 1;
                    i += 2;
                } else if bytes[i..].starts_with(b"*/") {
                    depth -= 1;
                    i += 2;
                    if depth == 0 {
                        return Some(i);
                    }
                } else {
                    i += 1;
                }
            }
            Some(sql.len())
        }
        b'\'' => {
            let backslash_escapes = matches!(prev, Some('E' | 'e'));
            let mut i = 1;
            while i < bytes.len() {
                match bytes[i] {
                    b'\\' if backslash_escapes => i += 2,
                    b'\'' => return Some(i + 1),
                    _ => i += 1,
                }
            }
            Some(sql.len())
        }
        b'"' => Some(sql[1..].find('"').map_or(sql.len(), |i| i + 2)),
        b'$' if !prev.is_some_and(is_ident_char) => {
            let tag_len = sql[1..].find(|c: char| !(c.is_alphanumeric() || c == '_'))? + 2;
            let tag = &sql[..tag_len];
            let starts_like_ident = tag[1..].chars().next().is_none_or(|c| c == '$' || !c.is_ascii_digit());
            if !tag.ends_with('$') || !starts_like_ident {
                return None;
            }
            Some(sql[tag_len..].find(tag).map_or(sql.len(), |i| tag_len + i + tag_len))
        }
        _ => None,
    }
}

pub(crate) fn is_plain_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

/// Double-quote an identifier path (`users.email` → `"users"."email"`).
///
/// Anything that is not a plain dotted identifier (expressions, `*`, already quoted names) is
/// returned as written.
pub fn quote_ident(name: &str) -> String {
    if !is_plain_identifier(name) {
        return name.to_string();
    }
    name.split('.')
        .map(|part| format!("\"{part}\""))
        .collect::<Vec<_>>()
        .join(".")
}

/// Reference `column` of `table`, qualifying it unless it already names a table.
pub(crate) fn column_ref(table: &str, column: &str) -> String {
    if is_plain_identifier(column) && !column.contains('.') {
        format!("{}.{}", quote_ident(table), quote_ident(column))
    } else {
        quote_ident(column)
    }
}

/// `(jsonb_populate_record(NULL::"table", $n))."column"`: the field `column` of the JSON object
/// bound at `record`, converted by the server to the column's type.
pub(crate) fn populated_field(table: &str, record: &str, column: &str) -> String {
    format!(
        "(jsonb_populate_record(NULL::{}, {record})).{}",
        quote_ident(table),
        quote_ident(column)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragments_are_renumbered_after_existing_args() {
        let mut stmt = Statement::new("SELECT * FROM \"users\" WHERE \"users\".\"id\" = ");
        let first = stmt.push_arg(Value::Int(1));
        stmt.push_str(&first);
        stmt.push_str(" AND ");
        stmt.push_fragment("age > ? AND name <> ?", [Value::Int(18), Value::from("bob")]);

        assert_eq!(
            stmt.sql,
            "SELECT * FROM \"users\" WHERE \"users\".\"id\" = $1 AND age > $2 AND name <> $3"
        );
        assert_eq!(stmt.args.len(), 3);
    }

    #[test]
    fn quoted_and_escaped_question_marks_survive() {
        let stmt = Statement::raw(
            "SELECT 'why?' AS q, data ?? 'key' AS has_key FROM t WHERE id = ?",
            [Value::Int(5)],
        );
        assert_eq!(stmt.sql, "SELECT 'why?' AS q, data ? 'key' AS has_key FROM t WHERE id = $1");
        assert_eq!(stmt.args, vec![Value::Int(5)]);
    }

    #[test]
    fn null_arguments_are_inlined() {
        let stmt = Statement::raw("UPDATE t SET deleted_at = ? WHERE id = ?", [Value::Null, Value::Int(3)]);
        assert_eq!(stmt.sql, "UPDATE t SET deleted_at = NULL WHERE id = $1");
        assert_eq!(stmt.args, vec![Value::Int(3)]);
    }

    #[test]
    fn comments_and_dollar_quotes_are_skipped() {
        let stmt = Statement::raw(
            "SELECT id -- don't match ?\nFROM t /* what? /* nested? */ still? */ WHERE a = ? AND b = ?",
            [Value::Int(1), Value::Int(2)],
        );
        assert_eq!(
            stmt.sql,
            "SELECT id -- don't match ?\nFROM t /* what? /* nested? */ still? */ WHERE a = $1 AND b = $2"
        );

        let stmt = Statement::raw(
            "SELECT $fn$ it's? $fn$, $$why?$$, E'it\\'s?' FROM t WHERE id = ?",
            [Value::Int(3)],
        );
        assert_eq!(stmt.sql, "SELECT $fn$ it's? $fn$, $$why?$$, E'it\\'s?' FROM t WHERE id = $1");
        assert_eq!(stmt.args, vec![Value::Int(3)]);
    }

    #[test]
    fn positional_dollar_parameters_are_not_quotes() {
        let stmt = Statement::raw("SELECT $1::int, ? FROM t WHERE note = 'x?'", [Value::Int(4)]);
        assert_eq!(stmt.sql, "SELECT $1::int, $1 FROM t WHERE note = 'x?'");
    }

    #[test]
    fn leftover_arguments_are_bound_including_nulls() {
        let stmt = Statement::raw("DELETE FROM t WHERE id = ?", [Value::Int(1), Value::Null, Value::Int(2)]);
        assert_eq!(stmt.sql, "DELETE FROM t WHERE id = $1");
        assert_eq!(stmt.args, vec![Value::Int(1), Value::Null, Value::Int(2)]);
    }

    #[test]
    fn identifiers_are_quoted_only_when_plain() {
        assert_eq!(quote_ident("users.email"), "\"users\".\"email\"");
        assert_eq!(quote_ident("created_at"), "\"created_at\"");
        assert_eq!(quote_ident("users.*"), "users.*");
        assert_eq!(quote_ident("lower(email)"), "lower(email)");
        assert_eq!(column_ref("users", "email"), "\"users\".\"email\"");
        assert_eq!(column_ref("users", "orders.total"), "\"orders\".\"total\"");
        assert_eq!(
            populated_field("users", "$2", "status"),
            "(jsonb_populate_record(NULL::\"users\", $2)).\"status\""
        );
    }
}
