//! Query building: conditions, update sets, options and statement rendering.
//!
//! Callers describe *what* they want with [`Condition`], [`UpdateSet`], [`QueryOptions`] and
//! [`JoinConfig`]. [`QueryPlan`] turns that description into a [`Statement`], always applying
//! the parts in the same order:
//!
//! 1. selected fields
//! 2. joins (in the order given)
//! 3. result conditions
//! 4. preloads (issued as follow-up statements)
//! 5. ordering
//! 6. limit / offset
//!
//! The order builder methods are called in does not change the rendered SQL.

mod pagination;
mod plan;
mod statement;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub use pagination::{DEFAULT_LIMIT, DEFAULT_PAGE, Page, PageInfo, Pagination};
pub use plan::{QueryPlan, insert_statement, update_statement};
pub use statement::{Statement, quote_ident};

pub(crate) use plan::preload_statement;
pub(crate) use statement::column_ref;
use statement::{is_plain_identifier, populated_field};

use crate::db::errors::Result;
use crate::db::value::{Row, Value, is_zero_json};

/// A row filter.
///
/// An empty condition of any shape means "no filter". Operations that need a filter reject it
/// with [`DbError::ConditionRequired`](crate::db::errors::DbError::ConditionRequired).
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Column equals value, AND-ed. `Null` values render as `IS NULL`; values for plain column
    /// names are converted to the column's type by the server.
    Equality(BTreeMap<String, Value>),
    /// Non-zero fields of a partial record, compared after conversion to the table's row type.
    Template(serde_json::Map<String, serde_json::Value>),
    /// A SQL predicate with `?` placeholders.
    Raw { sql: String, args: Vec<Value> },
}

impl Condition {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::Equality(BTreeMap::from([(column.into(), value.into())]))
    }

    pub fn equality<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Condition::Equality(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    /// Use the set fields of a (partial) record as equality filters.
    ///
    /// Fields holding their zero value (null, `0`, `false`, `""`) are ignored.
    pub fn template<T: Serialize>(record: &T) -> Result<Self> {
        let fields = match serde_json::to_value(record)? {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        Ok(Condition::Template(
            fields.into_iter().filter(|(_, v)| !is_zero_json(v)).collect(),
        ))
    }

    pub fn raw(sql: impl Into<String>, args: impl IntoIterator<Item = Value>) -> Self {
        Condition::Raw {
            sql: sql.into(),
            args: args.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Condition::Equality(map) => map.is_empty(),
            Condition::Template(map) => map.is_empty(),
            Condition::Raw { sql, .. } => sql.trim().is_empty(),
        }
    }

    pub(crate) fn render(&self, stmt: &mut Statement, table: &str, qualify: bool) {
        match self {
            Condition::Equality(map) => {
                // One JSON record per target table, so every value is converted to its column type.
                let mut records: BTreeMap<&str, Row> = BTreeMap::new();
                for (key, value) in map.iter().filter(|(_, v)| !v.is_null()) {
                    if let Some((target, column)) = typed_target(key, table, qualify) {
                        records.entry(target).or_default().insert(column.to_string(), value.to_json());
                    }
                }

                let mut bound: BTreeMap<&str, String> = BTreeMap::new();
                let mut parts = Vec::with_capacity(map.len());
                for (key, value) in map {
                    let column = if qualify { column_ref(table, key) } else { quote_ident(key) };
                    if value.is_null() {
                        parts.push(format!("{column} IS NULL"));
                        continue;
                    }
                    let rhs = match typed_target(key, table, qualify) {
                        Some((target, field)) => {
                            let record = bound.entry(target).or_insert_with(|| {
                                let fields = records.remove(target).unwrap_or_default();
                                stmt.push_arg(Value::Json(serde_json::Value::Object(fields)))
                            });
                            populated_field(target, record, field)
                        }
                        None => stmt.push_arg(value.clone()),
                    };
                    parts.push(format!("{column} = {rhs}"));
                }
                stmt.push_str(&parts.join(" AND "));
            }
            Condition::Template(fields) => {
                let record = stmt.push_arg(Value::Json(serde_json::Value::Object(fields.clone())));
                let parts: Vec<String> = fields
                    .keys()
                    .map(|field| format!("{} = {}", column_ref(table, field), populated_field(table, &record, field)))
                    .collect();
                stmt.push_str(&parts.join(" AND "));
            }
            Condition::Raw { sql, args } => {
                stmt.push_str("(");
                stmt.push_fragment(sql, args.iter().cloned());
                stmt.push_str(")");
            }
        }
    }
}

/// The table and column an equality key is converted through: `table.column` keys name their
/// table, bare keys belong to `table` unless joins make that ambiguous. Other keys (expressions,
/// schema-qualified names) are compared to a plain parameter.
fn typed_target<'a>(key: &'a str, table: &'a str, qualify: bool) -> Option<(&'a str, &'a str)> {
    if !is_plain_identifier(key) {
        return None;
    }
    match key.split_once('.') {
        Some((target, column)) if !column.contains('.') => Some((target, column)),
        Some(_) => None,
        None if qualify => Some((table, key)),
        None => None,
    }
}

/// Column → new value for an update. Columns are applied in name order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateSet(BTreeMap<String, Value>);

impl UpdateSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(column.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for UpdateSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Options for [`Database::find_many`](crate::db::Database::find_many).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryOptions {
    pub pagination: Option<Pagination>,
    /// Free-form ordering expression, e.g. `created_at DESC, id`
    pub order_by: Option<String>,
    /// Association names to load eagerly
    pub preloads: Vec<String>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn paginate(mut self, page: i64, limit: i64) -> Self {
        self.pagination = Some(Pagination::new(page, limit));
        self
    }

    pub fn order_by(mut self, order: impl Into<String>) -> Self {
        self.order_by = Some(order.into());
        self
    }

    pub fn preload(mut self, association: impl Into<String>) -> Self {
        self.preloads.push(association.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JoinKind {
    #[default]
    Inner,
    Left,
    Right,
    Full,
}

impl fmt::Display for JoinKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            JoinKind::Inner => "INNER",
            JoinKind::Left => "LEFT",
            JoinKind::Right => "RIGHT",
            JoinKind::Full => "FULL",
        };
        f.write_str(kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinClause {
    #[serde(rename = "type", default)]
    pub kind: JoinKind,
    pub table: String,
    /// Join predicate, passed through as written
    pub on: String,
}

impl JoinClause {
    pub fn new(kind: JoinKind, table: impl Into<String>, on: impl Into<String>) -> Self {
        Self {
            kind,
            table: table.into(),
            on: on.into(),
        }
    }

    pub(crate) fn render(&self) -> String {
        format!("{} JOIN {} ON {}", self.kind, quote_ident(&self.table), self.on)
    }
}

/// A multi-table query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinConfig {
    pub base_table: String,
    pub joins: Vec<JoinClause>,
    /// Selected fields; defaults to every column of the base table
    pub select: Option<String>,
    /// Equality filters keyed by (usually table-qualified) column
    pub conditions: BTreeMap<String, Value>,
    pub preloads: Vec<String>,
    pub order_by: Option<String>,
    /// Applied only when positive
    pub limit: Option<i64>,
    /// Applied only when positive
    pub offset: Option<i64>,
}

impl JoinConfig {
    pub fn new(base_table: impl Into<String>) -> Self {
        Self {
            base_table: base_table.into(),
            ..Default::default()
        }
    }

    pub fn join(mut self, clause: JoinClause) -> Self {
        self.joins.push(clause);
        self
    }

    pub fn select(mut self, fields: impl Into<String>) -> Self {
        self.select = Some(fields.into());
        self
    }

    pub fn condition(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.insert(column.into(), value.into());
        self
    }

    pub fn preload(mut self, association: impl Into<String>) -> Self {
        self.preloads.push(association.into());
        self
    }

    pub fn order_by(mut self, order: impl Into<String>) -> Self {
        self.order_by = Some(order.into());
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;
    use serde_json::json;

    #[derive(Serialize, Default)]
    struct UserFilter {
        email: String,
        active: bool,
        age: Option<i32>,
    }

    #[test]
    fn template_keeps_only_set_fields() {
        let cond = Condition::template(&UserFilter {
            email: "a@example.com".into(),
            ..Default::default()
        })
        .unwrap();
        match cond {
            Condition::Template(fields) => {
                assert_eq!(fields.len(), 1);
                assert_eq!(fields["email"], json!("a@example.com"));
            }
            other => panic!("unexpected condition {other:?}"),
        }
        assert!(Condition::template(&UserFilter::default()).unwrap().is_empty());
    }

    #[test]
    fn equality_renders_qualified_and_null_aware() {
        let cond = Condition::equality([("status", Value::from("open")), ("deleted_at", Value::Null)]);
        let mut stmt = Statement::default();
        cond.render(&mut stmt, "tickets", true);
        assert_eq!(
            stmt.sql,
            "\"tickets\".\"deleted_at\" IS NULL AND \
             \"tickets\".\"status\" = (jsonb_populate_record(NULL::\"tickets\", $1)).\"status\""
        );
        assert_eq!(stmt.args, vec![Value::Json(json!({"status": "open"}))]);
    }

    #[test]
    fn equality_values_convert_through_their_own_table() {
        let cond = Condition::equality([
            ("orders.placed_by", Value::from("4f1c2a9e-0000-4000-8000-000000000001")),
            ("users.id", Value::Int(3)),
            ("users.status", Value::from("active")),
            ("lower(users.email)", Value::from("a@example.com")),
        ]);
        let mut stmt = Statement::default();
        cond.render(&mut stmt, "users", false);
        assert_eq!(
            stmt.sql,
            "lower(users.email) = $1 AND \
             \"orders\".\"placed_by\" = (jsonb_populate_record(NULL::\"orders\", $2)).\"placed_by\" AND \
             \"users\".\"id\" = (jsonb_populate_record(NULL::\"users\", $3)).\"id\" AND \
             \"users\".\"status\" = (jsonb_populate_record(NULL::\"users\", $3)).\"status\""
        );
        assert_eq!(
            stmt.args,
            vec![
                Value::from("a@example.com"),
                Value::Json(json!({"placed_by": "4f1c2a9e-0000-4000-8000-000000000001"})),
                Value::Json(json!({"id": 3, "status": "active"})),
            ]
        );
    }

    #[test]
    fn template_binds_the_record_once() {
        let cond = Condition::Template(json!({"email": "a@example.com", "org_id": 4}).as_object().unwrap().clone());
        let mut stmt = Statement::default();
        cond.render(&mut stmt, "users", true);
        assert_eq!(
            stmt.sql,
            "\"users\".\"email\" = (jsonb_populate_record(NULL::\"users\", $1)).\"email\" AND \
             \"users\".\"org_id\" = (jsonb_populate_record(NULL::\"users\", $1)).\"org_id\""
        );
        assert_eq!(stmt.args.len(), 1);
    }

    #[test]
    fn join_config_deserializes_from_json() {
        let config: JoinConfig = serde_json::from_value(json!({
            "base_table": "users",
            "joins": [{"type": "LEFT", "table": "orders", "on": "orders.user_id = users.id"}],
            "conditions": {"users.active": true},
            "limit": 5
        }))
        .unwrap();
        assert_eq!(config.joins[0].kind, JoinKind::Left);
        assert_eq!(config.joins[0].render(), "LEFT JOIN \"orders\" ON orders.user_id = users.id");
        assert_eq!(config.conditions["users.active"], Value::Bool(true));
        assert_eq!(config.limit, Some(5));
    }

    #[test]
    fn update_set_collects_from_pairs() {
        let set: UpdateSet = [("name", Value::from("x")), ("age", Value::from(3))].into_iter().collect();
        assert_eq!(set.len(), 2);
        assert_eq!(set.iter().next().map(|(k, _)| k.as_str()), Some("age"));
    }
}
