use crate::db::query::{Condition, JoinClause, JoinConfig, Pagination, QueryOptions, Statement, UpdateSet, column_ref, quote_ident};
use crate::db::value::{Row, Value};

use super::statement::{is_plain_identifier, populated_field};

/// A read query under construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryPlan {
    table: String,
    select: Option<String>,
    joins: Vec<JoinClause>,
    conditions: Vec<Condition>,
    preloads: Vec<String>,
    order_by: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

impl QueryPlan {
    pub fn from_table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Default::default()
        }
    }

    /// Build the plan described by a join configuration.
    pub fn for_joins(config: &JoinConfig) -> Self {
        let mut plan = Self::from_table(config.base_table.clone());
        if let Some(select) = config.select.as_deref().filter(|s| !s.trim().is_empty()) {
            plan = plan.select(select);
        }
        for clause in &config.joins {
            plan = plan.join(clause.clone());
        }
        if !config.conditions.is_empty() {
            plan = plan.filter(Condition::Equality(config.conditions.clone()));
        }
        for name in &config.preloads {
            plan = plan.preload(name.clone());
        }
        if let Some(order) = &config.order_by {
            plan = plan.order_by(order.clone());
        }
        if let Some(limit) = config.limit.filter(|l| *l > 0) {
            plan = plan.limit(limit);
        }
        if let Some(offset) = config.offset.filter(|o| *o > 0) {
            plan = plan.offset(offset);
        }
        plan
    }

    pub fn select(mut self, fields: impl Into<String>) -> Self {
        self.select = Some(fields.into());
        self
    }

    pub fn join(mut self, clause: JoinClause) -> Self {
        self.joins.push(clause);
        self
    }

    /// Add a filter; empty conditions are ignored.
    pub fn filter(mut self, condition: Condition) -> Self {
        if !condition.is_empty() {
            self.conditions.push(condition);
        }
        self
    }

    pub fn preload(mut self, association: impl Into<String>) -> Self {
        self.preloads.push(association.into());
        self
    }

    pub fn order_by(mut self, order: impl Into<String>) -> Self {
        let order = order.into();
        if !order.trim().is_empty() {
            self.order_by = Some(order);
        }
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

    pub fn paginate(self, pagination: Pagination) -> Self {
        let p = pagination.normalized();
        self.limit(p.limit).offset(p.offset())
    }

    pub fn apply(mut self, options: &QueryOptions) -> Self {
        if let Some(pagination) = options.pagination {
            self = self.paginate(pagination);
        }
        if let Some(order) = &options.order_by {
            self = self.order_by(order.clone());
        }
        for name in &options.preloads {
            self = self.preload(name.clone());
        }
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Associations to load with follow-up statements once the main rows are fetched.
    pub fn preloads(&self) -> &[String] {
        &self.preloads
    }

    pub fn to_select(&self) -> Statement {
        let select = match &self.select {
            Some(fields) => fields.clone(),
            None if self.joins.is_empty() => "*".to_string(),
            None => format!("{}.*", quote_ident(&self.table)),
        };
        let mut stmt = Statement::new(format!("SELECT {select}"));
        self.push_from(&mut stmt);
        if let Some(order) = &self.order_by {
            stmt.push_str(&format!(" ORDER BY {order}"));
        }
        if let Some(limit) = self.limit {
            stmt.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = self.offset {
            stmt.push_str(&format!(" OFFSET {offset}"));
        }
        stmt
    }

    /// Count the rows the plan matches, ignoring ordering and pagination.
    pub fn to_count(&self) -> Statement {
        let mut stmt = Statement::new("SELECT COUNT(*) AS count");
        self.push_from(&mut stmt);
        stmt
    }

    fn push_from(&self, stmt: &mut Statement) {
        stmt.push_str(&format!(" FROM {}", quote_ident(&self.table)));
        for clause in &self.joins {
            stmt.push_str(" ");
            stmt.push_str(&clause.render());
        }
        // Unqualified equality keys belong to the base table unless joins make that ambiguous.
        let qualify = self.joins.is_empty();
        for (i, condition) in self.conditions.iter().enumerate() {
            stmt.push_str(if i == 0 { " WHERE " } else { " AND " });
            condition.render(stmt, &self.table, qualify);
        }
    }
}

/// `INSERT` one record, letting column defaults fill the fields absent from `fields`.
pub fn insert_statement(table: &str, fields: &Row) -> Statement {
    let table = quote_ident(table);
    if fields.is_empty() {
        return Statement::new(format!("INSERT INTO {table} DEFAULT VALUES RETURNING *"));
    }

    let columns = fields.keys().map(|k| quote_ident(k)).collect::<Vec<_>>().join(", ");
    let mut stmt = Statement::default();
    let record = stmt.push_arg(Value::Json(serde_json::Value::Object(fields.clone())));
    stmt.push_str(&format!(
        "INSERT INTO {table} ({columns}) SELECT {columns} FROM jsonb_populate_record(NULL::{table}, {record}) RETURNING *"
    ));
    stmt
}

/// `UPDATE` the rows matching every condition.
///
/// New values are bound as one JSON record and converted to the column types by the server, so
/// text can be assigned to uuid, timestamp or enum columns.
pub fn update_statement(table: &str, updates: &UpdateSet, conditions: &[Condition]) -> Statement {
    let mut stmt = Statement::new(format!("UPDATE {} SET ", quote_ident(table)));
    let typed = |column: &str| is_plain_identifier(column) && !column.contains('.');

    let record: Row = updates
        .iter()
        .filter(|(column, value)| !value.is_null() && typed(column.as_str()))
        .map(|(column, value)| (column.clone(), value.to_json()))
        .collect();
    let placeholder = (!record.is_empty()).then(|| stmt.push_arg(Value::Json(serde_json::Value::Object(record))));

    let mut assignments = Vec::with_capacity(updates.len());
    for (column, value) in updates.iter() {
        let rhs = match &placeholder {
            _ if value.is_null() => "NULL".to_string(),
            Some(record) if typed(column.as_str()) => populated_field(table, record, column),
            _ => stmt.push_arg(value.clone()),
        };
        assignments.push(format!("{} = {rhs}", quote_ident(column)));
    }
    stmt.push_str(&assignments.join(", "));

    let mut first = true;
    for condition in conditions.iter().filter(|c| !c.is_empty()) {
        stmt.push_str(if first { " WHERE " } else { " AND " });
        condition.render(&mut stmt, table, true);
        first = false;
    }
    stmt
}

/// Load the rows of `table` whose `column` is one of `keys`.
///
/// The keys are bound as a JSON array of single-field records and converted to the column type,
/// so the comparison is typed and can use an index on `column`.
pub(crate) fn preload_statement(table: &str, column: &str, keys: Vec<serde_json::Value>) -> Statement {
    let records = keys
        .into_iter()
        .map(|key| {
            let mut record = Row::new();
            record.insert(column.to_string(), key);
            serde_json::Value::Object(record)
        })
        .collect();

    let mut stmt = Statement::new(format!("SELECT * FROM {}", quote_ident(table)));
    let keys = stmt.push_arg(Value::Json(serde_json::Value::Array(records)));
    stmt.push_str(&format!(
        " WHERE {} IN (SELECT k.{} FROM jsonb_populate_recordset(NULL::{}, {keys}) AS k)",
        column_ref(table, column),
        quote_ident(column),
        quote_ident(table)
    ));
    stmt
}
