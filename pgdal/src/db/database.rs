//! The record operations facade.

use std::sync::Arc;

use tracing::{Span, debug, instrument};

use crate::db::context::Context;
use crate::db::engine::{Engine, EngineTransaction};
use crate::db::errors::{EngineError, Result, failure, resolve};
use crate::db::preload;
use crate::db::query::{
    Condition, JoinConfig, Page, PageInfo, QueryOptions, QueryPlan, Statement, UpdateSet, column_ref, insert_statement,
    update_statement,
};
use crate::db::record::{Destination, Record, from_row, identity, insert_fields, merge_into, to_row};
use crate::db::validate::{validate_condition, validate_context, validate_join_config, validate_model, validate_query, validate_updates};
use crate::db::value::{Row, Value};

const CREATE_STEP: &str = "creating record";
const UPDATE_STEP: &str = "updating record";
const FIND_ONE_STEP: &str = "finding single record";
const FIND_MANY_STEP: &str = "finding multiple records";
const COUNT_STEP: &str = "counting records";
const JOIN_QUERY_STEP: &str = "executing join query";
const RAW_QUERY_STEP: &str = "executing raw query";

/// Outcome of [`Database::execute_raw_query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueryResult {
    /// Rows changed by a mutation, or rows returned by a projection
    pub rows_affected: u64,
    pub found: bool,
}

impl QueryResult {
    fn new(rows_affected: u64) -> Self {
        Self {
            rows_affected,
            found: rows_affected > 0,
        }
    }
}

/// Where statements are sent: the pooled engine, or a transaction opened on it.
#[derive(Clone)]
pub(crate) enum Conn {
    Engine(Arc<dyn Engine>),
    Transaction(Arc<dyn EngineTransaction>),
}

/// Generic create / read / update / count / join / raw SQL operations over [`Record`] types.
///
/// Every operation takes the call [`Context`] first. It is an `Option` so that a missing
/// context is reported as [`DbError::ContextRequired`](crate::db::DbError::ContextRequired) instead of being papered over.
///
/// `Database` is cheap to clone. A pool-bound instance can be shared across tasks; the instance
/// handed to a [`with_transaction`](Database::with_transaction) unit of work is bound to that
/// transaction and stops working once it ends.
#[derive(Clone)]
pub struct Database {
    pub(crate) conn: Conn,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("in_transaction", &self.in_transaction())
            .finish()
    }
}

impl Database {
    pub fn new(engine: impl Engine + 'static) -> Self {
        Self::from_arc(Arc::new(engine))
    }

    pub fn from_arc(engine: Arc<dyn Engine>) -> Self {
        Self {
            conn: Conn::Engine(engine),
        }
    }

    #[cfg(feature = "postgres")]
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        Self::new(crate::db::engine::postgres::PgEngine::new(pool))
    }

    /// Connect a PostgreSQL pool using `config`.
    #[cfg(feature = "postgres")]
    pub async fn connect(config: &crate::config::DbConfig) -> Result<Self> {
        let engine = crate::db::engine::postgres::PgEngine::connect(config)
            .await
            .map_err(|err| failure(err, "connecting", "Failed to connect to database"))?;
        Ok(Self::new(engine))
    }

    pub(crate) fn bound_to(tx: Arc<dyn EngineTransaction>) -> Self {
        Self {
            conn: Conn::Transaction(tx),
        }
    }

    /// True for the instance handed to a transaction's unit of work.
    pub fn in_transaction(&self) -> bool {
        matches!(self.conn, Conn::Transaction(_))
    }

    pub(crate) async fn execute(&self, ctx: &Context, stmt: &Statement) -> std::result::Result<u64, EngineError> {
        debug!(sql = %stmt.sql, args = stmt.args.len(), "Executing statement");
        match &self.conn {
            Conn::Engine(engine) => ctx.run(engine.execute(stmt)).await,
            Conn::Transaction(tx) => ctx.run(tx.execute(stmt)).await,
        }
    }

    pub(crate) async fn fetch(&self, ctx: &Context, stmt: &Statement) -> std::result::Result<Vec<Row>, EngineError> {
        debug!(sql = %stmt.sql, args = stmt.args.len(), "Running query");
        match &self.conn {
            Conn::Engine(engine) => ctx.run(engine.fetch_all(stmt)).await,
            Conn::Transaction(tx) => ctx.run(tx.fetch_all(stmt)).await,
        }
    }

    /// Fetch the rows of `plan` and attach its preloads.
    async fn load<T: Record>(&self, ctx: &Context, plan: &QueryPlan) -> std::result::Result<Vec<Row>, EngineError> {
        let mut rows = self.fetch(ctx, &plan.to_select()).await?;
        preload::attach::<T>(self, ctx, &mut rows, plan.preloads()).await?;
        Ok(rows)
    }

    /// Insert `record`. Columns generated by the database (keys, defaults, triggers) are written
    /// back into it.
    #[instrument(skip_all, fields(table = T::TABLE, trace_id = tracing::field::Empty))]
    pub async fn create<T: Record>(&self, ctx: Option<&Context>, record: &mut T) -> Result<()> {
        let ctx = validate_context(ctx)?;
        validate_model(T::TABLE)?;
        record_trace(ctx);

        let stmt = insert_statement(T::TABLE, &insert_fields(record)?);
        let rows = self
            .fetch(ctx, &stmt)
            .await
            .map_err(|err| failure(err, CREATE_STEP, "Failed to create record"))?;

        if let Some(returned) = rows.into_iter().next() {
            merge_into(record, returned)?;
        }
        Ok(())
    }

    /// Apply `updates` to the row identified by `model`'s primary key, further restricted by
    /// `condition`. When the key is unset `condition` alone selects the rows, and it is then
    /// required.
    ///
    /// Returns the number of rows changed; zero is not an error.
    #[instrument(skip_all, fields(table = T::TABLE, trace_id = tracing::field::Empty))]
    pub async fn update<T: Record>(
        &self,
        ctx: Option<&Context>,
        model: &T,
        updates: &UpdateSet,
        condition: Option<&Condition>,
    ) -> Result<u64> {
        let ctx = validate_context(ctx)?;
        validate_model(T::TABLE)?;
        validate_updates(updates)?;
        record_trace(ctx);

        let mut conditions: Vec<Condition> = identity::<T>(&to_row(model)?).into_iter().collect();
        if conditions.is_empty() {
            validate_condition(condition.unwrap_or(&Condition::Equality(Default::default())))?;
        }
        conditions.extend(condition.filter(|c| !c.is_empty()).cloned());

        let stmt = update_statement(T::TABLE, updates, &conditions);
        match self.execute(ctx, &stmt).await {
            Ok(rows_affected) => Ok(rows_affected),
            Err(err) => resolve(err, UPDATE_STEP, "Failed to update record", 0),
        }
    }

    /// Load the first row matching `condition` (by primary key order) into `dest`.
    ///
    /// Returns `Ok(false)` and leaves `dest` untouched when nothing matched.
    #[instrument(skip_all, fields(table = T::TABLE, trace_id = tracing::field::Empty))]
    pub async fn find_one<T: Record>(
        &self,
        ctx: Option<&Context>,
        dest: &mut T,
        condition: &Condition,
        preloads: &[&str],
    ) -> Result<bool> {
        let ctx = validate_context(ctx)?;
        validate_model(T::TABLE)?;
        validate_condition(condition)?;
        record_trace(ctx);

        let plan = preloads.iter().fold(
            QueryPlan::from_table(T::TABLE)
                .filter(condition.clone())
                .order_by(format!("{} ASC", column_ref(T::TABLE, T::PRIMARY_KEY)))
                .limit(1),
            |plan, name| plan.preload(*name),
        );

        let rows = match self.load::<T>(ctx, &plan).await {
            Ok(rows) => rows,
            Err(err) => return resolve(err, FIND_ONE_STEP, "Failed to find record", false),
        };

        match rows.into_iter().next() {
            Some(row) => {
                *dest = from_row(row)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Replace the contents of `dest` with every matching row. No match yields an empty vector.
    #[instrument(skip_all, fields(table = T::TABLE, trace_id = tracing::field::Empty))]
    pub async fn find_many<T: Record>(
        &self,
        ctx: Option<&Context>,
        dest: &mut Vec<T>,
        condition: Option<&Condition>,
        options: Option<&QueryOptions>,
    ) -> Result<()> {
        let ctx = validate_context(ctx)?;
        validate_model(T::TABLE)?;
        record_trace(ctx);

        let mut plan = QueryPlan::from_table(T::TABLE);
        if let Some(condition) = condition {
            plan = plan.filter(condition.clone());
        }
        if let Some(options) = options {
            plan = plan.apply(options);
        }

        match self.load::<T>(ctx, &plan).await {
            Ok(rows) => dest.load(rows),
            Err(err) => {
                dest.clear();
                resolve(err, FIND_MANY_STEP, "Failed to find records", ())
            }
        }
    }

    /// Count the rows of `T`'s table matching `condition`.
    pub async fn count<T: Record>(&self, ctx: Option<&Context>, condition: Option<&Condition>) -> Result<i64> {
        self.count_table(ctx, T::TABLE, condition).await
    }

    /// Count the rows of `table` matching `condition`.
    #[instrument(skip(self, ctx, condition), fields(trace_id = tracing::field::Empty))]
    pub async fn count_table(&self, ctx: Option<&Context>, table: &str, condition: Option<&Condition>) -> Result<i64> {
        let ctx = validate_context(ctx)?;
        validate_model(table)?;
        record_trace(ctx);

        let mut plan = QueryPlan::from_table(table);
        if let Some(condition) = condition {
            plan = plan.filter(condition.clone());
        }

        let rows = match self.fetch(ctx, &plan.to_count()).await {
            Ok(rows) => rows,
            Err(err) => return resolve(err, COUNT_STEP, "Failed to count records", 0),
        };
        Ok(rows
            .first()
            .and_then(|row| row.get("count"))
            .and_then(serde_json::Value::as_i64)
            .unwrap_or(0))
    }

    /// Count, then fetch one page of `T`. Missing pagination defaults to the first page.
    #[instrument(skip_all, fields(table = T::TABLE))]
    pub async fn find_page<T: Record>(
        &self,
        ctx: Option<&Context>,
        condition: Option<&Condition>,
        options: &QueryOptions,
    ) -> Result<Page<T>> {
        let pagination = options.pagination.unwrap_or_default().normalized();
        let total = self.count::<T>(ctx, condition).await?;

        let options = QueryOptions {
            pagination: Some(pagination),
            ..options.clone()
        };
        let mut items = Vec::new();
        self.find_many(ctx, &mut items, condition, Some(&options)).await?;

        Ok(Page {
            items,
            pagination: PageInfo::new(total, pagination.page, pagination.limit),
        })
    }

    /// Run the multi-table query described by `config` and load the rows into `dest`.
    ///
    /// Preloads in `config` are resolved against `T`'s associations.
    #[instrument(skip_all, fields(base_table = %config.base_table, trace_id = tracing::field::Empty))]
    pub async fn find_with_joins<T: Record>(&self, ctx: Option<&Context>, dest: &mut Vec<T>, config: &JoinConfig) -> Result<()> {
        let ctx = validate_context(ctx)?;
        validate_join_config(config)?;
        record_trace(ctx);

        let plan = QueryPlan::for_joins(config);
        match self.load::<T>(ctx, &plan).await {
            Ok(rows) => dest.load(rows),
            Err(err) => {
                dest.clear();
                resolve(err, JOIN_QUERY_STEP, "Failed to execute join query", ())
            }
        }
    }

    /// Run caller-written SQL with `?` placeholders.
    ///
    /// Without a destination the query is treated as a mutation and `rows_affected` is what the
    /// engine reports. With one, the returned rows are loaded into it and `rows_affected` is the
    /// number of rows returned.
    #[instrument(skip_all, fields(trace_id = tracing::field::Empty))]
    pub async fn execute_raw_query(
        &self,
        ctx: Option<&Context>,
        dest: Option<&mut dyn Destination>,
        query: &str,
        args: &[Value],
    ) -> Result<QueryResult> {
        let ctx = validate_context(ctx)?;
        validate_query(query)?;
        record_trace(ctx);

        let stmt = Statement::raw(query, args.iter().cloned());
        match dest {
            None => match self.execute(ctx, &stmt).await {
                Ok(rows_affected) => Ok(QueryResult::new(rows_affected)),
                Err(err) => resolve(err, RAW_QUERY_STEP, "Failed to execute raw query", QueryResult::default()),
            },
            Some(dest) => {
                let rows = match self.fetch(ctx, &stmt).await {
                    Ok(rows) => rows,
                    Err(err) => resolve(err, RAW_QUERY_STEP, "Failed to execute raw query", Vec::new())?,
                };
                let returned = rows.len() as u64;
                dest.load(rows)?;
                Ok(QueryResult::new(returned))
            }
        }
    }
}

pub(crate) fn record_trace(ctx: &Context) {
    if let Some(trace_id) = ctx.trace_id() {
        Span::current().record("trace_id", trace_id);
    }
}
