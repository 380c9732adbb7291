//! Generic data access over a relational engine.
//!
//! Application code works with its own serde record types and a [`Database`]; no per-entity SQL
//! is written. Every operation runs the same pipeline:
//!
//! ```text
//! ┌──────────────┐
//! │   validate   │  (db::validate - preconditions, no engine access)
//! └──────┬───────┘
//!        │
//!        ↓
//! ┌──────────────┐
//! │    build     │  (db::query - conditions, options, joins → Statement)
//! └──────┬───────┘
//!        │
//!        ↓
//! ┌──────────────┐
//! │   execute    │  (db::engine - guarded by the call Context)
//! └──────┬───────┘
//!        │  on failure
//!        ↓
//! ┌──────────────┐
//! │   classify   │  (db::errors - SQLSTATE → DbError, logged)
//! └──────────────┘
//! ```
//!
//! # Modules
//!
//! - [`database`]: the [`Database`] facade (create, update, find, count, joins, raw SQL)
//! - [`transaction`]: [`Database::with_transaction`]
//! - [`query`]: conditions, update sets, query options and statement rendering
//! - [`record`]: the [`Record`] trait, associations and result destinations
//! - [`engine`]: the engine seam and its PostgreSQL implementation
//! - [`errors`]: error taxonomy and classification
//!
//! ## Example Usage
//!
//! ```ignore
//! use pgdal::db::{Condition, Context, Database, QueryOptions, UpdateSet};
//!
//! async fn example(db: &Database) -> pgdal::db::Result<()> {
//!     let ctx = Context::new().with_timeout(std::time::Duration::from_secs(5));
//!
//!     let mut user = User { email: "user@example.com".into(), ..Default::default() };
//!     db.create(Some(&ctx), &mut user).await?;
//!
//!     let mut active = Vec::new();
//!     let options = QueryOptions::new().paginate(1, 20).order_by("created_at DESC");
//!     db.find_many(Some(&ctx), &mut active, Some(&Condition::eq("active", true)), Some(&options))
//!         .await?;
//!
//!     db.with_transaction(Some(&ctx), |tx| async move {
//!         tx.update(Some(&ctx), &user, &UpdateSet::new().set("active", false), None).await?;
//!         Ok(())
//!     })
//!     .await
//! }
//! ```

pub mod context;
pub mod database;
pub mod engine;
pub mod errors;
mod preload;
pub mod query;
pub mod record;
pub mod transaction;
pub mod validate;
pub mod value;

pub use context::Context;
pub use database::{Database, QueryResult};
pub use engine::{Engine, EngineTransaction, Executor};
pub use errors::{DbError, EngineError, Result};
pub use query::{Condition, JoinClause, JoinConfig, JoinKind, Page, PageInfo, Pagination, QueryOptions, QueryPlan, Statement, UpdateSet};
pub use record::{Association, AssociationKind, Destination, Record};
pub use value::{Row, Value};
