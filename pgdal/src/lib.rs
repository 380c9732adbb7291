//! # pgdal: a generic relational data access layer
//!
//! `pgdal` lets application code create, read, update, count, join and run raw SQL against its
//! own record types without writing per-entity SQL, while keeping validation, error
//! classification and transaction semantics identical across every operation.
//!
//! ## Overview
//!
//! A record is any serde type implementing [`Record`](db::Record), which binds it to a table.
//! The [`Database`](db::Database) facade turns structured requests ([`Condition`](db::Condition),
//! [`UpdateSet`](db::UpdateSet), [`QueryOptions`](db::QueryOptions),
//! [`JoinConfig`](db::JoinConfig)) into parameterized SQL, runs it through an
//! [`Engine`](db::Engine) and maps the outcome back onto the record types.
//!
//! ### Policies
//!
//! - **Preconditions first**: a missing context, an empty update set, a blank query or an
//!   incomplete join configuration fails before the engine is touched.
//! - **Absence is not failure**: finding nothing yields `Ok(false)`, an empty vector or a zero
//!   count.
//! - **Stable errors**: engine failures are logged with their full detail, then reported as one
//!   of the [`DbError`](db::DbError) kinds. Engine text never reaches the caller.
//! - **Atomic units of work**: [`Database::with_transaction`](db::Database::with_transaction)
//!   commits or rolls back exactly once, including when the unit of work panics or its context
//!   is cancelled.
//!
//! ## Architecture
//!
//! The engine is a trait seam. The default `postgres` feature provides an implementation over a
//! sqlx connection pool ([`PgEngine`](db::engine::postgres::PgEngine)); the `test-utils` feature
//! exposes an in-memory spy engine for exercising the facade without a database.
//!
//! ## Configuration
//!
//! [`DbConfig`](config::DbConfig) is loaded with figment from defaults, an optional YAML file and
//! environment variables. See [`config`] for the precedence rules.
//!
//! ## Example
//!
//! ```ignore
//! use pgdal::config::DbConfig;
//! use pgdal::db::{Condition, Context, Database};
//!
//! pgdal::telemetry::init_telemetry()?;
//! let db = Database::connect(&DbConfig::load(None::<&str>)?).await?;
//!
//! let ctx = Context::new().with_trace_id("req-42");
//! let mut user = User::default();
//! if db.find_one(Some(&ctx), &mut user, &Condition::eq("email", "a@example.com"), &["orders"]).await? {
//!     println!("{} has {} orders", user.email, user.orders.len());
//! }
//! ```

pub mod config;
pub mod db;
pub mod telemetry;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use db::{Context, Database, DbError, Result};
