//! The SQL engine seam.
//!
//! The data access layer only needs three capabilities from a database driver: run a statement
//! and report affected rows, run a query and return its rows, and scope a sequence of those in a
//! transaction. Any driver that offers them can back a [`Database`](crate::db::Database).
//!
//! A PostgreSQL implementation on top of sqlx lives in [`postgres`] (feature `postgres`).

use async_trait::async_trait;

use crate::db::errors::EngineError;
use crate::db::query::Statement;
use crate::db::value::Row;

#[cfg(feature = "postgres")]
pub mod postgres;

/// Runs statements against a connection or an open transaction.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run a statement that returns no rows and report how many rows it affected.
    async fn execute(&self, stmt: &Statement) -> Result<u64, EngineError>;

    /// Run a query and return every row, with columns in select order.
    async fn fetch_all(&self, stmt: &Statement) -> Result<Vec<Row>, EngineError>;
}

/// A pooled engine that can open transactions.
#[async_trait]
pub trait Engine: Executor {
    async fn begin(&self) -> Result<Box<dyn EngineTransaction>, EngineError>;
}

/// An open transaction.
///
/// Once committed or rolled back the handle is finished: further calls fail and a second
/// commit or rollback is an error.
#[async_trait]
pub trait EngineTransaction: Executor {
    async fn commit(&self) -> Result<(), EngineError>;

    async fn rollback(&self) -> Result<(), EngineError>;
}
