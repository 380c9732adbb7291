//! Transaction coordination.
//!
//! [`Database::with_transaction`] runs a unit of work against a transaction and guarantees that
//! the transaction is finished exactly once before it returns: committed when the work succeeds,
//! rolled back when it fails, panics or its context is cancelled.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, error, instrument};

use crate::db::context::Context;
use crate::db::database::{Conn, Database, record_trace};
use crate::db::engine::EngineTransaction;
use crate::db::errors::{DbError, Result, failure};
use crate::db::validate::validate_context;

const TRANSACTION_STEP: &str = "transaction";

impl Database {
    /// Run `work` inside a transaction.
    ///
    /// `work` receives a `Database` bound to the transaction and is called exactly once. Its
    /// error is returned unchanged after the rollback; a panic is caught, rolled back and
    /// reported as [`DbError::TransactionAborted`].
    ///
    /// Called on a `Database` that is already bound to a transaction, `work` joins that
    /// transaction: no new transaction is opened and the outer call decides the outcome.
    #[instrument(skip_all, fields(trace_id = tracing::field::Empty))]
    pub async fn with_transaction<F, Fut, R>(&self, ctx: Option<&Context>, work: F) -> Result<R>
    where
        F: FnOnce(Database) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let ctx = validate_context(ctx)?;
        record_trace(ctx);

        let engine = match &self.conn {
            Conn::Engine(engine) => engine,
            Conn::Transaction(_) => {
                debug!(step = TRANSACTION_STEP, "Joining existing transaction");
                return work(self.clone()).await;
            }
        };

        debug!(step = TRANSACTION_STEP, "Starting database transaction");
        let tx: Arc<dyn EngineTransaction> = ctx
            .run(engine.begin())
            .await
            .map(Arc::from)
            .map_err(|err| failure(err, TRANSACTION_STEP, "Failed to begin transaction"))?;

        let tx_db = Database::bound_to(tx.clone());
        let outcome = AssertUnwindSafe(async move { work(tx_db).await }).catch_unwind().await;

        match outcome {
            Ok(Ok(_)) if ctx.is_done() => {
                rollback(tx.as_ref(), "context finished before commit").await;
                Err(failure(ctx.done_error(), TRANSACTION_STEP, "Transaction cancelled before commit"))
            }
            Ok(Ok(value)) => {
                tx.commit()
                    .await
                    .map_err(|err| failure(err, TRANSACTION_STEP, "Failed to commit transaction"))?;
                debug!(step = TRANSACTION_STEP, "Transaction committed successfully");
                Ok(value)
            }
            Ok(Err(err)) => {
                rollback(tx.as_ref(), &err.to_string()).await;
                Err(err)
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                rollback(tx.as_ref(), &format!("panic: {message}")).await;
                Err(DbError::TransactionAborted(message))
            }
        }
    }
}

/// Roll back, logging the outcome. A failed rollback never replaces the caller's error.
async fn rollback(tx: &dyn EngineTransaction, reason: &str) {
    match tx.rollback().await {
        Ok(()) => debug!(step = TRANSACTION_STEP, reason, "Transaction rolled back"),
        Err(rollback_error) => error!(
            step = TRANSACTION_STEP,
            reason,
            rollback_error = %rollback_error,
            "Failed to rollback transaction"
        ),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::errors::PG_UNIQUE_VIOLATION;
    use crate::db::query::UpdateSet;
    use crate::db::record::Record;
    use crate::test_utils::{CallCounts, SpyEngine, pg_error};
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::time::Duration;

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Account {
        #[serde(default)]
        id: i64,
        balance: i64,
    }

    impl Record for Account {
        const TABLE: &'static str = "accounts";
    }

    fn counts(begin: usize, commit: usize, rollback: usize) -> (usize, usize, usize) {
        (begin, commit, rollback)
    }

    fn lifecycle(c: CallCounts) -> (usize, usize, usize) {
        (c.begin, c.commit, c.rollback)
    }

    #[test_log::test(tokio::test)]
    async fn successful_work_commits_once() {
        let spy = SpyEngine::new();
        spy.push_rows([json!({"id": 1, "balance": 100})]);
        spy.push_affected(1);
        let db = spy.database();
        let ctx = &Context::new();

        let id = db
            .with_transaction(Some(ctx), |tx| async move {
                assert!(tx.in_transaction());
                let mut account = Account { id: 0, balance: 100 };
                tx.create(Some(ctx), &mut account).await?;
                tx.update(Some(ctx), &account, &UpdateSet::new().set("balance", 90), None)
                    .await?;
                Ok(account.id)
            })
            .await;

        assert_eq!(id, Ok(1));
        assert_eq!(lifecycle(spy.counts()), counts(1, 1, 0));
        assert_eq!(spy.counts().fetch + spy.counts().execute, 2);
    }

    #[test_log::test(tokio::test)]
    async fn failing_work_rolls_back_and_returns_its_error() {
        let spy = SpyEngine::new();
        let db = spy.database();
        let ctx = &Context::new();

        let result: Result<()> = db
            .with_transaction(Some(ctx), |_tx| async { Err(DbError::InvalidReference) })
            .await;

        assert_eq!(result, Err(DbError::InvalidReference));
        assert_eq!(lifecycle(spy.counts()), counts(1, 0, 1));
    }

    #[test_log::test(tokio::test)]
    async fn rollback_failure_does_not_mask_the_work_error() {
        let spy = SpyEngine::new();
        spy.fail_next_rollback(pg_error("08006"));
        let db = spy.database();
        let ctx = &Context::new();

        let result: Result<()> = db
            .with_transaction(Some(ctx), |_tx| async { Err(DbError::UpdatesRequired) })
            .await;

        assert_eq!(result, Err(DbError::UpdatesRequired));
        assert_eq!(lifecycle(spy.counts()), counts(1, 0, 1));
    }

    #[test_log::test(tokio::test)]
    async fn panicking_work_is_rolled_back() {
        let spy = SpyEngine::new();
        let db = spy.database();
        let ctx = &Context::new();

        let result: Result<()> = db
            .with_transaction(Some(ctx), |_tx| async { panic!("balance went negative") })
            .await;

        assert_eq!(result, Err(DbError::TransactionAborted("balance went negative".to_string())));
        assert_eq!(lifecycle(spy.counts()), counts(1, 0, 1));
    }

    #[test_log::test(tokio::test)]
    async fn begin_failure_skips_the_work() {
        let spy = SpyEngine::new();
        spy.fail_next_begin(pg_error("53300"));
        let db = spy.database();
        let ctx = &Context::new();

        let mut called = false;
        let result = db
            .with_transaction(Some(ctx), |_tx| {
                called = true;
                async { Ok(()) }
            })
            .await;

        assert_eq!(result, Err(DbError::Database));
        assert!(!called);
        assert_eq!(lifecycle(spy.counts()), counts(1, 0, 0));
    }

    #[test_log::test(tokio::test)]
    async fn commit_failure_is_classified() {
        let spy = SpyEngine::new();
        spy.fail_next_commit(pg_error(PG_UNIQUE_VIOLATION));
        let db = spy.database();
        let ctx = &Context::new();

        let result = db.with_transaction(Some(ctx), |_tx| async { Ok(()) }).await;

        assert_eq!(result, Err(DbError::DuplicateRecord));
        assert_eq!(lifecycle(spy.counts()), counts(1, 1, 0));
    }

    #[test_log::test(tokio::test)]
    async fn cancellation_during_work_rolls_back_instead_of_committing() {
        let spy = SpyEngine::new();
        let db = spy.database();
        let ctx = &Context::new();

        let result = db
            .with_transaction(Some(ctx), |_tx| async move {
                ctx.cancel();
                Ok(())
            })
            .await;

        assert_eq!(result, Err(DbError::Database));
        assert_eq!(lifecycle(spy.counts()), counts(1, 0, 1));
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn deadline_aborts_statement_and_rolls_back() {
        let spy = SpyEngine::new();
        spy.push_stall();
        let db = spy.database();
        let ctx = &Context::new().with_timeout(Duration::from_millis(100));

        let result = db
            .with_transaction(Some(ctx), |tx| async move { tx.count::<Account>(Some(ctx), None).await })
            .await;

        assert_eq!(result, Err(DbError::Database));
        assert_eq!(lifecycle(spy.counts()), counts(1, 0, 1));
    }

    #[test_log::test(tokio::test)]
    async fn nested_calls_join_the_outer_transaction() {
        let spy = SpyEngine::new();
        let db = spy.database();
        let ctx = &Context::new();

        let result = db
            .with_transaction(Some(ctx), |tx| async move {
                tx.with_transaction(Some(ctx), |inner| async move {
                    assert!(inner.in_transaction());
                    Ok(())
                })
                .await
            })
            .await;

        assert_eq!(result, Ok(()));
        assert_eq!(lifecycle(spy.counts()), counts(1, 1, 0));
    }

    #[test_log::test(tokio::test)]
    async fn transaction_handle_is_inert_after_commit() {
        let spy = SpyEngine::new();
        let db = spy.database();
        let ctx = &Context::new();

        let escaped = db
            .with_transaction(Some(ctx), |tx| async move { Ok(tx) })
            .await
            .unwrap();

        let result = escaped
            .execute_raw_query(Some(ctx), None, "DELETE FROM accounts", &[])
            .await;
        assert_eq!(result, Err(DbError::Database));
        assert_eq!(spy.counts().execute, 0);
    }
}
