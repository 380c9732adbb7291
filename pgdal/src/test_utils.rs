//! Test utilities (available with the `test-utils` feature).
//!
//! [`SpyEngine`] is an in-memory [`Engine`] that records every statement it receives, counts
//! engine calls and answers from a queue of scripted responses. It lets the whole
//! [`Database`] surface be exercised without a running PostgreSQL.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::db::engine::{Engine, EngineTransaction, Executor};
use crate::db::errors::EngineError;
use crate::db::query::Statement;
use crate::db::value::Row;
use crate::db::Database;

/// A scripted engine answer, consumed by the next `execute` or `fetch_all`.
#[derive(Debug)]
pub enum Response {
    Rows(Vec<Row>),
    Affected(u64),
    Error(EngineError),
    /// Never completes; used to exercise cancellation and deadlines
    Stall,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub execute: usize,
    pub fetch: usize,
    pub begin: usize,
    pub commit: usize,
    pub rollback: usize,
}

impl CallCounts {
    pub fn total(&self) -> usize {
        self.execute + self.fetch + self.begin + self.commit + self.rollback
    }
}

#[derive(Debug, Default)]
struct SpyState {
    responses: VecDeque<Response>,
    statements: Vec<Statement>,
    counts: CallCounts,
    fail_begin: Option<EngineError>,
    fail_commit: Option<EngineError>,
    fail_rollback: Option<EngineError>,
}

/// Engine double. Clones share state, so keep one handle for assertions after handing another
/// to a [`Database`].
///
/// With an empty queue, `execute` reports 0 affected rows and `fetch_all` returns no rows.
#[derive(Debug, Clone, Default)]
pub struct SpyEngine {
    state: Arc<Mutex<SpyState>>,
}

impl SpyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// A `Database` backed by this spy.
    pub fn database(&self) -> Database {
        Database::new(self.clone())
    }

    pub fn push(&self, response: Response) -> &Self {
        self.state.lock().responses.push_back(response);
        self
    }

    /// Queue a result set. Each value must be a JSON object.
    pub fn push_rows(&self, rows: impl IntoIterator<Item = serde_json::Value>) -> &Self {
        let rows = rows.into_iter().filter_map(|v| v.as_object().cloned()).collect();
        self.push(Response::Rows(rows))
    }

    pub fn push_affected(&self, rows_affected: u64) -> &Self {
        self.push(Response::Affected(rows_affected))
    }

    pub fn push_error(&self, err: EngineError) -> &Self {
        self.push(Response::Error(err))
    }

    pub fn push_stall(&self) -> &Self {
        self.push(Response::Stall)
    }

    pub fn fail_next_begin(&self, err: EngineError) {
        self.state.lock().fail_begin = Some(err);
    }

    pub fn fail_next_commit(&self, err: EngineError) {
        self.state.lock().fail_commit = Some(err);
    }

    pub fn fail_next_rollback(&self, err: EngineError) {
        self.state.lock().fail_rollback = Some(err);
    }

    pub fn counts(&self) -> CallCounts {
        self.state.lock().counts
    }

    /// Every engine call so far, of any kind.
    pub fn engine_calls(&self) -> usize {
        self.counts().total()
    }

    pub fn statements(&self) -> Vec<Statement> {
        self.state.lock().statements.clone()
    }

    fn next_response(&self, stmt: &Statement, fetch: bool) -> Option<Response> {
        let mut state = self.state.lock();
        if fetch {
            state.counts.fetch += 1;
        } else {
            state.counts.execute += 1;
        }
        state.statements.push(stmt.clone());
        state.responses.pop_front()
    }

    async fn answer_execute(&self, stmt: &Statement) -> Result<u64, EngineError> {
        match self.next_response(stmt, false) {
            None => Ok(0),
            Some(Response::Affected(n)) => Ok(n),
            Some(Response::Rows(rows)) => Ok(rows.len() as u64),
            Some(Response::Error(err)) => Err(err),
            Some(Response::Stall) => futures::future::pending().await,
        }
    }

    async fn answer_fetch(&self, stmt: &Statement) -> Result<Vec<Row>, EngineError> {
        match self.next_response(stmt, true) {
            None | Some(Response::Affected(_)) => Ok(Vec::new()),
            Some(Response::Rows(rows)) => Ok(rows),
            Some(Response::Error(err)) => Err(err),
            Some(Response::Stall) => futures::future::pending().await,
        }
    }
}

#[async_trait]
impl Executor for SpyEngine {
    async fn execute(&self, stmt: &Statement) -> Result<u64, EngineError> {
        self.answer_execute(stmt).await
    }

    async fn fetch_all(&self, stmt: &Statement) -> Result<Vec<Row>, EngineError> {
        self.answer_fetch(stmt).await
    }
}

#[async_trait]
impl Engine for SpyEngine {
    async fn begin(&self) -> Result<Box<dyn EngineTransaction>, EngineError> {
        let mut state = self.state.lock();
        state.counts.begin += 1;
        if let Some(err) = state.fail_begin.take() {
            return Err(err);
        }
        Ok(Box::new(SpyTransaction {
            engine: self.clone(),
            finished: Mutex::new(false),
        }))
    }
}

/// Transaction handle of a [`SpyEngine`]; statements go through the engine's queue.
#[derive(Debug)]
pub struct SpyTransaction {
    engine: SpyEngine,
    finished: Mutex<bool>,
}

impl SpyTransaction {
    fn ensure_open(&self) -> Result<(), EngineError> {
        if *self.finished.lock() {
            return Err(EngineError::Other(anyhow::anyhow!("transaction already finished")));
        }
        Ok(())
    }

    fn finish(&self) -> Result<(), EngineError> {
        self.ensure_open()?;
        *self.finished.lock() = true;
        Ok(())
    }
}

#[async_trait]
impl Executor for SpyTransaction {
    async fn execute(&self, stmt: &Statement) -> Result<u64, EngineError> {
        self.ensure_open()?;
        self.engine.answer_execute(stmt).await
    }

    async fn fetch_all(&self, stmt: &Statement) -> Result<Vec<Row>, EngineError> {
        self.ensure_open()?;
        self.engine.answer_fetch(stmt).await
    }
}

#[async_trait]
impl EngineTransaction for SpyTransaction {
    async fn commit(&self) -> Result<(), EngineError> {
        self.finish()?;
        let mut state = self.engine.state.lock();
        state.counts.commit += 1;
        state.fail_commit.take().map_or(Ok(()), Err)
    }

    async fn rollback(&self) -> Result<(), EngineError> {
        self.finish()?;
        let mut state = self.engine.state.lock();
        state.counts.rollback += 1;
        state.fail_rollback.take().map_or(Ok(()), Err)
    }
}

/// A database error carrying `code` as its SQLSTATE.
pub fn pg_error(code: &str) -> EngineError {
    EngineError::with_code(code, format!("simulated database error {code}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_responses_are_consumed_in_order() {
        let spy = SpyEngine::new();
        spy.push_affected(2).push_error(pg_error("23505"));

        assert_eq!(spy.execute(&Statement::new("DELETE FROM t")).await.unwrap(), 2);
        assert!(spy.fetch_all(&Statement::new("SELECT 1")).await.is_err());
        assert!(spy.fetch_all(&Statement::new("SELECT 1")).await.unwrap().is_empty());
        assert_eq!(spy.counts().execute, 1);
        assert_eq!(spy.counts().fetch, 2);
        assert_eq!(spy.statements()[0].sql, "DELETE FROM t");
    }

    #[tokio::test]
    async fn transactions_finish_once() {
        let spy = SpyEngine::new();
        let tx = spy.begin().await.unwrap();
        tx.commit().await.unwrap();

        assert!(tx.rollback().await.is_err());
        assert!(tx.execute(&Statement::new("SELECT 1")).await.is_err());
        assert_eq!(spy.counts(), CallCounts { begin: 1, commit: 1, ..Default::default() });
    }
}
