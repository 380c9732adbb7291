//! Request-scoped call context.
//!
//! A [`Context`] travels with every data access call. It carries the caller's cancellation
//! token, an optional deadline and an optional trace id that is attached to log spans. Engine
//! calls are raced against cancellation and the deadline; when either fires first the in-flight
//! statement future is dropped, which aborts it.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::db::errors::EngineError;

#[derive(Debug, Clone, Default)]
pub struct Context {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    trace_id: Option<String>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the context to an existing cancellation token (e.g. a request's shutdown token).
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancel every call running under this context (and its clones).
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// True once the context was cancelled or its deadline has passed.
    pub fn is_done(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// The error a finished context reports.
    pub(crate) fn done_error(&self) -> EngineError {
        if self.cancel.is_cancelled() {
            EngineError::Cancelled
        } else {
            EngineError::DeadlineExceeded
        }
    }

    /// Drive `fut` to completion unless the context is cancelled or times out first.
    pub(crate) async fn run<F, T>(&self, fut: F) -> Result<T, EngineError>
    where
        F: Future<Output = Result<T, EngineError>>,
    {
        let guarded = async {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(EngineError::Cancelled),
                result = fut => result,
            }
        };

        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, guarded)
                .await
                .unwrap_or(Err(EngineError::DeadlineExceeded)),
            None => guarded.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_completes_when_not_cancelled() {
        let ctx = Context::new();
        let result = ctx.run(async { Ok::<_, EngineError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn cancelled_context_aborts_pending_work() {
        let ctx = Context::new();
        ctx.cancel();
        let result = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, EngineError>(())
            })
            .await;
        assert!(matches!(result, Err(EngineError::Cancelled)));
        assert!(ctx.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_aborts_slow_work() {
        let ctx = Context::new().with_timeout(Duration::from_millis(50));
        let result = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, EngineError>(())
            })
            .await;
        assert!(matches!(result, Err(EngineError::DeadlineExceeded)));
        assert!(matches!(ctx.done_error(), EngineError::DeadlineExceeded));
    }

    #[test]
    fn clones_share_cancellation() {
        let ctx = Context::new().with_trace_id("abc123");
        let clone = ctx.clone();
        ctx.cancel();
        assert!(clone.is_done());
        assert_eq!(clone.trace_id(), Some("abc123"));
    }
}
