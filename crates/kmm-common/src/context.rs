//! Per-call cancellation and deadline
//!
//! Every call the engine makes against the cluster or the registry runs
//! through [`CallContext::run`], so a caller can abandon a reconciliation
//! and get a distinguishable [`Error::Cancelled`] back instead of a
//! generic I/O failure.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// Caller-supplied cancellation token plus an optional deadline
#[derive(Clone, Debug)]
pub struct CallContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for CallContext {
    fn default() -> Self {
        Self::background()
    }
}

impl CallContext {
    /// A context that is never cancelled and has no deadline
    pub fn background() -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// A context bound to an existing cancellation token
    pub fn with_token(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    /// Derive a context whose deadline is at most `timeout` from now.
    ///
    /// An earlier existing deadline is kept.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Self {
            cancel: self.cancel.clone(),
            deadline: Some(deadline),
        }
    }

    /// The underlying cancellation token
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// True once the token is cancelled or the deadline has passed
    pub fn is_done(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Fail with [`Error::Cancelled`] if the context has already ended
    pub fn check(&self, operation: &str) -> Result<()> {
        if self.is_done() {
            return Err(Error::cancelled(operation));
        }
        Ok(())
    }

    /// Run `fut`, failing with [`Error::Cancelled`] if the context ends first.
    pub async fn run<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check(operation)?;

        let deadline = async {
            match self.deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::cancelled(operation)),
            _ = deadline => Err(Error::cancelled(operation)),
            res = fut => res,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn background_context_passes_results_through() {
        let ctx = CallContext::background();
        let res = ctx.run("noop", async { Ok::<_, Error>(7) }).await;
        assert_eq!(res.unwrap(), 7);
    }

    #[tokio::test]
    async fn errors_from_the_call_are_not_rewritten() {
        let ctx = CallContext::background();
        let res: Result<()> = ctx
            .run("get", async { Err(Error::backend("get", "boom")) })
            .await;
        assert!(matches!(res, Err(Error::BackendOperation { .. })));
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let token = CancellationToken::new();
        token.cancel();
        let ctx = CallContext::with_token(token);
        let res = ctx.run("list pods", async { Ok::<_, Error>(()) }).await;
        assert!(res.unwrap_err().is_cancelled());
    }

    #[test]
    fn check_reports_cancellation() {
        let ctx = CallContext::background();
        assert!(ctx.check("sync").is_ok());
        ctx.token().cancel();
        assert_eq!(ctx.check("sync").unwrap_err().to_string(), "sync cancelled");
    }

    #[tokio::test]
    async fn cancellation_interrupts_pending_call() {
        let token = CancellationToken::new();
        let ctx = CallContext::with_token(token.clone());
        let handle = tokio::spawn(async move {
            ctx.run("image exists", std::future::pending::<Result<()>>())
                .await
        });
        token.cancel();
        let res = handle.await.unwrap();
        assert!(res.unwrap_err().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_expiry_is_cancellation() {
        let ctx = CallContext::background().with_timeout(Duration::from_millis(500));
        let res = ctx
            .run("image exists", std::future::pending::<Result<()>>())
            .await;
        assert!(res.unwrap_err().is_cancelled());
    }

    #[test]
    fn with_timeout_keeps_earlier_deadline() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        rt.block_on(async {
            let short = CallContext::background().with_timeout(Duration::from_secs(1));
            let longer = short.with_timeout(Duration::from_secs(60));
            assert_eq!(short.deadline, longer.deadline);
        });
    }
}
