//! Cancellation and deadline budget shared by every remote call of a pipeline

use std::{future::Future, time::Duration};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Default budget when the caller does not provide one (matches the Ollama client timeout)
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 30;

/// Why a call was abandoned before it produced a value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    Cancelled,
    TimedOut(Duration),
}

/// Caller-owned cancellation context
///
/// Holds a [`CancellationToken`] and an absolute deadline. Every remote call in the
/// pipeline runs through [`CallContext::run`], so no stage can outlive the caller's
/// budget or ignore its cancellation.
#[derive(Debug, Clone)]
pub struct CallContext {
    cancel: CancellationToken,
    deadline: Instant,
    budget: Duration,
}

impl CallContext {
    /// Context with a fresh token and the given budget starting now
    pub fn with_timeout(budget: Duration) -> Self {
        Self::with_token(CancellationToken::new(), budget)
    }

    /// Context bound to an existing token
    pub fn with_token(cancel: CancellationToken, budget: Duration) -> Self {
        Self {
            cancel,
            deadline: Instant::now() + budget,
            budget,
        }
    }

    /// Child context sharing this token; its deadline never exceeds the parent's
    pub fn child(&self, budget: Duration) -> Self {
        let deadline = (Instant::now() + budget).min(self.deadline);
        Self {
            cancel: self.cancel.child_token(),
            deadline,
            budget: budget.min(self.budget),
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline (zero once it passed)
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Run `fut` until it completes, the token fires, or the deadline passes
    ///
    /// A context that is already cancelled never polls `fut`.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, Interrupt>
    where
        F: Future<Output = T>,
    {
        if self.cancel.is_cancelled() {
            return Err(Interrupt::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Interrupt::Cancelled),
            outcome = tokio::time::timeout_at(self.deadline, fut) => {
                outcome.map_err(|_| Interrupt::TimedOut(self.budget))
            }
        }
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::with_timeout(Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS))
    }
}
