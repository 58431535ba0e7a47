//! Per-operation context: correlation id, cancellation and deadline.
//!
//! Every call into the client takes an [`OperationContext`]. It is cheap to
//! clone and immutable once built; the background acquisition task gets its
//! own clone and observes the same cancellation signal as the caller.

use std::fmt;
use std::future::{pending, Future};
use std::sync::Arc;
use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::sync::watch;
use tokio::time::Instant;

/// Length of a generated correlation id.
pub const CORRELATION_ID_LEN: usize = 8;

/// Opaque per-operation token attached to every log line and error.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(Arc<str>);

impl CorrelationId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Arc::from(value.into()))
    }

    /// A random alphanumeric id of [`CORRELATION_ID_LEN`] characters.
    pub fn generate() -> Self {
        let value: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(CORRELATION_ID_LEN)
            .map(char::from)
            .collect();
        Self::new(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CorrelationId({})", self.0)
    }
}

/// Why an operation stopped before producing a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The caller fired its [`CancelHandle`].
    Cancelled,
    /// The context deadline passed.
    DeadlineExceeded,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => f.write_str("operation cancelled"),
            Self::DeadlineExceeded => f.write_str("deadline exceeded"),
        }
    }
}

/// Fires the cancellation signal of the context it was created with.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

#[derive(Debug, Clone)]
pub struct OperationContext {
    correlation_id: CorrelationId,
    cancel: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

impl OperationContext {
    pub fn new(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            cancel: None,
            deadline: None,
        }
    }

    /// Context with a freshly generated correlation id.
    pub fn generated() -> Self {
        Self::new(CorrelationId::generate())
    }

    /// Bound the operation to `timeout` from now. An earlier existing
    /// deadline is kept.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    /// Attach a cancellation signal and return the handle that fires it.
    pub fn cancellable(mut self) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        self.cancel = Some(rx);
        (self, CancelHandle { tx: Arc::new(tx) })
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Non-blocking check: has the operation already been stopped?
    pub fn check(&self) -> Option<CancelReason> {
        if self.cancel.as_ref().is_some_and(|rx| *rx.borrow()) {
            return Some(CancelReason::Cancelled);
        }
        if self.deadline.is_some_and(|d| d <= Instant::now()) {
            return Some(CancelReason::DeadlineExceeded);
        }
        None
    }

    /// Resolves once the operation is cancelled or its deadline passes.
    /// Never resolves for a context with neither.
    pub async fn done(&self) -> CancelReason {
        let cancelled = async {
            match &self.cancel {
                Some(rx) => {
                    let mut rx = rx.clone();
                    // A dropped handle can no longer cancel.
                    if rx.wait_for(|fired| *fired).await.is_err() {
                        pending::<()>().await;
                    }
                }
                None => pending::<()>().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => CancelReason::Cancelled,
            _ = expired => CancelReason::DeadlineExceeded,
        }
    }

    /// Drive `fut` unless the context stops first. A stop that is already
    /// due wins over a future that is also ready.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, CancelReason> {
        tokio::select! {
            biased;
            reason = self.done() => Err(reason),
            output = fut => Ok(output),
        }
    }
}
