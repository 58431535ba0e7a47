//! Acquisition coordinator.
//!
//! Races one identity acquisition against the operation's cancellation
//! signal and deadline, then applies the self-identity policy. Exactly one
//! [`AcquisitionOutcome`] comes out of every attempt.
//!
//! The acquisition runs on its own task and reports over a capacity-one
//! `oneshot`, so its send never blocks. If nobody is listening any more the
//! handle it was about to deliver is closed on the spot; a handle already
//! sitting in the channel is released when the channel is dropped. The task
//! stops as soon as the receiving side is gone, even if the context itself
//! never fires.

use std::fmt;
use std::sync::Arc;

use sentinel_proto::identity::{IdentityHandle, SpiffeId};
use sentinel_proto::policy::IdentityPolicy;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::context::{CancelReason, CorrelationId, OperationContext};
use crate::error::{AcquisitionError, SentinelError};
use crate::workload::IdentitySource;

/// An identity handle whose SPIFFE ID passed the self-identity policy.
///
/// Only [`acquire`] and [`obtain`] construct one, and the fetch path only
/// accepts this type, so a network call with an unchecked identity cannot
/// be written.
pub struct VerifiedIdentity {
    handle: IdentityHandle,
}

impl VerifiedIdentity {
    pub fn spiffe_id(&self) -> &SpiffeId {
        self.handle.spiffe_id()
    }

    pub fn handle(&self) -> &IdentityHandle {
        &self.handle
    }

    /// Release the underlying identity now.
    pub fn close(self) {
        self.handle.close();
    }
}

impl fmt::Debug for VerifiedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifiedIdentity")
            .field("spiffe_id", self.spiffe_id())
            .finish_non_exhaustive()
    }
}

/// The single result of one acquisition attempt.
#[derive(Debug)]
pub enum AcquisitionOutcome {
    Acquired(VerifiedIdentity),
    /// The source issued an identity the self policy does not allow. The
    /// handle has already been released.
    Rejected { spiffe_id: SpiffeId },
    Failed(AcquisitionError),
    Cancelled(CancelReason),
}

impl AcquisitionOutcome {
    pub fn into_result(self, correlation_id: &CorrelationId) -> Result<VerifiedIdentity, SentinelError> {
        let correlation_id = correlation_id.clone();
        match self {
            Self::Acquired(identity) => Ok(identity),
            Self::Rejected { spiffe_id } => Err(SentinelError::SelfIdentityRejected {
                correlation_id,
                spiffe_id,
            }),
            Self::Failed(source) => Err(SentinelError::AttestationUnavailable {
                correlation_id,
                source,
            }),
            Self::Cancelled(reason) => Err(SentinelError::Cancelled {
                correlation_id,
                reason,
            }),
        }
    }
}

/// Acquire an identity from `source` and check it against the self policy.
///
/// A cancellation or deadline that is due at the same time as the source's
/// result wins.
pub async fn acquire(
    ctx: &OperationContext,
    source: Arc<dyn IdentitySource>,
    policy: &IdentityPolicy,
) -> AcquisitionOutcome {
    let correlation_id = ctx.correlation_id().clone();
    let (mut tx, rx) = oneshot::channel();

    let task_ctx = ctx.clone();
    tokio::spawn(async move {
        let result = tokio::select! {
            biased;
            reason = task_ctx.done() => {
                debug!(correlation_id = %task_ctx.correlation_id(), %reason, "identity acquisition abandoned");
                return;
            }
            _ = tx.closed() => {
                debug!(correlation_id = %task_ctx.correlation_id(), "identity acquisition abandoned by caller");
                return;
            }
            result = source.acquire(&task_ctx) => result,
        };
        if let Err(Ok(unclaimed)) = tx.send(result) {
            unclaimed.close();
        }
    });

    let received = tokio::select! {
        biased;
        reason = ctx.done() => {
            warn!(%correlation_id, %reason, "identity acquisition cancelled");
            return AcquisitionOutcome::Cancelled(reason);
        }
        received = rx => received,
    };

    match received {
        Err(_) => {
            error!(%correlation_id, "identity acquisition task ended without a result");
            AcquisitionOutcome::Failed(AcquisitionError::Interrupted)
        }
        Ok(Err(err)) => {
            error!(%correlation_id, error = %err, "identity source unavailable");
            AcquisitionOutcome::Failed(err)
        }
        Ok(Ok(handle)) => check_self(&correlation_id, handle, policy),
    }
}

/// [`acquire`], folded into a `Result`.
pub async fn obtain(
    ctx: &OperationContext,
    source: Arc<dyn IdentitySource>,
    policy: &IdentityPolicy,
) -> Result<VerifiedIdentity, SentinelError> {
    acquire(ctx, source, policy)
        .await
        .into_result(ctx.correlation_id())
}

fn check_self(
    correlation_id: &CorrelationId,
    handle: IdentityHandle,
    policy: &IdentityPolicy,
) -> AcquisitionOutcome {
    let spiffe_id = handle.spiffe_id().clone();

    if policy.is_self_allowed(&spiffe_id.to_string()) {
        info!(
            %correlation_id,
            %spiffe_id,
            fingerprint = %handle.svid().fingerprint(),
            "identity acquired"
        );
        return AcquisitionOutcome::Acquired(VerifiedIdentity { handle });
    }

    error!(
        %correlation_id,
        %spiffe_id,
        "acquired identity is not an allowed Sentinel identity"
    );
    handle.close();
    AcquisitionOutcome::Rejected { spiffe_id }
}
