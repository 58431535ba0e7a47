//! Identity sources.
//!
//! An [`IdentitySource`] hands out one [`IdentityHandle`] per call. The
//! production source is the SPIFFE Workload API ([`WorkloadApiSource`]);
//! tests substitute their own.

mod client;
pub mod proto;

use async_trait::async_trait;
use sentinel_proto::identity::IdentityHandle;

use crate::context::OperationContext;
use crate::error::AcquisitionError;

pub use client::{handle_from_response, WorkloadApiAddress, WorkloadApiSource};

/// Something that can attest this workload and issue it an X.509-SVID.
///
/// The returned handle owns whatever session backs the SVID; dropping or
/// closing it releases that session.
#[async_trait]
pub trait IdentitySource: Send + Sync {
    async fn acquire(&self, ctx: &OperationContext) -> Result<IdentityHandle, AcquisitionError>;
}
