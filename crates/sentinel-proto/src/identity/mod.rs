//! Workload identity primitives: SPIFFE IDs, X.509-SVIDs, trust bundles.
//!
//! An SVID is never minted locally. It is handed out by the SPIFFE Workload
//! API and wrapped in an [`IdentityHandle`] that owns it until release.

pub mod bundle;
pub mod handle;
#[cfg(any(test, feature = "test-issuer"))]
pub mod issuer;
pub mod spiffe_id;
pub mod svid;

pub use bundle::{BundleSet, TrustBundle};
pub use handle::IdentityHandle;
pub use spiffe_id::{SpiffeId, TrustDomain};
pub use svid::X509Svid;
