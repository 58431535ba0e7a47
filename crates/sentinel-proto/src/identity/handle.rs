//! Identity handle: exclusive ownership of an acquired SVID.
//!
//! Whoever acquired the SVID from an identity source owns the handle until it
//! is released. Release runs the source's cleanup hook (closing the Workload
//! API session, for instance) exactly once: either through [`IdentityHandle::close`]
//! or, if the owner never gets that far, when the handle is dropped.

use std::fmt;

use crate::identity::{BundleSet, SpiffeId, X509Svid};

type ReleaseHook = Box<dyn FnOnce() + Send>;

/// Exclusive ownership of an X.509-SVID and the bundles it was issued with.
pub struct IdentityHandle {
    svid: X509Svid,
    bundles: BundleSet,
    release: Option<ReleaseHook>,
}

impl IdentityHandle {
    /// Wrap an SVID and its bundles. No release hook is attached.
    pub fn new(svid: X509Svid, bundles: BundleSet) -> Self {
        Self {
            svid,
            bundles,
            release: None,
        }
    }

    /// Attach the hook that runs when the handle is released.
    pub fn on_release(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.release = Some(Box::new(hook));
        self
    }

    pub fn svid(&self) -> &X509Svid {
        &self.svid
    }

    pub fn bundles(&self) -> &BundleSet {
        &self.bundles
    }

    /// Shorthand for `self.svid().spiffe_id()`.
    pub fn spiffe_id(&self) -> &SpiffeId {
        self.svid.spiffe_id()
    }

    /// Release the handle now.
    pub fn close(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if let Some(hook) = self.release.take() {
            hook();
        }
    }
}

impl Drop for IdentityHandle {
    fn drop(&mut self) {
        self.release_once();
    }
}

impl fmt::Debug for IdentityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityHandle")
            .field("spiffe_id", self.spiffe_id())
            .field("bundles", &self.bundles.len())
            .field("released", &self.release.is_none())
            .finish()
    }
}
