//! X.509 trust bundles, keyed by trust domain.
//!
//! A peer's chain is only ever checked against the bundle of the trust domain
//! named in its own SPIFFE ID, so a CA from a federated domain can never vouch
//! for an identity in ours.

use std::collections::HashMap;
use std::sync::Arc;

use rustls::RootCertStore;
use rustls_pki_types::CertificateDer;

use crate::error::{ProtoError, Result};
use crate::identity::TrustDomain;
use crate::tls::cert_extract::split_der_certificates;

/// Root certificates for one trust domain.
#[derive(Debug, Clone)]
pub struct TrustBundle {
    trust_domain: TrustDomain,
    roots: Vec<CertificateDer<'static>>,
}

impl TrustBundle {
    /// Create a bundle from individual DER roots.
    pub fn new(trust_domain: TrustDomain, roots: Vec<CertificateDer<'static>>) -> Result<Self> {
        if roots.is_empty() {
            return Err(ProtoError::InvalidBundle {
                trust_domain: trust_domain.to_string(),
                reason: "bundle contains no certificates".into(),
            });
        }
        Ok(Self {
            trust_domain,
            roots,
        })
    }

    /// Parse a bundle from concatenated DER, as sent by the Workload API.
    pub fn parse(trust_domain: TrustDomain, der: &[u8]) -> Result<Self> {
        let roots = split_der_certificates(der).map_err(|e| ProtoError::InvalidBundle {
            trust_domain: trust_domain.to_string(),
            reason: e.to_string(),
        })?;
        Self::new(trust_domain, roots)
    }

    pub fn trust_domain(&self) -> &TrustDomain {
        &self.trust_domain
    }

    pub fn roots(&self) -> &[CertificateDer<'static>] {
        &self.roots
    }

    /// Build a rustls root store holding every root of this bundle.
    pub fn root_store(&self) -> Result<RootCertStore> {
        let mut store = RootCertStore::empty();
        for root in &self.roots {
            store
                .add(root.clone())
                .map_err(|e| ProtoError::InvalidBundle {
                    trust_domain: self.trust_domain.to_string(),
                    reason: format!("unusable trust anchor: {e}"),
                })?;
        }
        Ok(store)
    }
}

/// The set of bundles a workload trusts: its own trust domain plus any
/// federated ones.
#[derive(Debug, Clone, Default)]
pub struct BundleSet {
    bundles: HashMap<TrustDomain, Arc<TrustBundle>>,
}

impl BundleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the bundle for its trust domain.
    pub fn insert(&mut self, bundle: TrustBundle) {
        self.bundles
            .insert(bundle.trust_domain().clone(), Arc::new(bundle));
    }

    /// The bundle for `trust_domain`, if one is known.
    pub fn get(&self, trust_domain: &TrustDomain) -> Option<&Arc<TrustBundle>> {
        self.bundles.get(trust_domain)
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    /// Iterate over the trust domains with a known bundle.
    pub fn trust_domains(&self) -> impl Iterator<Item = &TrustDomain> {
        self.bundles.keys()
    }
}

impl From<TrustBundle> for BundleSet {
    fn from(bundle: TrustBundle) -> Self {
        let mut set = Self::new();
        set.insert(bundle);
        set
    }
}
