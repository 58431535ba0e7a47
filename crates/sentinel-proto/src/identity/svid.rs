//! X.509-SVID: the certificate chain and private key a workload presents.
//!
//! SVIDs are short-lived (SPIRE rotates them well before expiry) and are
//! obtained from the Workload API, never generated locally. The private key
//! is kept as PKCS#8 DER and wiped when the SVID is dropped.

use std::fmt;

use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use zeroize::Zeroizing;

use crate::error::{ProtoError, Result};
use crate::identity::SpiffeId;
use crate::tls::cert_extract::{fingerprint, inspect_leaf, split_der_certificates};

/// An X.509-SVID: leaf-first certificate chain plus the leaf's private key.
pub struct X509Svid {
    spiffe_id: SpiffeId,
    cert_chain: Vec<CertificateDer<'static>>,
    private_key: Zeroizing<Vec<u8>>,
    not_after_epoch: i64,
}

impl X509Svid {
    /// Build an SVID from the Workload API wire encoding: concatenated DER
    /// certificates (leaf first) and a PKCS#8 DER private key.
    pub fn parse(chain_der: &[u8], key_der: &[u8]) -> Result<Self> {
        let chain = split_der_certificates(chain_der)?;
        Self::from_parts(chain, key_der.to_vec())
    }

    /// Build an SVID from an already split chain and a PKCS#8 DER key.
    ///
    /// The leaf must carry exactly one SPIFFE ID URI SAN and must not be a
    /// CA certificate.
    pub fn from_parts(cert_chain: Vec<CertificateDer<'static>>, key_der: Vec<u8>) -> Result<Self> {
        let private_key = Zeroizing::new(key_der);
        if private_key.is_empty() {
            return Err(ProtoError::MissingPrivateKey);
        }

        let leaf = cert_chain
            .first()
            .ok_or_else(|| ProtoError::InvalidSvid("certificate chain is empty".into()))?;
        let info = inspect_leaf(leaf)?;
        if info.is_ca {
            return Err(ProtoError::InvalidSvid(format!(
                "leaf certificate for {} is a CA certificate",
                info.spiffe_id
            )));
        }

        Ok(Self {
            spiffe_id: info.spiffe_id,
            cert_chain,
            private_key,
            not_after_epoch: info.not_after_epoch,
        })
    }

    /// The SPIFFE ID this SVID asserts.
    pub fn spiffe_id(&self) -> &SpiffeId {
        &self.spiffe_id
    }

    /// The full chain, leaf first.
    pub fn cert_chain(&self) -> &[CertificateDer<'static>] {
        &self.cert_chain
    }

    /// DER bytes of the leaf certificate.
    pub fn leaf(&self) -> &[u8] {
        // `from_parts` guarantees a non-empty chain.
        self.cert_chain[0].as_ref()
    }

    /// A rustls-ready copy of the private key.
    ///
    /// The copy is a plain allocation owned by rustls and is not wiped on
    /// drop; only the bytes held by this SVID are.
    pub fn private_key(&self) -> PrivateKeyDer<'static> {
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.private_key.to_vec()))
    }

    /// Leaf expiry, seconds since Unix epoch.
    pub fn not_after_epoch(&self) -> i64 {
        self.not_after_epoch
    }

    /// SHA-256 fingerprint of the leaf certificate.
    pub fn fingerprint(&self) -> String {
        fingerprint(self.leaf())
    }
}

impl fmt::Debug for X509Svid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("X509Svid")
            .field("spiffe_id", &self.spiffe_id)
            .field("chain_len", &self.cert_chain.len())
            .field("not_after_epoch", &self.not_after_epoch)
            .field("private_key", &"<redacted>")
            .finish()
    }
}
