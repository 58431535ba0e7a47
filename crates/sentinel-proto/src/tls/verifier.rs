//! Custom rustls verifiers for SPIFFE mTLS.
//!
//! `SpiffeServerCertVerifier` (client-side) and `SpiffeClientCertVerifier`
//! (server-side) both:
//!
//! 1. extract the peer's SPIFFE ID from the leaf URI SAN,
//! 2. select the trust bundle for that ID's trust domain,
//! 3. verify the chain against that bundle only,
//! 4. check the ID against the peer allow-list.
//!
//! Any failure aborts the handshake, so nothing is ever sent to a peer that
//! is not both correctly signed and explicitly allowed. Server names (SNI)
//! are ignored: SVIDs carry no DNS names, the SPIFFE ID is the identity.
//!
//! Signature verification is delegated to the rustls ring crypto provider.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::verify_server_cert_signed_by_trust_anchor;
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::server::{ParsedCertificate, WebPkiClientVerifier};
use rustls::{DigitallySignedStruct, Error as TlsError, OtherError, RootCertStore, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use thiserror::Error;

use crate::error::{ProtoError, Result};
use crate::identity::{BundleSet, SpiffeId, TrustDomain};
use crate::policy::IdentityMatcher;
use crate::tls::cert_extract::inspect_leaf;

/// The peer presented a valid SVID whose SPIFFE ID is not on the allow-list.
///
/// Carried inside [`rustls::Error::Other`] so the caller can tell an
/// authorization failure apart from a broken or untrusted chain.
#[derive(Debug, Clone, Error)]
#[error("peer {peer} is not an authorized identity")]
pub struct PeerRejected {
    pub peer: SpiffeId,
}

/// Find a [`PeerRejected`] inside an I/O error returned by a TLS stream.
pub fn peer_rejection(err: &io::Error) -> Option<&PeerRejected> {
    let tls = err.get_ref()?.downcast_ref::<TlsError>()?;
    match tls {
        TlsError::Other(OtherError(inner)) => inner.downcast_ref::<PeerRejected>(),
        _ => None,
    }
}

/// Parse the leaf and return its SPIFFE ID, rejecting CA leaves.
fn peer_identity(end_entity: &CertificateDer<'_>) -> std::result::Result<SpiffeId, TlsError> {
    let leaf = inspect_leaf(end_entity)
        .map_err(|e| TlsError::General(format!("peer certificate is not an X.509-SVID: {e}")))?;
    if leaf.is_ca {
        return Err(TlsError::General(format!(
            "peer leaf certificate for {} is a CA certificate",
            leaf.spiffe_id
        )));
    }
    Ok(leaf.spiffe_id)
}

/// Apply the allow-list to an already chain-verified peer.
fn authorize(peer: SpiffeId, authorizer: &dyn IdentityMatcher) -> std::result::Result<(), TlsError> {
    if authorizer.matches(&peer) {
        Ok(())
    } else {
        Err(TlsError::Other(OtherError(Arc::new(PeerRejected { peer }))))
    }
}

fn unknown_trust_domain(peer: &SpiffeId) -> TlsError {
    TlsError::General(format!(
        "no trust bundle for trust domain {} (peer {peer})",
        peer.trust_domain()
    ))
}

/// Get the ring provider's supported signature verification algorithms.
fn ring_signature_algorithms() -> &'static rustls::crypto::WebPkiSupportedAlgorithms {
    use std::sync::LazyLock;
    static ALGORITHMS: LazyLock<rustls::crypto::WebPkiSupportedAlgorithms> = LazyLock::new(|| {
        rustls::crypto::ring::default_provider().signature_verification_algorithms
    });
    &ALGORITHMS
}

// ---------------------------------------------------------------------------
// Client-side: verifies the server's certificate
// ---------------------------------------------------------------------------

/// Server certificate verifier used by the client.
///
/// Verifies the server's SVID chain against the bundle of the server's own
/// trust domain, then applies the peer allow-list.
#[derive(Debug)]
pub struct SpiffeServerCertVerifier {
    roots: HashMap<TrustDomain, Arc<RootCertStore>>,
    authorizer: Arc<dyn IdentityMatcher>,
}

impl SpiffeServerCertVerifier {
    pub fn new(bundles: &BundleSet, authorizer: Arc<dyn IdentityMatcher>) -> Result<Self> {
        let mut roots = HashMap::with_capacity(bundles.len());
        for trust_domain in bundles.trust_domains() {
            if let Some(bundle) = bundles.get(trust_domain) {
                roots.insert(trust_domain.clone(), Arc::new(bundle.root_store()?));
            }
        }

        if roots.is_empty() {
            return Err(ProtoError::TlsConfiguration(
                "cannot verify servers without a trust bundle".into(),
            ));
        }

        Ok(Self { roots, authorizer })
    }
}

impl ServerCertVerifier for SpiffeServerCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, TlsError> {
        let peer = peer_identity(end_entity)?;

        let roots = self
            .roots
            .get(peer.trust_domain())
            .ok_or_else(|| unknown_trust_domain(&peer))?;

        let parsed = ParsedCertificate::try_from(end_entity)?;
        verify_server_cert_signed_by_trust_anchor(
            &parsed,
            roots,
            intermediates,
            now,
            ring_signature_algorithms().all,
        )?;

        authorize(peer, &*self.authorizer)?;
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, TlsError> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, ring_signature_algorithms())
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, TlsError> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, ring_signature_algorithms())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        ring_signature_algorithms().supported_schemes()
    }
}

// ---------------------------------------------------------------------------
// Server-side: verifies the client's certificate
// ---------------------------------------------------------------------------

/// Client certificate verifier for a server standing in as the Safe.
///
/// Chain validation per trust domain is delegated to rustls'
/// `WebPkiClientVerifier`; the allow-list is applied afterwards.
#[derive(Debug)]
pub struct SpiffeClientCertVerifier {
    inner: HashMap<TrustDomain, Arc<dyn ClientCertVerifier>>,
    authorizer: Arc<dyn IdentityMatcher>,
}

impl SpiffeClientCertVerifier {
    pub fn new(bundles: &BundleSet, authorizer: Arc<dyn IdentityMatcher>) -> Result<Self> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let mut inner: HashMap<TrustDomain, Arc<dyn ClientCertVerifier>> =
            HashMap::with_capacity(bundles.len());

        for trust_domain in bundles.trust_domains() {
            let Some(bundle) = bundles.get(trust_domain) else {
                continue;
            };
            let verifier =
                WebPkiClientVerifier::builder_with_provider(Arc::new(bundle.root_store()?), provider.clone())
                    .build()
                    .map_err(|e| {
                        ProtoError::TlsConfiguration(format!("client verifier for {trust_domain}: {e}"))
                    })?;
            inner.insert(trust_domain.clone(), verifier);
        }

        if inner.is_empty() {
            return Err(ProtoError::TlsConfiguration(
                "cannot verify clients without a trust bundle".into(),
            ));
        }

        Ok(Self { inner, authorizer })
    }
}

impl ClientCertVerifier for SpiffeClientCertVerifier {
    fn root_hint_subjects(&self) -> &[rustls::DistinguishedName] {
        // Roots come from several bundles; send no hints.
        &[]
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> std::result::Result<ClientCertVerified, TlsError> {
        let peer = peer_identity(end_entity)?;

        let verifier = self
            .inner
            .get(peer.trust_domain())
            .ok_or_else(|| unknown_trust_domain(&peer))?;
        verifier.verify_client_cert(end_entity, intermediates, now)?;

        authorize(peer, &*self.authorizer)?;
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, TlsError> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, ring_signature_algorithms())
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, TlsError> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, ring_signature_algorithms())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        ring_signature_algorithms().supported_schemes()
    }
}
