//! TLS configuration builders for SPIFFE mTLS endpoints.
//!
//! Constructs `rustls::ClientConfig` and `rustls::ServerConfig` that present
//! an X.509-SVID and verify the peer with the SPIFFE verifiers.
//!
//! Both builders enforce:
//! - Ring crypto provider
//! - TLS 1.3, with TLS 1.2 allowed for older Safe deployments
//! - Mandatory certificate authentication in both directions
//! - ALPN `http/1.1`

use std::sync::Arc;

use rustls::client::danger::ServerCertVerifier;
use rustls::server::danger::ClientCertVerifier;

use crate::error::{ProtoError, Result};
use crate::identity::{BundleSet, X509Svid};
use crate::policy::IdentityMatcher;
use crate::tls::verifier::{SpiffeClientCertVerifier, SpiffeServerCertVerifier};

/// ALPN protocol identifier: the Safe API is plain HTTP/1.1 over mTLS.
pub const ALPN_HTTP1: &[u8] = b"http/1.1";

const PROTOCOL_VERSIONS: &[&rustls::SupportedProtocolVersion] =
    &[&rustls::version::TLS13, &rustls::version::TLS12];

/// Build a `rustls::ClientConfig` that authenticates with `svid` and only
/// completes handshakes with servers whose SVID chains to `bundles` and whose
/// SPIFFE ID satisfies `authorizer`.
pub fn build_client_tls_config(
    svid: &X509Svid,
    bundles: &BundleSet,
    authorizer: Arc<dyn IdentityMatcher>,
) -> Result<rustls::ClientConfig> {
    let verifier: Arc<dyn ServerCertVerifier> =
        Arc::new(SpiffeServerCertVerifier::new(bundles, authorizer)?);

    let mut config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_protocol_versions(PROTOCOL_VERSIONS)
    .map_err(|e| ProtoError::TlsConfiguration(format!("TLS version config: {e}")))?
    .dangerous()
    .with_custom_certificate_verifier(verifier)
    .with_client_auth_cert(svid.cert_chain().to_vec(), svid.private_key())
    .map_err(|e| ProtoError::TlsConfiguration(format!("client cert config: {e}")))?;

    config.alpn_protocols = vec![ALPN_HTTP1.to_vec()];

    Ok(config)
}

/// Build a `rustls::ServerConfig` that presents `svid` and requires clients
/// to present an SVID that chains to `bundles` and satisfies `authorizer`.
pub fn build_server_tls_config(
    svid: &X509Svid,
    bundles: &BundleSet,
    authorizer: Arc<dyn IdentityMatcher>,
) -> Result<rustls::ServerConfig> {
    let verifier: Arc<dyn ClientCertVerifier> =
        Arc::new(SpiffeClientCertVerifier::new(bundles, authorizer)?);

    let mut config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_protocol_versions(PROTOCOL_VERSIONS)
    .map_err(|e| ProtoError::TlsConfiguration(format!("TLS version config: {e}")))?
    .with_client_cert_verifier(verifier)
    .with_single_cert(svid.cert_chain().to_vec(), svid.private_key())
    .map_err(|e| ProtoError::TlsConfiguration(format!("server cert config: {e}")))?;

    config.alpn_protocols = vec![ALPN_HTTP1.to_vec()];

    Ok(config)
}
