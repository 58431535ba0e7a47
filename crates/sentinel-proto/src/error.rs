//! Error types for the `sentinel-proto` crate.
//!
//! These cover identity parsing (SPIFFE IDs, SVIDs, bundles) and TLS
//! configuration. Handshake-time rejections are reported to rustls as
//! [`rustls::Error`] values and surface in the client crate instead.

use thiserror::Error;

/// Errors that can occur within the `sentinel-proto` crate.
#[derive(Debug, Error)]
pub enum ProtoError {
    // --- SPIFFE ID ---
    #[error("invalid SPIFFE ID {input:?}: {reason}")]
    InvalidSpiffeId { input: String, reason: &'static str },

    #[error("invalid trust domain {input:?}: {reason}")]
    InvalidTrustDomain { input: String, reason: &'static str },

    #[error("invalid allow rule {input:?}: {reason}")]
    InvalidRule { input: String, reason: String },

    // --- SVID / bundle ---
    #[error("X.509 parse error: {0}")]
    CertificateParse(String),

    #[error("invalid X.509-SVID: {0}")]
    InvalidSvid(String),

    #[error("invalid trust bundle for {trust_domain}: {reason}")]
    InvalidBundle { trust_domain: String, reason: String },

    #[error("private key is empty")]
    MissingPrivateKey,

    // --- TLS ---
    #[error("TLS configuration error: {0}")]
    TlsConfiguration(String),

    // --- Test issuer ---
    #[error("failed to issue certificate: {0}")]
    CertificateGeneration(String),
}

/// Result type alias using [`ProtoError`].
pub type Result<T> = std::result::Result<T, ProtoError>;
