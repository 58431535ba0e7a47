//! TLS configuration for SPIFFE mTLS connections.
//!
//! - SPIFFE ID extraction from X.509 DER (URI SAN)
//! - Custom rustls verifiers (bundle-per-trust-domain chain check + allow-list)
//! - TLS config builders (client, and server for standing in as the Safe)

pub mod cert_extract;
pub mod config;
pub mod verifier;
