//! Sentinel identity and mTLS primitives.
//!
//! Shared by the secrets client and by anything that has to stand in for the
//! Safe during tests:
//!
//! - SPIFFE IDs, trust domains, X.509-SVIDs and trust bundles
//! - The identity handle that owns an acquired SVID until release
//! - Self/peer identity allow-lists
//! - rustls verifiers that enforce the peer allow-list inside the handshake

pub mod error;
pub mod identity;
pub mod policy;
pub mod tls;

pub use error::{ProtoError, Result};
