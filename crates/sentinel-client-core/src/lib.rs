//! Sentinel client core.
//!
//! Retrieves the secrets listing from the Safe over identity-bound mTLS:
//!
//! - SPIFFE Workload API identity source (gRPC over a Unix socket)
//! - Acquisition coordinator racing the source against cancellation
//! - Self-identity check before any network call to the Safe
//! - mTLS connection with the peer allow-list enforced in the handshake
//! - One bounded HTTP/1.1 `GET`, body returned verbatim

pub mod client;
pub mod config;
pub mod connection;
pub mod context;
pub mod coordinator;
pub mod endpoint;
pub mod error;
pub mod fetch;
pub mod stream_io;
pub mod workload;

pub use client::SafeClient;
pub use config::SentinelConfig;
pub use connection::SafeConnection;
pub use context::{CancelHandle, CancelReason, CorrelationId, OperationContext};
pub use coordinator::{acquire, obtain, AcquisitionOutcome, VerifiedIdentity};
pub use endpoint::SafeEndpoint;
pub use error::{AcquisitionError, ConfigError, ErrorCategory, SentinelError, TransportError};
pub use fetch::{fetch, RequestMode, SecretsTarget};
pub use workload::{IdentitySource, WorkloadApiAddress, WorkloadApiSource};
