//! Error types for the Sentinel client.
//!
//! [`SentinelError`] is what callers see. Each variant maps to one
//! [`ErrorCategory`], carries the operation's correlation id and renders as
//! `[<correlation id>] <category>: <cause>`. None of them are retried.

use std::fmt;
use std::io;

use sentinel_proto::identity::SpiffeId;
use sentinel_proto::ProtoError;
use thiserror::Error;

use crate::context::{CancelReason, CorrelationId};

/// Coarse classification of a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    AttestationUnavailable,
    SelfIdentityRejected,
    PeerIdentityRejected,
    TransportFailure,
    Cancelled,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AttestationUnavailable => "attestation_unavailable",
            Self::SelfIdentityRejected => "self_identity_rejected",
            Self::PeerIdentityRejected => "peer_identity_rejected",
            Self::TransportFailure => "transport_failure",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure to obtain an identity from the identity source.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("identity source unreachable: {0}")]
    Unreachable(String),

    #[error("identity request denied: {0}")]
    Denied(String),

    #[error("invalid identity response: {0}")]
    InvalidResponse(#[from] ProtoError),

    #[error("workload API error: {0}")]
    Rpc(String),

    #[error("identity acquisition ended without reporting a result")]
    Interrupted,
}

/// Failure between building the TLS config and reading the last body byte.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid Safe endpoint: {0}")]
    InvalidTarget(String),

    #[error("TLS configuration error: {0}")]
    TlsConfiguration(#[from] ProtoError),

    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] io::Error),

    #[error("peer identity unavailable: {0}")]
    PeerIdentity(String),

    #[error("HTTP exchange failed: {0}")]
    Http(#[from] hyper::Error),

    #[error("response body exceeds {limit} bytes")]
    ResponseTooLarge { limit: usize },

    #[error("response body read failed: {0}")]
    Body(String),
}

/// Invalid configuration value.
#[derive(Debug, Error)]
#[error("invalid value for {var}: {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub reason: String,
}

/// Terminal error of a Sentinel operation.
#[derive(Debug, Error)]
pub enum SentinelError {
    #[error("[{correlation_id}] {}: {source}", ErrorCategory::AttestationUnavailable)]
    AttestationUnavailable {
        correlation_id: CorrelationId,
        #[source]
        source: AcquisitionError,
    },

    #[error(
        "[{correlation_id}] {}: {spiffe_id} is not an allowed Sentinel identity",
        ErrorCategory::SelfIdentityRejected
    )]
    SelfIdentityRejected {
        correlation_id: CorrelationId,
        spiffe_id: SpiffeId,
    },

    #[error(
        "[{correlation_id}] {}: {peer} is not an allowed Safe identity",
        ErrorCategory::PeerIdentityRejected
    )]
    PeerIdentityRejected {
        correlation_id: CorrelationId,
        peer: SpiffeId,
    },

    #[error("[{correlation_id}] {}: {source}", ErrorCategory::TransportFailure)]
    TransportFailure {
        correlation_id: CorrelationId,
        #[source]
        source: TransportError,
    },

    #[error("[{correlation_id}] {}: {reason}", ErrorCategory::Cancelled)]
    Cancelled {
        correlation_id: CorrelationId,
        reason: CancelReason,
    },
}

impl SentinelError {
    pub fn transport(correlation_id: &CorrelationId, source: impl Into<TransportError>) -> Self {
        Self::TransportFailure {
            correlation_id: correlation_id.clone(),
            source: source.into(),
        }
    }

    pub fn cancelled(correlation_id: &CorrelationId, reason: CancelReason) -> Self {
        Self::Cancelled {
            correlation_id: correlation_id.clone(),
            reason,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::AttestationUnavailable { .. } => ErrorCategory::AttestationUnavailable,
            Self::SelfIdentityRejected { .. } => ErrorCategory::SelfIdentityRejected,
            Self::PeerIdentityRejected { .. } => ErrorCategory::PeerIdentityRejected,
            Self::TransportFailure { .. } => ErrorCategory::TransportFailure,
            Self::Cancelled { .. } => ErrorCategory::Cancelled,
        }
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        match self {
            Self::AttestationUnavailable { correlation_id, .. }
            | Self::SelfIdentityRejected { correlation_id, .. }
            | Self::PeerIdentityRejected { correlation_id, .. }
            | Self::TransportFailure { correlation_id, .. }
            | Self::Cancelled { correlation_id, .. } => correlation_id,
        }
    }
}
