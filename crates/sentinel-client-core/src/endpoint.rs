//! mTLS client endpoint for the Safe.
//!
//! `SafeEndpoint` holds a TLS connector built from a verified identity and
//! the peer allow-list. `connect` dials TCP and runs the handshake; the
//! server verifier enforces the allow-list inside the handshake, so a
//! rejected Safe never sees a request byte.

use std::sync::Arc;

use sentinel_proto::policy::IdentityMatcher;
use sentinel_proto::tls::config::build_client_tls_config;
use sentinel_proto::tls::verifier::peer_rejection;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, error, info};

use crate::connection::SafeConnection;
use crate::context::OperationContext;
use crate::coordinator::VerifiedIdentity;
use crate::error::{SentinelError, TransportError};
use crate::fetch::SecretsTarget;

/// A TLS client endpoint that only connects to allowed Safe identities.
pub struct SafeEndpoint {
    connector: TlsConnector,
}

impl SafeEndpoint {
    /// Build an endpoint presenting `identity` and accepting only servers
    /// whose SPIFFE ID satisfies `peer`.
    pub fn new(
        identity: &VerifiedIdentity,
        peer: Arc<dyn IdentityMatcher>,
    ) -> Result<Self, TransportError> {
        let handle = identity.handle();
        let config = build_client_tls_config(handle.svid(), handle.bundles(), peer)?;
        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
        })
    }

    /// Connect to `target` and complete the mutual TLS handshake.
    pub async fn connect(
        &self,
        ctx: &OperationContext,
        target: &SecretsTarget,
    ) -> Result<SafeConnection, SentinelError> {
        let correlation_id = ctx.correlation_id();
        let addr = target.authority();

        let tcp = ctx
            .run(TcpStream::connect(target.socket_addr()))
            .await
            .map_err(|reason| SentinelError::cancelled(correlation_id, reason))?
            .map_err(|source| {
                SentinelError::transport(
                    correlation_id,
                    TransportError::Connect {
                        addr: addr.clone(),
                        source,
                    },
                )
            })?;
        if let Err(err) = tcp.set_nodelay(true) {
            debug!(%correlation_id, error = %err, "could not set TCP_NODELAY");
        }
        debug!(%correlation_id, %addr, "TCP connected");

        let server_name = target.server_name();
        let tls = ctx
            .run(self.connector.connect(server_name, tcp))
            .await
            .map_err(|reason| SentinelError::cancelled(correlation_id, reason))?
            .map_err(|err| match peer_rejection(&err) {
                Some(rejected) => {
                    error!(
                        %correlation_id,
                        peer = %rejected.peer,
                        "Safe presented an identity that is not allowed"
                    );
                    SentinelError::PeerIdentityRejected {
                        correlation_id: correlation_id.clone(),
                        peer: rejected.peer.clone(),
                    }
                }
                None => SentinelError::transport(correlation_id, TransportError::Handshake(err)),
            })?;

        let connection = SafeConnection::from_tls(tls)
            .map_err(|e| SentinelError::transport(correlation_id, e))?;

        info!(
            %correlation_id,
            peer = %connection.peer_id(),
            alpn = ?connection.alpn_protocol().map(String::from_utf8_lossy),
            "connected to Safe"
        );
        Ok(connection)
    }
}
