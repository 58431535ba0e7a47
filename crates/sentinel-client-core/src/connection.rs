//! Verified TLS connection to the Safe.
//!
//! After the handshake succeeds, `SafeConnection` wraps the TLS stream and
//! caches the SPIFFE ID the Safe presented. The verifier has already
//! checked it against the peer allow-list; this is the record of who we are
//! talking to.

use rustls_pki_types::CertificateDer;
use sentinel_proto::identity::SpiffeId;
use sentinel_proto::tls::cert_extract::extract_spiffe_id;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

use crate::error::TransportError;

/// A mutually authenticated connection with a known peer SPIFFE ID.
pub struct SafeConnection {
    inner: TlsStream<TcpStream>,
    peer_id: SpiffeId,
}

impl SafeConnection {
    /// Wrap a completed TLS stream, extracting the peer's SPIFFE ID.
    pub fn from_tls(stream: TlsStream<TcpStream>) -> Result<Self, TransportError> {
        let peer_id = extract_peer_id(&stream)?;
        Ok(Self {
            inner: stream,
            peer_id,
        })
    }

    /// The verified SPIFFE ID of the connected Safe.
    pub fn peer_id(&self) -> &SpiffeId {
        &self.peer_id
    }

    /// ALPN protocol agreed during the handshake, if any.
    pub fn alpn_protocol(&self) -> Option<&[u8]> {
        self.inner.get_ref().1.alpn_protocol()
    }

    pub fn into_inner(self) -> TlsStream<TcpStream> {
        self.inner
    }
}

fn extract_peer_id(stream: &TlsStream<TcpStream>) -> Result<SpiffeId, TransportError> {
    let certs: &[CertificateDer<'static>] = stream
        .get_ref()
        .1
        .peer_certificates()
        .ok_or_else(|| TransportError::PeerIdentity("no peer certificates available".into()))?;

    let leaf = certs
        .first()
        .ok_or_else(|| TransportError::PeerIdentity("peer certificate chain is empty".into()))?;

    extract_spiffe_id(leaf).map_err(|e| TransportError::PeerIdentity(e.to_string()))
}
