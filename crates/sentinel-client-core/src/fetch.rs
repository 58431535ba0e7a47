//! Authenticated fetch of the Safe's secrets listing.
//!
//! [`fetch`] takes a [`VerifiedIdentity`] by value, opens one mTLS
//! connection, sends one `GET`, reads the bounded body and releases the
//! identity on every exit path.

use std::net::IpAddr;
use std::sync::Arc;

use rustls_pki_types::ServerName;
use sentinel_proto::policy::IdentityMatcher;
use tracing::{debug, warn};
use url::{Host, Position, Url};

use crate::config::DEFAULT_MAX_RESPONSE_BYTES;
use crate::context::OperationContext;
use crate::coordinator::VerifiedIdentity;
use crate::endpoint::SafeEndpoint;
use crate::error::{SentinelError, TransportError};
use crate::stream_io;

/// Path of the secrets listing, relative to the Safe base URL.
pub const SECRETS_PATH: &str = "sentinel/v1/secrets";

/// Whether secret values come back in the clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    #[default]
    Redacted,
    Revealed,
}

/// Fully resolved request target on the Safe.
#[derive(Debug, Clone)]
pub struct SecretsTarget {
    url: Url,
    connect_host: String,
    port: u16,
    server_name: ServerName<'static>,
    max_response_bytes: usize,
}

impl SecretsTarget {
    /// Resolve the secrets URL under `base` for `mode`.
    ///
    /// `base` must be an `https` URL with a host. Its path is kept as a
    /// prefix; query and fragment are dropped.
    pub fn new(base: &Url, mode: RequestMode) -> Result<Self, TransportError> {
        let invalid = |reason: String| TransportError::InvalidTarget(format!("{base}: {reason}"));

        if base.scheme() != "https" {
            return Err(invalid(format!("scheme must be https, got {}", base.scheme())));
        }
        let port = base
            .port_or_known_default()
            .ok_or_else(|| invalid("missing port".into()))?;

        let (connect_host, server_name) = match base.host() {
            Some(Host::Domain(domain)) => {
                let name = ServerName::try_from(domain)
                    .map_err(|e| invalid(format!("invalid host name: {e}")))?
                    .to_owned();
                (domain.to_string(), name)
            }
            Some(Host::Ipv4(ip)) => (ip.to_string(), ServerName::IpAddress(IpAddr::V4(ip).into())),
            Some(Host::Ipv6(ip)) => (ip.to_string(), ServerName::IpAddress(IpAddr::V6(ip).into())),
            None => return Err(invalid("missing host".into())),
        };

        let mut prefix = base.clone();
        prefix.set_query(None);
        prefix.set_fragment(None);
        if !prefix.path().ends_with('/') {
            let path = format!("{}/", prefix.path());
            prefix.set_path(&path);
        }

        let mut url = prefix
            .join(SECRETS_PATH)
            .map_err(|e| invalid(e.to_string()))?;
        if mode == RequestMode::Revealed {
            url.query_pairs_mut().append_pair("reveal", "true");
        }

        Ok(Self {
            url,
            connect_host,
            port,
            server_name,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
        })
    }

    /// Cap the response body at `limit` bytes.
    pub fn with_max_response_bytes(mut self, limit: usize) -> Self {
        self.max_response_bytes = limit;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// `host[:port]` as written in the URL, for the `Host` header and logs.
    pub fn authority(&self) -> String {
        self.url[Position::BeforeHost..Position::AfterPort].to_string()
    }

    /// Path plus query, the HTTP request target.
    pub fn path_and_query(&self) -> &str {
        &self.url[Position::BeforePath..Position::AfterQuery]
    }

    pub fn socket_addr(&self) -> (&str, u16) {
        (&self.connect_host, self.port)
    }

    pub fn server_name(&self) -> ServerName<'static> {
        self.server_name.clone()
    }

    pub fn max_response_bytes(&self) -> usize {
        self.max_response_bytes
    }
}

/// Fetch the secrets listing from the Safe as `identity`.
///
/// The Safe must present an SVID that chains to the identity's bundles and
/// satisfies `peer`. A non-2xx status is not an error: the body is returned
/// as-is for the caller to show.
pub async fn fetch(
    ctx: &OperationContext,
    identity: VerifiedIdentity,
    peer: Arc<dyn IdentityMatcher>,
    target: &SecretsTarget,
) -> Result<Vec<u8>, SentinelError> {
    let result = fetch_as(ctx, &identity, peer, target).await;
    identity.close();
    result
}

async fn fetch_as(
    ctx: &OperationContext,
    identity: &VerifiedIdentity,
    peer: Arc<dyn IdentityMatcher>,
    target: &SecretsTarget,
) -> Result<Vec<u8>, SentinelError> {
    let correlation_id = ctx.correlation_id();
    if let Some(reason) = ctx.check() {
        return Err(SentinelError::cancelled(correlation_id, reason));
    }

    let endpoint = SafeEndpoint::new(identity, peer)
        .map_err(|e| SentinelError::transport(correlation_id, e))?;
    let connection = endpoint.connect(ctx, target).await?;

    debug!(%correlation_id, url = %target.url(), "sending request");
    let response = ctx
        .run(stream_io::get(connection, target))
        .await
        .map_err(|reason| SentinelError::cancelled(correlation_id, reason))?
        .map_err(|e| SentinelError::transport(correlation_id, e))?;

    if !response.status.is_success() {
        warn!(
            %correlation_id,
            status = %response.status,
            "Safe answered with a non-success status"
        );
    }
    debug!(
        %correlation_id,
        status = %response.status,
        bytes = response.body.len(),
        "response received"
    );

    Ok(response.body.to_vec())
}
