//! SPIFFE Workload API client.
//!
//! Opens a gRPC channel to the local SPIRE agent (Unix socket or TCP),
//! calls `FetchX509SVID` and turns the first streamed response into an
//! [`IdentityHandle`]. The stream stays open until the handle is released.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use async_trait::async_trait;
use http::uri::PathAndQuery;
use sentinel_proto::identity::{
    BundleSet, IdentityHandle, SpiffeId, TrustBundle, TrustDomain, X509Svid,
};
use sentinel_proto::ProtoError;
use tonic::client::Grpc;
use tonic::codec::ProstCodec;
use tonic::metadata::MetadataValue;
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Status};
use tracing::{debug, info};
use url::Url;

use super::proto::{X509SvidRequest, X509SvidResponse, FETCH_X509_SVID_PATH, SECURITY_HEADER};
use super::IdentitySource;
use crate::context::OperationContext;
use crate::error::AcquisitionError;

/// Where the Workload API listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkloadApiAddress {
    /// `unix:///path/to/agent.sock`
    Unix(PathBuf),
    /// `tcp://ip:port`
    Tcp(SocketAddr),
}

impl WorkloadApiAddress {
    pub fn parse(input: &str) -> Result<Self, AcquisitionError> {
        let bad = |reason: &str| {
            AcquisitionError::Unreachable(format!("invalid Workload API address {input:?}: {reason}"))
        };
        let url = Url::parse(input).map_err(|e| bad(&e.to_string()))?;

        match url.scheme() {
            "unix" => {
                if url.host_str().is_some_and(|h| !h.is_empty()) {
                    return Err(bad("unix address must not have an authority"));
                }
                match url.path() {
                    "" | "/" => Err(bad("missing socket path")),
                    path => Ok(Self::Unix(PathBuf::from(path))),
                }
            }
            "tcp" => {
                let host = url
                    .host_str()
                    .map(|h| h.trim_start_matches('[').trim_end_matches(']'))
                    .ok_or_else(|| bad("missing host"))?;
                let ip: IpAddr = host.parse().map_err(|_| bad("host must be an IP address"))?;
                let port = url.port().ok_or_else(|| bad("missing port"))?;
                if !matches!(url.path(), "" | "/") {
                    return Err(bad("tcp address must not have a path"));
                }
                Ok(Self::Tcp(SocketAddr::new(ip, port)))
            }
            other => Err(bad(&format!("unsupported scheme {other}"))),
        }
    }
}

impl fmt::Display for WorkloadApiAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
            Self::Tcp(addr) => write!(f, "tcp://{addr}"),
        }
    }
}

/// [`IdentitySource`] backed by the SPIFFE Workload API.
#[derive(Debug, Clone)]
pub struct WorkloadApiSource {
    address: WorkloadApiAddress,
}

impl WorkloadApiSource {
    pub fn new(address: WorkloadApiAddress) -> Self {
        Self { address }
    }

    pub fn address(&self) -> &WorkloadApiAddress {
        &self.address
    }

    async fn connect(&self) -> Result<Channel, AcquisitionError> {
        let unreachable = |e: tonic::transport::Error| {
            AcquisitionError::Unreachable(format!("{}: {}", self.address, error_chain(&e)))
        };

        match &self.address {
            WorkloadApiAddress::Tcp(addr) => Endpoint::from_shared(format!("http://{addr}"))
                .map_err(unreachable)?
                .connect()
                .await
                .map_err(unreachable),
            #[cfg(unix)]
            WorkloadApiAddress::Unix(path) => {
                use hyper_util::rt::TokioIo;
                use tokio::net::UnixStream;

                let path = path.clone();
                // The URI is ignored; the connector always dials the socket.
                Endpoint::from_static("http://localhost")
                    .connect_with_connector(tower::service_fn(move |_: http::Uri| {
                        let path = path.clone();
                        async move { UnixStream::connect(path).await.map(TokioIo::new) }
                    }))
                    .await
                    .map_err(unreachable)
            }
            #[cfg(not(unix))]
            WorkloadApiAddress::Unix(_) => Err(AcquisitionError::Unreachable(
                "unix sockets are not supported on this platform".into(),
            )),
        }
    }
}

#[async_trait]
impl IdentitySource for WorkloadApiSource {
    async fn acquire(&self, ctx: &OperationContext) -> Result<IdentityHandle, AcquisitionError> {
        let correlation_id = ctx.correlation_id().clone();
        debug!(%correlation_id, address = %self.address, "requesting X.509-SVID");

        let mut grpc = Grpc::new(self.connect().await?);
        grpc.ready().await.map_err(|e| {
            AcquisitionError::Unreachable(format!("{}: {}", self.address, error_chain(&e)))
        })?;

        let mut request = tonic::Request::new(X509SvidRequest {});
        request
            .metadata_mut()
            .insert(SECURITY_HEADER, MetadataValue::from_static("true"));

        let mut stream = grpc
            .server_streaming(
                request,
                PathAndQuery::from_static(FETCH_X509_SVID_PATH),
                ProstCodec::<X509SvidRequest, X509SvidResponse>::default(),
            )
            .await
            .map_err(status_error)?
            .into_inner();

        let response = stream.message().await.map_err(status_error)?.ok_or_else(|| {
            AcquisitionError::Denied("Workload API closed the stream without an SVID".into())
        })?;
        let handle = handle_from_response(response)?;

        info!(
            %correlation_id,
            spiffe_id = %handle.spiffe_id(),
            trust_domains = handle.bundles().len(),
            "X.509-SVID received"
        );

        Ok(handle.on_release(move || {
            drop(stream);
            debug!(%correlation_id, "Workload API stream closed");
        }))
    }
}

/// Build an identity handle from one `FetchX509SVID` response.
///
/// Uses the first (default) SVID and its bundle, plus every federated
/// bundle for other trust domains.
pub fn handle_from_response(response: X509SvidResponse) -> Result<IdentityHandle, AcquisitionError> {
    let X509SvidResponse {
        svids,
        federated_bundles,
        ..
    } = response;

    let default = svids
        .into_iter()
        .next()
        .ok_or_else(|| AcquisitionError::Denied("response contained no SVIDs".into()))?;

    let svid = X509Svid::parse(&default.x509_svid, &default.x509_svid_key)?;
    if !default.spiffe_id.is_empty() && default.spiffe_id != svid.spiffe_id().to_string() {
        return Err(ProtoError::InvalidSvid(format!(
            "response names {} but the certificate carries {}",
            default.spiffe_id,
            svid.spiffe_id()
        ))
        .into());
    }

    let trust_domain = svid.spiffe_id().trust_domain().clone();
    let mut bundles = BundleSet::from(TrustBundle::parse(trust_domain.clone(), &default.bundle)?);

    for (id, der) in federated_bundles {
        let federated = parse_trust_domain(&id)?;
        if federated == trust_domain {
            continue;
        }
        bundles.insert(TrustBundle::parse(federated, &der)?);
    }

    Ok(IdentityHandle::new(svid, bundles))
}

/// Federated bundle keys are trust domain IDs (`spiffe://td`); bare names
/// are accepted too.
fn parse_trust_domain(id: &str) -> Result<TrustDomain, ProtoError> {
    match SpiffeId::parse(id) {
        Ok(parsed) => Ok(parsed.trust_domain().clone()),
        Err(_) => TrustDomain::new(id),
    }
}

fn status_error(status: Status) -> AcquisitionError {
    match status.code() {
        Code::PermissionDenied | Code::Unauthenticated => {
            AcquisitionError::Denied(status.message().to_string())
        }
        Code::Unavailable => AcquisitionError::Unreachable(status.message().to_string()),
        code => AcquisitionError::Rpc(format!("{code:?}: {}", status.message())),
    }
}

/// Render an error with its sources; tonic's top-level messages are terse.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}
