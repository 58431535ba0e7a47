//! One HTTP/1.1 exchange over a verified connection.
//!
//! Sends a single bodiless `GET` and buffers the response body up to the
//! target's size limit. The connection is driven on the calling task and
//! dropped when the exchange ends, whichever way it ends.

use bytes::Bytes;
use http::header::{HeaderValue, ACCEPT, HOST, USER_AGENT};
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Empty, LengthLimitError, Limited};
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;

use crate::connection::SafeConnection;
use crate::error::TransportError;
use crate::fetch::SecretsTarget;

const CLIENT_USER_AGENT: &str = concat!("sentinel-safe/", env!("CARGO_PKG_VERSION"));

/// A fully buffered response.
#[derive(Debug)]
pub struct SafeResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

/// Send `GET target` on `connection` and read the whole response.
pub async fn get(
    connection: SafeConnection,
    target: &SecretsTarget,
) -> Result<SafeResponse, TransportError> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(target.path_and_query())
        .header(HOST, target.authority())
        .header(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT))
        .header(ACCEPT, HeaderValue::from_static("*/*"))
        .body(Empty::<Bytes>::new())
        .map_err(|e| TransportError::InvalidTarget(e.to_string()))?;

    let io = TokioIo::new(connection.into_inner());
    let (mut sender, conn) = http1::handshake(io).await?;
    tokio::pin!(conn);

    let limit = target.max_response_bytes();
    let exchange = async move {
        let response = sender.send_request(request).await?;
        let (parts, body) = response.into_parts();
        let body = Limited::new(body, limit)
            .collect()
            .await
            .map_err(|e| {
                if e.downcast_ref::<LengthLimitError>().is_some() {
                    TransportError::ResponseTooLarge { limit }
                } else {
                    TransportError::Body(e.to_string())
                }
            })?
            .to_bytes();
        Ok::<_, TransportError>(SafeResponse {
            status: parts.status,
            body,
        })
    };
    tokio::pin!(exchange);

    tokio::select! {
        biased;
        result = &mut exchange => result,
        closed = &mut conn => {
            // The connection can finish (e.g. `Connection: close`) while the
            // last body bytes are still queued for the exchange.
            closed?;
            exchange.await
        }
    }
}
