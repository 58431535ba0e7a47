//! Integration tests: `safe get` against a mock Safe over real mTLS.
//!
//! Each test spins up a mock Safe on localhost with an SVID from an
//! in-memory CA, runs the full obtain → fetch pipeline with a scripted
//! identity source, and checks what the Safe saw and how many identity
//! handles were opened and released.
//!
//! Run with `--nocapture` to see the client's log output:
//! ```sh
//! cargo test -p sentinel-client-core --test safe_fetch_test -- --nocapture
//! ```

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{init_tracing, policy, IssuedIdentity, MockResponse, MockSafe, Script, ScriptedSource};
use sentinel_client_core::{
    obtain, CancelReason, ErrorCategory, OperationContext, RequestMode, SafeClient, SafeEndpoint,
    SecretsTarget, SentinelError, TransportError,
};
use sentinel_proto::identity::issuer::TestAuthority;

const TRUST_DOMAIN: &str = "trust.example";
const SENTINEL: &str = "spiffe://trust.example/sentinel";
const SAFE: &str = "spiffe://trust.example/safe";

struct Harness {
    safe: MockSafe,
    source: Arc<ScriptedSource>,
    client: SafeClient,
}

/// Mock Safe serving as `safe_path`, client acquiring `self_path`.
async fn harness(self_path: &str, safe_path: &str, response: MockResponse) -> Harness {
    init_tracing();
    let ca = TestAuthority::new(TRUST_DOMAIN).unwrap();
    let safe = MockSafe::start(&ca.issue_handle(safe_path).unwrap(), SENTINEL, response).await;
    let source = Arc::new(ScriptedSource::succeeding(IssuedIdentity::new(&ca, self_path)));
    let client = SafeClient::new(source.clone(), policy(SENTINEL, SAFE), safe.base_url());
    Harness {
        safe,
        source,
        client,
    }
}

fn assert_balanced(source: &ScriptedSource) {
    assert_eq!(
        source.opened(),
        source.released(),
        "every opened identity handle must be released exactly once"
    );
}

// ---------------------------------------------------------------------------
// Allowed identities on both sides
// ---------------------------------------------------------------------------

#[tokio::test]
async fn allowed_identities_receive_body() {
    let h = harness("/sentinel", "/safe", MockResponse::ok(b"secrets: []")).await;

    let body = h
        .client
        .get_secrets(&OperationContext::generated(), RequestMode::Redacted)
        .await
        .expect("fetch should succeed");

    assert_eq!(body, b"secrets: []");
    assert_eq!(h.safe.requests(), vec!["GET /sentinel/v1/secrets HTTP/1.1"]);
    assert_eq!(h.source.opened(), 1);
    assert_balanced(&h.source);
}

#[tokio::test]
async fn revealed_mode_requests_reveal() {
    let h = harness("/sentinel", "/safe", MockResponse::ok(b"secrets: [x]")).await;

    let body = h
        .client
        .get_secrets(&OperationContext::generated(), RequestMode::Revealed)
        .await
        .unwrap();

    assert_eq!(body, b"secrets: [x]");
    assert_eq!(
        h.safe.requests(),
        vec!["GET /sentinel/v1/secrets?reveal=true HTTP/1.1"]
    );
    assert_balanced(&h.source);
}

#[tokio::test]
async fn non_success_status_still_returns_body() {
    let h = harness(
        "/sentinel",
        "/safe",
        MockResponse::status(404, "Not Found", b"no secrets yet"),
    )
    .await;

    let body = h
        .client
        .get_secrets(&OperationContext::generated(), RequestMode::Redacted)
        .await
        .unwrap();

    assert_eq!(body, b"no secrets yet");
    assert_balanced(&h.source);
}

#[tokio::test]
async fn endpoint_negotiates_http1_with_verified_safe() {
    let h = harness("/sentinel", "/safe", MockResponse::ok(b"secrets: []")).await;
    let ctx = OperationContext::generated();
    let policy = policy(SENTINEL, SAFE);

    let identity = obtain(&ctx, h.source.clone(), &policy).await.unwrap();
    let endpoint = SafeEndpoint::new(&identity, policy.peer_matcher()).unwrap();
    let target = SecretsTarget::new(&h.safe.base_url(), RequestMode::Redacted).unwrap();

    let connection = endpoint.connect(&ctx, &target).await.unwrap();

    assert_eq!(connection.peer_id().to_string(), SAFE);
    assert_eq!(connection.alpn_protocol(), Some(&b"http/1.1"[..]));
    drop(connection);
    identity.close();
    assert_balanced(&h.source);
}

// ---------------------------------------------------------------------------
// Self identity rejected: nothing reaches the network
// ---------------------------------------------------------------------------

#[tokio::test]
async fn intruder_identity_never_contacts_safe() {
    let h = harness("/intruder", "/safe", MockResponse::ok(b"secrets: []")).await;

    let err = h
        .client
        .get_secrets(&OperationContext::generated(), RequestMode::Redacted)
        .await
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::SelfIdentityRejected);
    match &err {
        SentinelError::SelfIdentityRejected { spiffe_id, .. } => {
            assert_eq!(spiffe_id.to_string(), "spiffe://trust.example/intruder");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(h.safe.connections(), 0, "no network call after self rejection");
    assert_eq!(h.source.opened(), 1);
    assert_balanced(&h.source);
}

// ---------------------------------------------------------------------------
// Peer identity rejected: handshake aborts before any request byte
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rogue_safe_is_rejected_during_handshake() {
    let h = harness("/sentinel", "/rogue-safe", MockResponse::ok(b"secrets: []")).await;

    let err = h
        .client
        .get_secrets(&OperationContext::generated(), RequestMode::Redacted)
        .await
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::PeerIdentityRejected);
    match &err {
        SentinelError::PeerIdentityRejected { peer, .. } => {
            assert_eq!(peer.to_string(), "spiffe://trust.example/rogue-safe");
        }
        other => panic!("unexpected error: {other}"),
    }

    // Give the server side a moment to observe the aborted handshake.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.safe.connections(), 1);
    assert_eq!(h.safe.handshakes(), 0);
    assert!(h.safe.requests().is_empty(), "no request bytes may reach the Safe");
    assert_balanced(&h.source);
}

#[tokio::test]
async fn safe_signed_by_unknown_root_is_a_transport_failure() {
    init_tracing();
    let ca = TestAuthority::new(TRUST_DOMAIN).unwrap();
    let impostor_ca = TestAuthority::new(TRUST_DOMAIN).unwrap();
    let safe = MockSafe::start(
        &impostor_ca.issue_handle("/safe").unwrap(),
        SENTINEL,
        MockResponse::ok(b"secrets: []"),
    )
    .await;
    let source = Arc::new(ScriptedSource::succeeding(IssuedIdentity::new(&ca, "/sentinel")));
    let client = SafeClient::new(source.clone(), policy(SENTINEL, SAFE), safe.base_url());

    let err = client
        .get_secrets(&OperationContext::generated(), RequestMode::Redacted)
        .await
        .unwrap_err();

    assert!(
        matches!(
            err,
            SentinelError::TransportFailure {
                source: TransportError::Handshake(_),
                ..
            }
        ),
        "unexpected error: {err}"
    );
    assert!(safe.requests().is_empty());
    assert_balanced(&source);
}

// ---------------------------------------------------------------------------
// Transport failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn closed_port_is_a_transport_failure() {
    init_tracing();
    let ca = TestAuthority::new(TRUST_DOMAIN).unwrap();
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let source = Arc::new(ScriptedSource::succeeding(IssuedIdentity::new(&ca, "/sentinel")));
    let client = SafeClient::new(
        source.clone(),
        policy(SENTINEL, SAFE),
        url::Url::parse(&format!("https://{addr}/")).unwrap(),
    );

    let err = client
        .get_secrets(&OperationContext::generated(), RequestMode::Redacted)
        .await
        .unwrap_err();

    assert!(
        matches!(
            err,
            SentinelError::TransportFailure {
                source: TransportError::Connect { .. },
                ..
            }
        ),
        "unexpected error: {err}"
    );
    assert_balanced(&source);
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    init_tracing();
    let ca = TestAuthority::new(TRUST_DOMAIN).unwrap();
    let safe = MockSafe::start(
        &ca.issue_handle("/safe").unwrap(),
        SENTINEL,
        MockResponse::ok(&[b'x'; 64]),
    )
    .await;
    let source = Arc::new(ScriptedSource::succeeding(IssuedIdentity::new(&ca, "/sentinel")));
    let client = SafeClient::new(source.clone(), policy(SENTINEL, SAFE), safe.base_url())
        .with_max_response_bytes(16);

    let err = client
        .get_secrets(&OperationContext::generated(), RequestMode::Redacted)
        .await
        .unwrap_err();

    assert!(
        matches!(
            err,
            SentinelError::TransportFailure {
                source: TransportError::ResponseTooLarge { limit: 16 },
                ..
            }
        ),
        "unexpected error: {err}"
    );
    assert_balanced(&source);
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancellation_before_identity_skips_fetch() {
    init_tracing();
    let ca = TestAuthority::new(TRUST_DOMAIN).unwrap();
    let safe = MockSafe::start(
        &ca.issue_handle("/safe").unwrap(),
        SENTINEL,
        MockResponse::ok(b"secrets: []"),
    )
    .await;
    let source = Arc::new(ScriptedSource::new(Script::Hang));
    let client = SafeClient::new(source.clone(), policy(SENTINEL, SAFE), safe.base_url());

    let (ctx, cancel) = OperationContext::generated().cancellable();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
    });

    let err = client
        .get_secrets(&ctx, RequestMode::Redacted)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SentinelError::Cancelled {
            reason: CancelReason::Cancelled,
            ..
        }
    ));
    assert_eq!(source.calls(), 1);
    assert_eq!(safe.connections(), 0);
    assert_balanced(&source);
}

#[tokio::test]
async fn deadline_during_fetch_releases_identity() {
    init_tracing();
    let ca = TestAuthority::new(TRUST_DOMAIN).unwrap();
    let safe = MockSafe::start(&ca.issue_handle("/safe").unwrap(), SENTINEL, MockResponse::Stall).await;
    let source = Arc::new(ScriptedSource::succeeding(IssuedIdentity::new(&ca, "/sentinel")));
    let client = SafeClient::new(source.clone(), policy(SENTINEL, SAFE), safe.base_url());

    let ctx = OperationContext::generated().with_timeout(Duration::from_millis(300));
    let err = client
        .get_secrets(&ctx, RequestMode::Redacted)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SentinelError::Cancelled {
            reason: CancelReason::DeadlineExceeded,
            ..
        }
    ));
    assert_eq!(safe.requests().len(), 1);
    assert_eq!(source.opened(), 1);
    assert_balanced(&source);
}

#[tokio::test]
async fn errors_carry_the_correlation_id() {
    let h = harness("/intruder", "/safe", MockResponse::ok(b"secrets: []")).await;
    let ctx = OperationContext::new(sentinel_client_core::CorrelationId::new("req-0042"));

    let err = h
        .client
        .get_secrets(&ctx, RequestMode::Redacted)
        .await
        .unwrap_err();

    assert_eq!(err.correlation_id().as_str(), "req-0042");
    assert!(err.to_string().starts_with("[req-0042] self_identity_rejected: "));
}
