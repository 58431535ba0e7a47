//! Shared fixtures: a scripted identity source that counts handle
//! open/release, and a mock Safe speaking HTTP/1.1 over SPIFFE mTLS.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sentinel_client_core::{AcquisitionError, IdentitySource, OperationContext};
use sentinel_proto::identity::issuer::TestAuthority;
use sentinel_proto::identity::{BundleSet, IdentityHandle, TrustBundle, TrustDomain, X509Svid};
use sentinel_proto::policy::{AllowList, IdentityPolicy};
use sentinel_proto::tls::config::build_server_tls_config;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use url::Url;

/// Init tracing subscriber (idempotent across tests via try_init).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_test_writer()
        .try_init();
}

pub fn policy(self_rules: &str, peer_rules: &str) -> IdentityPolicy {
    IdentityPolicy::new(
        AllowList::parse(self_rules).unwrap(),
        AllowList::parse(peer_rules).unwrap(),
    )
}

// ---------------------------------------------------------------------------
// Identity source double
// ---------------------------------------------------------------------------

/// DER material for one SVID plus its trust bundle. Each call to
/// [`IssuedIdentity::handle`] builds an independent handle from it.
#[derive(Clone)]
pub struct IssuedIdentity {
    chain: Vec<u8>,
    key: Vec<u8>,
    trust_domain: TrustDomain,
    root: Vec<u8>,
}

impl IssuedIdentity {
    pub fn new(ca: &TestAuthority, path: &str) -> Self {
        let issued = ca.issue(path).unwrap();
        Self {
            chain: issued.leaf().to_vec(),
            key: issued.key_der().to_vec(),
            trust_domain: ca.trust_domain().clone(),
            root: ca.root_der().to_vec(),
        }
    }

    pub fn handle(&self) -> IdentityHandle {
        let svid = X509Svid::parse(&self.chain, &self.key).unwrap();
        let bundle = TrustBundle::parse(self.trust_domain.clone(), &self.root).unwrap();
        IdentityHandle::new(svid, BundleSet::from(bundle))
    }
}

pub enum Script {
    Succeed(IssuedIdentity),
    Fail,
    Hang,
}

/// Identity source that follows a script and counts every handle it opens
/// and every release of those handles.
pub struct ScriptedSource {
    script: Script,
    delay: Duration,
    calls: AtomicUsize,
    opened: AtomicUsize,
    released: Arc<AtomicUsize>,
    abandoned: Arc<AtomicUsize>,
}

/// Counts an `acquire` call whose future was dropped before it returned.
struct AbandonGuard(Option<Arc<AtomicUsize>>);

impl AbandonGuard {
    fn finish(mut self) {
        self.0 = None;
    }
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if let Some(counter) = self.0.take() {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl ScriptedSource {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            opened: AtomicUsize::new(0),
            released: Arc::new(AtomicUsize::new(0)),
            abandoned: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn succeeding(identity: IssuedIdentity) -> Self {
        Self::new(Script::Succeed(identity))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// `acquire` calls dropped mid-flight.
    pub fn abandoned(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentitySource for ScriptedSource {
    async fn acquire(&self, _ctx: &OperationContext) -> Result<IdentityHandle, AcquisitionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let guard = AbandonGuard(Some(self.abandoned.clone()));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let result = match &self.script {
            Script::Succeed(identity) => {
                self.opened.fetch_add(1, Ordering::SeqCst);
                let released = self.released.clone();
                Ok(identity.handle().on_release(move || {
                    released.fetch_add(1, Ordering::SeqCst);
                }))
            }
            Script::Fail => Err(AcquisitionError::Unreachable("scripted failure".into())),
            Script::Hang => std::future::pending().await,
        };
        guard.finish();
        result
    }
}

// ---------------------------------------------------------------------------
// Mock Safe
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub enum MockResponse {
    Reply {
        status: u16,
        reason: &'static str,
        body: Vec<u8>,
    },
    /// Complete the handshake, read the request, never answer.
    Stall,
}

impl MockResponse {
    pub fn ok(body: &[u8]) -> Self {
        Self::Reply {
            status: 200,
            reason: "OK",
            body: body.to_vec(),
        }
    }

    pub fn status(status: u16, reason: &'static str, body: &[u8]) -> Self {
        Self::Reply {
            status,
            reason,
            body: body.to_vec(),
        }
    }
}

/// A Safe stand-in on 127.0.0.1 that records what reaches it.
pub struct MockSafe {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    handshakes: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl MockSafe {
    /// Serve as `server`, accepting clients allowed by `client_rules`.
    pub async fn start(server: &IdentityHandle, client_rules: &str, response: MockResponse) -> Self {
        let config = build_server_tls_config(
            server.svid(),
            server.bundles(),
            Arc::new(AllowList::parse(client_rules).unwrap()),
        )
        .unwrap();
        let acceptor = TlsAcceptor::from(Arc::new(config));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let connections = Arc::new(AtomicUsize::new(0));
        let handshakes = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let task = {
            let connections = connections.clone();
            let handshakes = handshakes.clone();
            let requests = requests.clone();
            tokio::spawn(async move {
                while let Ok((tcp, _)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::SeqCst);
                    let acceptor = acceptor.clone();
                    let handshakes = handshakes.clone();
                    let requests = requests.clone();
                    let response = response.clone();

                    tokio::spawn(async move {
                        let Ok(mut tls) = acceptor.accept(tcp).await else {
                            return;
                        };
                        handshakes.fetch_add(1, Ordering::SeqCst);

                        let mut head = Vec::new();
                        let mut buf = [0u8; 1024];
                        loop {
                            match tls.read(&mut buf).await {
                                Ok(0) | Err(_) => break,
                                Ok(n) => {
                                    head.extend_from_slice(&buf[..n]);
                                    if head.windows(4).any(|w| w == b"\r\n\r\n") {
                                        break;
                                    }
                                }
                            }
                        }
                        if head.is_empty() {
                            return;
                        }
                        let text = String::from_utf8_lossy(&head);
                        let request_line = text.lines().next().unwrap_or_default().to_string();
                        requests.lock().unwrap().push(request_line);

                        match response {
                            MockResponse::Reply {
                                status,
                                reason,
                                body,
                            } => {
                                let head = format!(
                                    "HTTP/1.1 {status} {reason}\r\n\
                                     Content-Type: text/plain\r\n\
                                     Content-Length: {}\r\n\
                                     Connection: close\r\n\r\n",
                                    body.len()
                                );
                                let _ = tls.write_all(head.as_bytes()).await;
                                let _ = tls.write_all(&body).await;
                                let _ = tls.shutdown().await;
                            }
                            MockResponse::Stall => {
                                std::future::pending::<()>().await;
                            }
                        }
                    });
                }
            })
        };

        Self {
            addr,
            connections,
            handshakes,
            requests,
            task,
        }
    }

    pub fn base_url(&self) -> Url {
        Url::parse(&format!("https://{}/", self.addr)).unwrap()
    }

    /// TCP connections accepted.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// TLS handshakes completed on the server side.
    pub fn handshakes(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }

    /// Request lines received.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for MockSafe {
    fn drop(&mut self) {
        self.task.abort();
    }
}
