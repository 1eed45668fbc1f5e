//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use authproxy::auth::{AuthenticatedClient, TokenError, TokenSource};
use authproxy::{ProxyConfig, ProxyServer, Shutdown};
use axum::{
    body::Bytes,
    http::{request::Parts, HeaderMap, StatusCode},
    response::IntoResponse,
    Router,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// What the mock upstream saw for one request.
#[derive(Debug, Clone)]
pub struct Captured {
    pub method: String,
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Captured {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

pub type Recorded = Arc<Mutex<Vec<Captured>>>;

/// Start an upstream that records every request and answers 200 with
/// `upstream:<path>` and an `x-upstream` header. `/redirect` answers 302.
pub async fn start_upstream() -> (SocketAddr, Recorded) {
    let recorded: Recorded = Arc::new(Mutex::new(Vec::new()));
    let seen = recorded.clone();

    let app = Router::new().fallback(move |parts: Parts, body: Bytes| {
        let seen = seen.clone();
        async move {
            let path_and_query = parts
                .uri
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_default();
            seen.lock().unwrap().push(Captured {
                method: parts.method.to_string(),
                path_and_query: path_and_query.clone(),
                headers: parts.headers.clone(),
                body,
            });

            if parts.uri.path().ends_with("/redirect") {
                return (StatusCode::FOUND, [("location", "/elsewhere")], String::new())
                    .into_response();
            }
            (
                StatusCode::OK,
                [("x-upstream", "yes")],
                format!("upstream:{}", parts.uri.path()),
            )
                .into_response()
        }
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, recorded)
}

/// A raw metadata request as seen by the mock metadata server.
#[derive(Debug, Clone)]
pub struct MetadataCall {
    pub request_line: String,
    pub flavor: Option<String>,
}

/// Start a metadata server speaking raw HTTP/1.1.
///
/// Call number `fail_on` (1-based) has its connection dropped without a
/// response; every other call gets `meta-token-<n>` followed by a newline.
pub async fn start_metadata_server(
    fail_on: Option<usize>,
) -> (SocketAddr, Arc<Mutex<Vec<MetadataCall>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let counter = Arc::new(AtomicUsize::new(0));

    let seen = calls.clone();
    tokio::spawn(async move {
        loop {
            let (mut socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let seen = seen.clone();
            let counter = counter.clone();
            tokio::spawn(async move {
                let head = read_head(&mut socket).await;
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;

                let mut lines = head.lines();
                let request_line = lines.next().unwrap_or_default().to_string();
                let flavor = lines.find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("metadata-flavor")
                        .then(|| value.trim().to_string())
                });
                seen.lock().unwrap().push(MetadataCall {
                    request_line,
                    flavor,
                });

                if Some(n) == fail_on {
                    return;
                }

                let body = format!("meta-token-{n}\n");
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/text\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (addr, calls)
}

/// Read until the end of the request head.
async fn read_head(socket: &mut tokio::net::TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Metadata endpoint URL on a mock server.
pub fn metadata_endpoint(addr: SocketAddr) -> url::Url {
    url::Url::parse(&format!(
        "http://{addr}/computeMetadata/v1/instance/service-accounts/default/identity"
    ))
    .unwrap()
}

/// Token source that always returns the same token.
pub struct StaticToken(pub &'static str);

#[async_trait::async_trait]
impl TokenSource for StaticToken {
    async fn token(&self) -> Result<String, TokenError> {
        Ok(self.0.to_string())
    }

    fn kind(&self) -> &'static str {
        "static"
    }
}

/// Running proxy; dropping the handle does not stop it, `stop` does.
pub struct ProxyHandle {
    pub addr: SocketAddr,
    shutdown: Shutdown,
}

impl ProxyHandle {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn stop(&self) {
        self.shutdown.trigger();
    }
}

async fn serve(server: ProxyServer) -> ProxyHandle {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let rx = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, rx).await;
    });
    ProxyHandle { addr, shutdown }
}

/// Start a proxy whose credentials come from `config`.
pub async fn start_proxy(config: ProxyConfig) -> ProxyHandle {
    serve(ProxyServer::new(config).unwrap()).await
}

/// Start a proxy to `upstream` that attaches `Bearer <token>`.
pub async fn start_proxy_with_token(upstream: &str, token: &'static str) -> ProxyHandle {
    let config = ProxyConfig::new(upstream, "METADATA_FLAVOR").unwrap();
    let client = AuthenticatedClient::with_source(Arc::new(StaticToken(token)), upstream);
    serve(ProxyServer::with_client(config, client)).await
}

/// Client for driving the proxy; never uses an environment proxy.
pub fn test_client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

/// Parse a query string into a map.
pub fn query_map(query: &str) -> HashMap<String, String> {
    url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}
