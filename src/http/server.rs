//! HTTP server setup and the proxy handler.
//!
//! # Responsibilities
//! - Build the proxy handler from a `ProxyConfig`
//! - Wire up middleware (tracing, body limit, request ID)
//! - Rewrite each request, authenticate it and relay the response
//! - Serve on a listener until shutdown

use axum::{
    body::Bytes,
    extract::{ConnectInfo, DefaultBodyLimit, State},
    http::request::Parts,
    response::{IntoResponse, Response},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::auth::{AuthenticatedClient, ProxyError};
use crate::config::{ConfigError, ProxyConfig};
use crate::http::director::Director;
use crate::http::response::relay;

pub const X_REQUEST_ID: &str = "x-request-id";

/// Application state injected into the handler.
#[derive(Clone)]
pub struct AppState {
    pub director: Arc<Director>,
    pub client: AuthenticatedClient,
}

/// Build a ready-to-serve handler for `upstream_url`.
///
/// `credential_selector` is either `METADATA_FLAVOR` or a base64 encoded
/// service account key.
pub fn build_proxy_handler(
    upstream_url: &str,
    credential_selector: &str,
) -> Result<Router, ConfigError> {
    let config = ProxyConfig::new(upstream_url, credential_selector)?;
    proxy_router(&config)
}

/// Build the handler for a parsed configuration.
pub fn proxy_router(config: &ProxyConfig) -> Result<Router, ConfigError> {
    let client = AuthenticatedClient::from_config(config)?;
    Ok(router_with_client(config, client))
}

/// Build the handler around an already constructed client.
pub fn router_with_client(config: &ProxyConfig, client: AuthenticatedClient) -> Router {
    let state = AppState {
        director: Arc::new(Director::new(config.target_url.clone())),
        client,
    };

    Router::new()
        .fallback(proxy_handler)
        .with_state(state)
        .layer(DefaultBodyLimit::max(config.max_body_size))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}

/// HTTP server for the auth proxy.
pub struct ProxyServer {
    router: Router,
    config: ProxyConfig,
}

impl ProxyServer {
    /// Create a server for the given configuration.
    pub fn new(config: ProxyConfig) -> Result<Self, ConfigError> {
        let router = proxy_router(&config)?;
        Ok(Self { router, config })
    }

    /// Create a server with an explicit authenticating client.
    pub fn with_client(config: ProxyConfig, client: AuthenticatedClient) -> Self {
        let router = router_with_client(&config, client);
        Self { router, config }
    }

    /// Run the server, accepting connections until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            upstream = %self.config.target_url,
            "HTTP server starting"
        );

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }
}

/// Main proxy handler: rewrite, authenticate, forward, relay.
async fn proxy_handler(State(state): State<AppState>, parts: Parts, body: Bytes) -> Response {
    let request_id = parts
        .headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();
    let client_addr = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let method = parts.method.clone();

    let outbound = match state.director.rewrite(parts, body, client_addr) {
        Ok(outbound) => outbound,
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Could not rewrite request");
            return ProxyError::from(e).into_response();
        }
    };

    tracing::debug!(
        request_id = %request_id,
        method = %method,
        upstream = %outbound.uri(),
        "Proxying request"
    );

    match state.client.round_trip(outbound).await {
        Ok(upstream) => {
            tracing::debug!(
                request_id = %request_id,
                status = %upstream.status(),
                "Upstream responded"
            );
            relay(upstream)
        }
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Proxy round trip failed");
            e.into_response()
        }
    }
}
