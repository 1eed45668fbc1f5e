//! Authenticating transport.
//!
//! # Data Flow
//! ```text
//! rewritten request (from http::director)
//!     → AuthenticatedClient::authorize (TokenSource → Authorization header)
//!     → hyper-util round trip to the upstream
//! ```
//!
//! # Token sources
//! - service_account.rs: signed JWT exchanged for an identity token, cached
//!   until shortly before it expires
//! - metadata.rs: instance metadata server, one call per proxied request
//!
//! The source is chosen once, when the client is built, from the
//! configured `CredentialSource`.

pub mod metadata;
pub mod service_account;

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header::AUTHORIZATION, HeaderMap, HeaderValue, Request, Response};
use hyper::body::Incoming;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use reqwest::redirect::Policy;
use thiserror::Error;

use crate::config::{ConfigError, CredentialSource, ProxyConfig};

pub use metadata::MetadataTokenSource;
pub use service_account::{ServiceAccountKey, ServiceAccountTokenSource};

/// Produces bearer tokens for a fixed audience.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Return a token that is currently valid for the audience.
    async fn token(&self) -> Result<String, TokenError>;

    /// Short name used in logs.
    fn kind(&self) -> &'static str;
}

/// Failure to obtain a token for a single request.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("could not request creds: {0}")]
    MetadataRequest(#[source] reqwest::Error),

    #[error("could not read creds: {0}")]
    MetadataRead(#[source] reqwest::Error),

    #[error("could not sign token assertion: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),

    #[error("could not reach token endpoint: {0}")]
    Request(#[source] reqwest::Error),

    #[error("cannot fetch token: {status}\nResponse: {body}")]
    Exchange { status: u16, body: String },

    #[error("could not decode token response: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("token response doesn't have an id_token")]
    MissingIdToken,

    #[error("malformed id_token: {0}")]
    MalformedIdToken(String),

    #[error("token is not a valid header value")]
    InvalidToken,
}

/// Problems with the service account key document.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("could not get jwt of service account: {0}")]
    Json(#[from] serde_json::Error),

    #[error("'type' field is {0:?} (expected \"service_account\")")]
    WrongType(String),

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("invalid private key: {0}")]
    PrivateKey(#[source] jsonwebtoken::errors::Error),
}

/// A proxied round trip that did not produce an upstream response.
///
/// Scoped to the one request; rendered as a gateway error by the handler.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("token acquisition failed: {0}")]
    Token(#[from] TokenError),

    #[error("upstream request failed: {0}")]
    Upstream(#[source] hyper_util::client::legacy::Error),

    #[error("rewritten request is invalid: {0}")]
    Rewrite(#[from] axum::http::Error),
}

/// Client used for the proxied round trip. Sends the request URI as built.
pub type UpstreamClient = Client<HttpsConnector<HttpConnector>, Body>;

/// HTTP client that attaches a bearer token to every request it sends.
#[derive(Clone)]
pub struct AuthenticatedClient {
    source: Arc<dyn TokenSource>,
    audience: String,
    upstream: UpstreamClient,
}

impl AuthenticatedClient {
    /// Select the token source for `config` and build the client.
    pub fn from_config(config: &ProxyConfig) -> Result<Self, ConfigError> {
        let http = outbound_client().map_err(ConfigError::HttpClient)?;

        let source: Arc<dyn TokenSource> = match &config.credential_source {
            CredentialSource::Metadata => Arc::new(MetadataTokenSource::new(
                config.audience.clone(),
                config.metadata_endpoint.clone(),
                http,
            )),
            CredentialSource::ServiceAccount(document) => {
                let key = ServiceAccountKey::from_json(document)?;
                Arc::new(ServiceAccountTokenSource::new(
                    key,
                    config.audience.clone(),
                    http,
                ))
            }
        };

        tracing::info!(
            credential_source = source.kind(),
            audience = %config.audience,
            "Authenticating transport ready"
        );

        Ok(Self::with_source(source, config.audience.clone()))
    }

    /// Build a client around an explicit token source.
    pub fn with_source(source: Arc<dyn TokenSource>, audience: impl Into<String>) -> Self {
        Self {
            source,
            audience: audience.into(),
            upstream: upstream_client(),
        }
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }

    pub fn source_kind(&self) -> &'static str {
        self.source.kind()
    }

    /// Replace any Authorization header with a fresh bearer token.
    pub async fn authorize(&self, headers: &mut HeaderMap) -> Result<(), TokenError> {
        let token = self.source.token().await?;
        let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| TokenError::InvalidToken)?;
        value.set_sensitive(true);
        // `insert` drops every previous value for the header.
        headers.insert(AUTHORIZATION, value);
        Ok(())
    }

    /// Authorize `request` and send it.
    pub async fn round_trip(
        &self,
        mut request: Request<Body>,
    ) -> Result<Response<Incoming>, ProxyError> {
        self.authorize(request.headers_mut()).await?;
        self.upstream
            .request(request)
            .await
            .map_err(ProxyError::Upstream)
    }
}

/// Client for the upstream. Plain http and https are both accepted; the
/// path and query go out exactly as the director built them.
pub fn upstream_client() -> UpstreamClient {
    let https = HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .build();

    Client::builder(TokioExecutor::new()).build(https)
}

/// Client for token acquisition calls (metadata server, token endpoint).
///
/// Redirects are not followed and environment proxies are ignored: the
/// metadata server must be reached directly.
pub fn outbound_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .redirect(Policy::none())
        .no_proxy()
        .build()
}
