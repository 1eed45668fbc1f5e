//! Authenticating reverse proxy.
//!
//! Forwards every request to a single upstream and injects an
//! `Authorization: Bearer <identity token>` header, minted either from a
//! service account key or from the instance metadata server.
//!
//! ```text
//! client ─▶ http::server ─▶ http::director ─▶ auth::AuthenticatedClient ─▶ upstream
//!                                                   │
//!                                                   └─▶ TokenSource (service account | metadata)
//! ```

pub mod auth;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;

pub use auth::{AuthenticatedClient, ProxyError, TokenError, TokenSource};
pub use config::{ConfigError, CredentialSource, ProxyConfig, Settings, METADATA_FLAVOR};
pub use http::{build_proxy_handler, ProxyServer};
pub use lifecycle::Shutdown;
