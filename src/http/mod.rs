//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, body limit)
//!     → director.rs (rewrite toward the upstream, header hygiene)
//!     → auth::AuthenticatedClient (bearer token, round trip)
//!     → response.rs (relay upstream response / map failures)
//!     → Send to client
//! ```

pub mod director;
pub mod headers;
pub mod response;
pub mod server;

pub use director::{join_paths, merge_queries, Director};
pub use server::{
    build_proxy_handler, proxy_router, router_with_client, AppState, ProxyServer, X_REQUEST_ID,
};
