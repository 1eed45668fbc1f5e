//! Response handling and transformation.
//!
//! # Responsibilities
//! - Relay the upstream response (status, headers, streamed body)
//! - Strip hop-by-hop headers
//! - Map failed round trips to gateway errors
//!
//! # Design Decisions
//! - Streaming responses avoid buffering entire body
//! - Failures are never retried; the caller sees 502 Bad Gateway

use axum::{
    body::Body,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use hyper::body::Incoming;

use crate::auth::ProxyError;
use crate::http::headers::remove_hop_by_hop;

/// Convert an upstream response into the response sent to the caller.
pub fn relay(upstream: Response<Incoming>) -> Response {
    let (mut parts, body) = upstream.into_parts();
    remove_hop_by_hop(&mut parts.headers);
    Response::from_parts(parts, Body::new(body))
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let message = match self {
            ProxyError::Token(_) => "Could not obtain upstream credentials",
            ProxyError::Upstream(_) => "Upstream request failed",
            ProxyError::Rewrite(_) => "Could not build upstream request",
        };
        (StatusCode::BAD_GATEWAY, message).into_response()
    }
}
