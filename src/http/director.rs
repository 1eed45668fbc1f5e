//! Request rewriting toward the single upstream.
//!
//! # Responsibilities
//! - Point scheme, host and path at the configured target
//! - Merge the target's query string with the inbound one
//! - Pin the User-Agent so no client library default leaks upstream
//! - Prepare the outbound request
//!
//! # Design Decisions
//! - The joined path and merged query are sent byte for byte; dot
//!   segments and percent escapes are never normalised
//! - The body is already buffered, so Content-Length is recomputed

use std::net::SocketAddr;

use axum::body::{Body, Bytes};
use axum::http::{
    header::{CONTENT_LENGTH, HOST, USER_AGENT},
    request::Parts,
    HeaderValue, Request, Uri,
};
use url::Url;

use crate::http::headers::{append_forwarded_for, remove_hop_by_hop};

/// Rewrites inbound requests to target one upstream.
#[derive(Debug, Clone)]
pub struct Director {
    target: Url,
    target_path: String,
    target_query: String,
    authority: String,
}

impl Director {
    pub fn new(target: Url) -> Self {
        let target_path = target.path().to_string();
        let target_query = target.query().unwrap_or_default().to_string();
        let host = target.host_str().unwrap_or_default();
        let authority = match target.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        Self {
            target,
            target_path,
            target_query,
            authority,
        }
    }

    pub fn target(&self) -> &Url {
        &self.target
    }

    /// Upstream URI for an inbound path and query.
    pub fn rewrite_url(&self, path: &str, query: Option<&str>) -> Result<Uri, axum::http::Error> {
        let path = join_paths(&self.target_path, path);
        let query = merge_queries(&self.target_query, query.unwrap_or_default());

        let mut uri = format!("{}://{}{}", self.target.scheme(), self.authority, path);
        if !query.is_empty() {
            uri.push('?');
            uri.push_str(&query);
        }
        Ok(Uri::try_from(uri)?)
    }

    /// Turn an inbound request into the request sent upstream.
    ///
    /// Authorization is left untouched here; the authenticating client
    /// overwrites it just before sending.
    pub fn rewrite(
        &self,
        parts: Parts,
        body: Bytes,
        client_addr: Option<SocketAddr>,
    ) -> Result<Request<Body>, axum::http::Error> {
        let Parts {
            method,
            uri,
            mut headers,
            ..
        } = parts;

        let uri = self.rewrite_url(uri.path(), uri.query())?;

        remove_hop_by_hop(&mut headers);
        if let Some(addr) = client_addr {
            append_forwarded_for(&mut headers, addr.ip());
        }
        if let Ok(host) = HeaderValue::from_str(&self.authority) {
            headers.insert(HOST, host);
        }
        if !headers.contains_key(USER_AGENT) {
            headers.insert(USER_AGENT, HeaderValue::from_static(""));
        }
        headers.remove(CONTENT_LENGTH);

        let mut request = Request::builder().method(method).uri(uri).body(Body::from(body))?;
        *request.headers_mut() = headers;
        Ok(request)
    }
}

/// Join two paths with exactly one slash between them.
pub fn join_paths(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) => format!("{base}/{path}"),
        _ => format!("{base}{path}"),
    }
}

/// Concatenate query strings, target first, with `&` only when both are set.
pub fn merge_queries(target: &str, inbound: &str) -> String {
    if target.is_empty() || inbound.is_empty() {
        format!("{target}{inbound}")
    } else {
        format!("{target}&{inbound}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::http::{header::AUTHORIZATION, Method};

    fn director(target: &str) -> Director {
        Director::new(Url::parse(target).unwrap())
    }

    fn parts(builder: axum::http::request::Builder) -> Parts {
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn join_paths_single_slash() {
        assert_eq!(join_paths("/a/", "/b"), "/a/b");
        assert_eq!(join_paths("/a", "b"), "/a/b");
        assert_eq!(join_paths("/a", "/b"), "/a/b");
        assert_eq!(join_paths("/a/", "b"), "/a/b");
        assert_eq!(join_paths("", "/b"), "/b");
        assert_eq!(join_paths("/", "/"), "/");
    }

    #[test]
    fn merge_queries_cases() {
        assert_eq!(merge_queries("x=1", ""), "x=1");
        assert_eq!(merge_queries("", "y=2"), "y=2");
        assert_eq!(merge_queries("x=1", "y=2"), "x=1&y=2");
        assert_eq!(merge_queries("", ""), "");
    }

    fn rewritten(d: &Director, path: &str, query: Option<&str>) -> String {
        d.rewrite_url(path, query).unwrap().to_string()
    }

    #[test]
    fn rewrite_url_targets_upstream() {
        let d = director("https://example.com/api");
        assert_eq!(
            rewritten(&d, "/foo", Some("bar=1")),
            "https://example.com/api/foo?bar=1"
        );
        assert_eq!(rewritten(&d, "/", None), "https://example.com/api/");

        let d = director("http://127.0.0.1:8080/base/?key=v");
        assert_eq!(
            rewritten(&d, "/x/y", Some("a=b&c")),
            "http://127.0.0.1:8080/base/x/y?key=v&a=b&c"
        );
        assert_eq!(rewritten(&d, "/x", None), "http://127.0.0.1:8080/base/x?key=v");

        let d = director("https://example.com");
        assert_eq!(rewritten(&d, "/foo", None), "https://example.com/foo");
    }

    #[test]
    fn rewrite_url_keeps_path_and_query_verbatim() {
        let d = director("https://example.com/api");

        let uri = d.rewrite_url("/foo/../../admin", None).unwrap();
        assert_eq!(uri.path(), "/api/foo/../../admin");

        let uri = d.rewrite_url("/%2e%2e/secret", None).unwrap();
        assert_eq!(uri.path(), "/api/%2e%2e/secret");

        let uri = d.rewrite_url("/search", Some("q='a'&x=%41")).unwrap();
        assert_eq!(uri.query(), Some("q='a'&x=%41"));
    }

    #[tokio::test]
    async fn rewrite_sets_host_and_empty_user_agent() {
        let d = director("https://example.com:8443/api");
        let parts = parts(
            Request::builder()
                .method(Method::GET)
                .uri("/foo?bar=1")
                .header(HOST, "proxy.local:9090"),
        );

        let request = d
            .rewrite(parts, Bytes::new(), Some("10.1.2.3:5555".parse().unwrap()))
            .unwrap();

        assert_eq!(request.method(), &Method::GET);
        assert_eq!(request.uri(), "https://example.com:8443/api/foo?bar=1");
        assert_eq!(request.headers()[HOST], "example.com:8443");
        assert_eq!(request.headers()[USER_AGENT], "");
        assert_eq!(request.headers()["x-forwarded-for"], "10.1.2.3");
        let body = to_bytes(request.into_body(), usize::MAX).await.unwrap();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn rewrite_keeps_explicit_user_agent_and_caller_headers() {
        let d = director("https://example.com");
        let parts = parts(
            Request::builder()
                .method(Method::POST)
                .uri("/submit")
                .header(USER_AGENT, "curl/8.0")
                .header(AUTHORIZATION, "Bearer caller")
                .header(CONTENT_LENGTH, "5")
                .header("connection", "close"),
        );

        let request = d.rewrite(parts, Bytes::from_static(b"hello"), None).unwrap();

        assert_eq!(request.headers()[USER_AGENT], "curl/8.0");
        assert!(request.headers().get("connection").is_none());
        assert!(request.headers().get(CONTENT_LENGTH).is_none());
        assert!(request.headers().get("x-forwarded-for").is_none());
        let body = to_bytes(request.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"hello");
    }
}
