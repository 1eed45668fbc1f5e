//! Identity tokens from the instance metadata server.
//!
//! Every call performs a fresh `GET <endpoint>?audience=<audience>` with
//! `Metadata-Flavor: Google`. The trimmed response body is the token; the
//! status code is not inspected.

use async_trait::async_trait;
use url::Url;

use super::{TokenError, TokenSource};

const METADATA_FLAVOR_HEADER: &str = "Metadata-Flavor";
const METADATA_FLAVOR_VALUE: &str = "Google";

/// Token source backed by the metadata server. Holds no per-request state.
#[derive(Debug, Clone)]
pub struct MetadataTokenSource {
    audience: String,
    endpoint: Url,
    http: reqwest::Client,
}

impl MetadataTokenSource {
    pub fn new(audience: String, endpoint: Url, http: reqwest::Client) -> Self {
        Self {
            audience,
            endpoint,
            http,
        }
    }

    /// Endpoint URL with `audience` set, replacing any existing value.
    fn identity_url(&self) -> Url {
        let mut url = self.endpoint.clone();
        let retained: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| key != "audience")
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();

        url.query_pairs_mut()
            .clear()
            .extend_pairs(retained)
            .append_pair("audience", &self.audience);
        url
    }
}

#[async_trait]
impl TokenSource for MetadataTokenSource {
    async fn token(&self) -> Result<String, TokenError> {
        let url = self.identity_url();
        tracing::trace!(url = %url, "Requesting identity token from metadata server");

        let response = self
            .http
            .get(url)
            .header(METADATA_FLAVOR_HEADER, METADATA_FLAVOR_VALUE)
            .send()
            .await
            .map_err(TokenError::MetadataRequest)?;

        let body = response.bytes().await.map_err(TokenError::MetadataRead)?;

        Ok(String::from_utf8_lossy(&body).trim().to_string())
    }

    fn kind(&self) -> &'static str {
        "metadata"
    }
}
