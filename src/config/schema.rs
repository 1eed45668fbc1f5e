//! Configuration schema definitions.
//!
//! `Settings` is the raw, file/CLI-facing shape. `ProxyConfig` is the parsed,
//! immutable input handed to the proxy handler.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::loader::ConfigError;

/// Credential selector value that switches to the instance metadata server.
pub const METADATA_FLAVOR: &str = "METADATA_FLAVOR";

/// Identity endpoint of the instance metadata server.
pub const DEFAULT_METADATA_ENDPOINT: &str =
    "http://metadata/computeMetadata/v1/instance/service-accounts/default/identity";

/// Root settings for the auth proxy process.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Settings {
    /// Listener configuration (port, bind host).
    pub listener: ListenerConfig,

    /// Upstream target and credentials.
    pub upstream: UpstreamConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// TCP port to listen on.
    pub port: u16,

    /// Interface to bind (e.g., "0.0.0.0").
    pub bind_host: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            port: 9090,
            bind_host: "0.0.0.0".to_string(),
        }
    }
}

impl ListenerConfig {
    /// Socket address string suitable for `TcpListener::bind`.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }
}

/// Upstream target configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// URL every request is proxied to. Also used as the token audience.
    pub url: Option<String>,

    /// Either `METADATA_FLAVOR` or a base64 encoded service account key.
    pub credential: Option<String>,

    /// Metadata server identity endpoint.
    pub metadata_endpoint: String,

    /// Maximum inbound request body size in bytes.
    pub max_body_size: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: None,
            credential: None,
            metadata_endpoint: DEFAULT_METADATA_ENDPOINT.to_string(),
            max_body_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Where bearer tokens come from.
#[derive(Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// Decoded service account key document (JSON).
    ServiceAccount(Vec<u8>),
    /// Ambient instance metadata server.
    Metadata,
}

impl std::fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialSource::ServiceAccount(_) => f.write_str("ServiceAccount(redacted)"),
            CredentialSource::Metadata => f.write_str("Metadata"),
        }
    }
}

impl CredentialSource {
    /// Interpret a credential selector.
    pub fn from_selector(selector: &str) -> Result<Self, ConfigError> {
        if selector == METADATA_FLAVOR {
            return Ok(CredentialSource::Metadata);
        }
        // Line breaks are skipped, so wrapped `base64` output is accepted.
        let unwrapped: String = selector
            .chars()
            .filter(|c| !matches!(c, '\r' | '\n'))
            .collect();
        let key = STANDARD
            .decode(unwrapped)
            .map_err(ConfigError::InvalidBase64)?;
        Ok(CredentialSource::ServiceAccount(key))
    }
}

/// Parsed, immutable proxy configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Upstream target.
    pub target_url: Url,

    /// Upstream URL exactly as supplied; the token audience.
    pub audience: String,

    /// Selected credential source.
    pub credential_source: CredentialSource,

    /// Metadata server identity endpoint.
    pub metadata_endpoint: Url,

    /// Maximum inbound request body size in bytes.
    pub max_body_size: usize,
}

impl ProxyConfig {
    /// Parse an upstream URL and a credential selector.
    pub fn new(upstream_url: &str, credential_selector: &str) -> Result<Self, ConfigError> {
        let target_url = parse_upstream_url(upstream_url)?;
        let credential_source = CredentialSource::from_selector(credential_selector)?;
        let defaults = UpstreamConfig::default();
        let metadata_endpoint = Url::parse(&defaults.metadata_endpoint)
            .map_err(|e| ConfigError::InvalidMetadataEndpoint(e.to_string()))?;

        Ok(Self {
            target_url,
            audience: upstream_url.to_string(),
            credential_source,
            metadata_endpoint,
            max_body_size: defaults.max_body_size,
        })
    }

    /// Build from validated settings.
    pub fn from_settings(settings: &UpstreamConfig) -> Result<Self, ConfigError> {
        let url = settings
            .url
            .as_deref()
            .ok_or(ConfigError::Missing("upstream.url"))?;
        let credential = settings
            .credential
            .as_deref()
            .ok_or(ConfigError::Missing("upstream.credential"))?;
        let endpoint = Url::parse(&settings.metadata_endpoint)
            .map_err(|e| ConfigError::InvalidMetadataEndpoint(e.to_string()))?;

        Ok(Self::new(url, credential)?
            .with_metadata_endpoint(endpoint)
            .with_max_body_size(settings.max_body_size))
    }

    pub fn with_metadata_endpoint(mut self, endpoint: Url) -> Self {
        self.metadata_endpoint = endpoint;
        self
    }

    pub fn with_max_body_size(mut self, max_body_size: usize) -> Self {
        self.max_body_size = max_body_size;
        self
    }
}

fn parse_upstream_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidUpstreamUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    // Only absolute http(s) URLs can be proxied to.
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(ConfigError::InvalidUpstreamUrl {
            url: raw.to_string(),
            reason: "expected an http or https URL with a host".to_string(),
        });
    }
    Ok(url)
}
