//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check required values are present
//! - Validate value ranges (port > 0, body limit > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: Settings → Result<(), Vec<ValidationError>>
//! - Runs before settings are turned into a `ProxyConfig`

use thiserror::Error;
use url::Url;

use crate::config::schema::Settings;

/// A single semantic problem with the settings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("upstream url is required")]
    MissingUpstreamUrl,

    #[error("credential selector is required")]
    MissingCredential,

    #[error("listener port must be non-zero")]
    ZeroPort,

    #[error("max_body_size must be non-zero")]
    ZeroBodyLimit,

    #[error("metadata endpoint '{0}' is not a valid URL")]
    InvalidMetadataEndpoint(String),
}

pub fn validate_config(settings: &Settings) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if settings.upstream.url.as_deref().map_or(true, str::is_empty) {
        errors.push(ValidationError::MissingUpstreamUrl);
    }
    if settings.upstream.credential.as_deref().map_or(true, str::is_empty) {
        errors.push(ValidationError::MissingCredential);
    }
    if settings.listener.port == 0 {
        errors.push(ValidationError::ZeroPort);
    }
    if settings.upstream.max_body_size == 0 {
        errors.push(ValidationError::ZeroBodyLimit);
    }
    if Url::parse(&settings.upstream.metadata_endpoint).is_err() {
        errors.push(ValidationError::InvalidMetadataEndpoint(
            settings.upstream.metadata_endpoint.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
