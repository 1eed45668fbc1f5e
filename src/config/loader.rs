//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::auth::CredentialError;
use crate::config::schema::Settings;
use crate::config::validation::{validate_config, ValidationError};

/// Errors raised while building the proxy. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),

    #[error("Missing required setting `{0}`")]
    Missing(&'static str),

    #[error("Could not parse upstream url '{url}': {reason}")]
    InvalidUpstreamUrl { url: String, reason: String },

    #[error("Could not parse metadata endpoint: {0}")]
    InvalidMetadataEndpoint(String),

    #[error("Could not decode base64 service account: {0}")]
    InvalidBase64(#[source] base64::DecodeError),

    #[error("Could not load service account: {0}")]
    InvalidCredential(#[from] CredentialError),

    #[error("Could not build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate settings from a TOML file.
pub fn load_config(path: &Path) -> Result<Settings, ConfigError> {
    let settings = read_config(path)?;

    validate_config(&settings).map_err(ConfigError::Validation)?;

    Ok(settings)
}

/// Read settings from a TOML file without validating them.
///
/// Validation is left to the caller so that CLI/env overrides can fill in
/// required values first.
pub fn read_config(path: &Path) -> Result<Settings, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse settings from TOML text without validating them.
pub fn parse_config(content: &str) -> Result<Settings, ConfigError> {
    Ok(toml::from_str(content)?)
}
