//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → CLI flags / environment overrides (main.rs)
//!     → validation.rs (semantic checks)
//!     → schema.rs: Settings → ProxyConfig (validated, immutable)
//!     → owned by the proxy handler for its lifetime
//! ```
//!
//! # Design Decisions
//! - Config is read once at startup and passed explicitly, never read
//!   from the environment inside the proxy core
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, read_config, ConfigError};
pub use schema::{
    CredentialSource, ListenerConfig, ObservabilityConfig, ProxyConfig, Settings,
    UpstreamConfig, DEFAULT_METADATA_ENDPOINT, METADATA_FLAVOR,
};
pub use validation::{validate_config, ValidationError};
