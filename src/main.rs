//! Authenticating reverse proxy binary.
//!
//! Reads settings once (TOML file, then CLI flags / environment), builds the
//! proxy handler and serves it until SIGTERM or Ctrl+C.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio::net::TcpListener;

use authproxy::config::{read_config, validate_config, ConfigError, ProxyConfig, Settings};
use authproxy::lifecycle::{shutdown_signal, Shutdown};
use authproxy::observability::init_logging;
use authproxy::ProxyServer;

#[derive(Parser, Debug, Default)]
#[command(name = "authproxy", version)]
#[command(about = "Reverse proxy that authenticates upstream requests with identity tokens", long_about = None)]
struct Cli {
    /// Optional TOML settings file
    #[arg(long, env = "AUTHPROXY_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (a leading ':' is accepted)
    #[arg(long, env = "PORT", value_parser = parse_port)]
    port: Option<u16>,

    /// Upstream URL; also the token audience
    #[arg(long, env = "REVERSE_PROXY_URL")]
    upstream_url: Option<String>,

    /// METADATA_FLAVOR or a base64 encoded service account key
    #[arg(long, env = "SERVICE_ACCOUNT_KEY", hide_env_values = true)]
    credential: Option<String>,

    /// Metadata server identity endpoint
    #[arg(long, env = "METADATA_ENDPOINT")]
    metadata_endpoint: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,
}

impl Cli {
    /// Layer flags/environment over the settings file and validate.
    fn settings(self) -> Result<Settings, ConfigError> {
        let mut settings = match &self.config {
            Some(path) => read_config(path)?,
            None => Settings::default(),
        };

        if let Some(port) = self.port {
            settings.listener.port = port;
        }
        if let Some(url) = self.upstream_url {
            settings.upstream.url = Some(url);
        }
        if let Some(credential) = self.credential {
            settings.upstream.credential = Some(credential);
        }
        if let Some(endpoint) = self.metadata_endpoint {
            settings.upstream.metadata_endpoint = endpoint;
        }
        if let Some(level) = self.log_level {
            settings.observability.log_level = level;
        }

        validate_config(&settings).map_err(ConfigError::Validation)?;
        Ok(settings)
    }
}

fn parse_port(raw: &str) -> Result<u16, String> {
    raw.trim_start_matches(':')
        .parse()
        .map_err(|e| format!("invalid port '{raw}': {e}"))
}

#[tokio::main]
async fn main() -> ExitCode {
    let settings = Cli::parse().settings();

    let log_level = settings
        .as_ref()
        .map(|s| s.observability.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());
    init_logging(&log_level);

    match run(settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "authproxy failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(settings: Result<Settings, ConfigError>) -> Result<(), Box<dyn std::error::Error>> {
    let settings = settings?;

    tracing::info!("authproxy v{} starting", env!("CARGO_PKG_VERSION"));

    let config = ProxyConfig::from_settings(&settings.upstream)?;
    let server = ProxyServer::new(config)?;

    let listener = TcpListener::bind(settings.listener.bind_address()).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.trigger();
    });

    server.run(listener, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
