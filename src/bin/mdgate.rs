//! Server binary for markdown-gateway.
//!
//! Maps flags and environment variables to `GatewayConfig`, installs logging,
//! starts the background sweeper and serves the HTTP API until Ctrl-C.

use anyhow::{Context, Result};
use clap::Parser;
use markdown_gateway::config::{mask_secret, DEFAULT_API_URL};
use markdown_gateway::sweeper::{sweep_task, SweepConfig};
use markdown_gateway::{server, Gateway, GatewayConfig};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Development mode (no service token, placeholder API key)
  mdgate --dev-mode

  # Production, key mounted as a secret file
  MARKER_API_KEY_FILE=/var/secrets/marker-api-key SERVICE_TOKEN=... mdgate --port 8000

  # Convert a file
  curl -H "X-Service-Token: $SERVICE_TOKEN" -F file=@paper.pdf http://localhost:8000/v1/convert

LOGGING:
  RUST_LOG overrides --log-level, e.g. RUST_LOG=markdown_gateway=debug,reqwest=info
"#;

/// Document-to-Markdown gateway in front of the Marker API.
#[derive(Parser, Debug)]
#[command(
    name = "mdgate",
    version,
    about = "Document-to-Markdown gateway in front of the Marker API",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Interface to bind.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on.
    #[arg(short, long, env = "PORT", default_value_t = 8000)]
    port: u16,

    /// Marker API key.
    #[arg(long, env = "MARKER_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// File containing the Marker API key (takes precedence over --api-key).
    #[arg(long, env = "MARKER_API_KEY_FILE")]
    api_key_file: Option<PathBuf>,

    /// Marker API submission URL.
    #[arg(long, env = "MARKER_API_URL", default_value = DEFAULT_API_URL)]
    api_url: String,

    /// Root of managed temporary storage.
    #[arg(long, env = "TEMP_DIR", default_value = "/tmp/markdown-service")]
    temp_dir: PathBuf,

    /// Maximum input size in bytes.
    #[arg(long, env = "MAX_FILE_SIZE", default_value_t = 50 * 1024 * 1024)]
    max_file_size: u64,

    /// Per-call Marker API timeout in seconds.
    #[arg(long, env = "REQUEST_TIMEOUT", default_value_t = 300)]
    request_timeout: u64,

    /// Delay before each status poll, in milliseconds.
    #[arg(long, env = "POLL_INTERVAL_MS", default_value_t = 2000)]
    poll_interval_ms: u64,

    /// Maximum number of status polls per conversion.
    #[arg(long, env = "MAX_POLLS", default_value_t = 300)]
    max_polls: u32,

    /// Total submission attempts on network errors.
    #[arg(long, env = "RETRY_ATTEMPTS", default_value_t = 3)]
    retry_attempts: u32,

    /// Base backoff delay between submission attempts, in milliseconds.
    #[arg(long, env = "RETRY_DELAY_MS", default_value_t = 1000)]
    retry_delay_ms: u64,

    /// Timeout for downloading file_url inputs, in seconds.
    #[arg(long, env = "DOWNLOAD_TIMEOUT", default_value_t = 30)]
    download_timeout: u64,

    /// Shared token expected in the X-Service-Token header.
    #[arg(long, env = "SERVICE_TOKEN", hide_env_values = true, default_value = "")]
    service_token: String,

    /// Skip token checks and allow running without an API key.
    #[arg(long, env = "DEV_MODE")]
    dev_mode: bool,

    /// Hours after which stored files are evicted.
    #[arg(long, env = "OUTPUT_RETENTION_HOURS", default_value_t = 24)]
    output_retention_hours: u64,

    /// Seconds between sweeper runs.
    #[arg(long, env = "SWEEP_INTERVAL", default_value_t = 3600)]
    sweep_interval: u64,

    /// Default log level when RUST_LOG is unset.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log output format.
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "json")]
    log_format: LogFormat,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum LogFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    match cli.log_format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Text => subscriber.init(),
    }

    // ── Configuration ────────────────────────────────────────────────────
    let api_key = match &cli.api_key_file {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read API key from {}", path.display()))?
            .trim()
            .to_string(),
        None => cli.api_key.clone().unwrap_or_default(),
    };

    let config = GatewayConfig::builder()
        .api_url(&cli.api_url)
        .api_key(api_key)
        .temp_dir(&cli.temp_dir)
        .max_file_size(cli.max_file_size)
        .request_timeout_secs(cli.request_timeout)
        .download_timeout_secs(cli.download_timeout)
        .poll_interval_ms(cli.poll_interval_ms)
        .max_polls(cli.max_polls)
        .retry_attempts(cli.retry_attempts)
        .retry_delay_ms(cli.retry_delay_ms)
        .service_token(&cli.service_token)
        .dev_mode(cli.dev_mode)
        .output_retention_hours(cli.output_retention_hours)
        .sweep_interval_secs(cli.sweep_interval)
        .build()
        .context("Invalid configuration")?;

    if !config.dev_mode && config.service_token.is_empty() {
        tracing::warn!("SERVICE_TOKEN is empty; every protected request will be rejected");
    }
    tracing::info!(
        api_url = %config.api_url,
        api_key = %mask_secret(&config.api_key),
        temp_dir = %config.temp_dir.display(),
        dev_mode = config.dev_mode,
        "Starting markdown gateway"
    );

    let gateway = Arc::new(
        Gateway::new(config)
            .await
            .context("Failed to initialise gateway")?,
    );

    // ── Background sweeper ───────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = tokio::spawn(sweep_task(
        gateway.storage().clone(),
        SweepConfig::from_gateway(gateway.config()),
        shutdown_rx,
    ));

    // ── Serve ────────────────────────────────────────────────────────────
    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", cli.host, cli.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(%addr, "Listening");

    axum::serve(listener, server::router(gateway))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await
        .context("Server error")?;

    let _ = shutdown_tx.send(true);
    let _ = sweeper.await;
    tracing::info!("Markdown gateway stopped");
    Ok(())
}
