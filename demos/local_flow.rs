//! Obtain a token from a locally running authorization server
//!
//! Waits (bounded) for the authorization endpoint to come up, then runs the
//! full flow. Ctrl-C or `--timeout-secs` cancels it.
//!
//! Run with:
//! cargo run --example local_flow -- --oauth-client-id=000000 --oauth-client-secret=999999
//! cargo run --example local_flow -- --interactive

use std::time::Duration;

use clap::Parser;
use oauth_cli::{
    DEFAULT_REDIRECT_PORT, LaunchOptions, Logger, ProbeOptions, TokenRequestConfig,
    default_get_oauth_token, wait_for_endpoint,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "local_flow", about = "Run the OAuth authorization code flow")]
struct Cli {
    #[command(flatten)]
    launch: LaunchOptions,

    /// Authorization endpoint
    #[arg(long, default_value = "http://localhost:8080/authorize")]
    auth_url: String,

    /// Token endpoint
    #[arg(long, default_value = "http://localhost:8080/token")]
    token_url: String,

    /// Port for the local redirect listener
    #[arg(long, default_value_t = DEFAULT_REDIRECT_PORT)]
    port: u16,

    /// Scope to request, may be repeated
    #[arg(long = "scope")]
    scopes: Vec<String>,

    /// Give up after this many seconds
    #[arg(long, default_value_t = 300)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = TokenRequestConfig::builder(cli.auth_url, cli.token_url)
        .redirect_port(cli.port)
        .scopes(cli.scopes)
        .logger(Logger::new(|msg| eprintln!("{msg}")))
        .build()?;

    wait_for_endpoint(&config.authorization_endpoint, &ProbeOptions::default()).await?;
    tracing::info!("OAuth server is up");

    let cancel = CancellationToken::new();
    let watchdog = cancel.clone();
    let timeout = Duration::from_secs(cli.timeout_secs);
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = tokio::time::sleep(timeout) => {}
        }
        watchdog.cancel();
    });

    let token = default_get_oauth_token(config, &cli.launch, &cancel).await?;
    tracing::info!(token_type = %token.token_type, "OAuth token: {}", token.access_token);

    Ok(())
}
